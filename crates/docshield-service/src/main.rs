use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Parser, Subcommand};
use docshield_core::container::{ContainerPermissions, ContainerProtector};
use docshield_core::paths::DataLayout;
use docshield_core::redaction::{
    RedactionEngine, RedactionOptions, TextDocument, TextExportAssembler, PAGE_BREAK,
};
use docshield_core::{CancelToken, CryptoEngine, SecurityEventLog, ShieldSettings};
use docshield_service::integrity::index::IntegrityIndex;
use docshield_service::{IntegrityMonitor, QuarantineStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const PASSWORD_ENV: &str = "DOCSHIELD_PASSWORD";

#[derive(Parser, Debug)]
#[command(author, version, about = "Docshield document protection", long_about = None)]
struct Cli {
    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the integrity monitor until Ctrl-C
    Run,
    /// Register files or directories for integrity monitoring
    Register {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Stop monitoring a file
    Unregister { path: PathBuf },
    /// Check a file against its registered hash
    Verify { path: PathBuf },
    /// Run one integrity scan now
    Scan,
    /// Show monitor status
    Status,
    /// Encrypt a file with a password
    Encrypt { input: PathBuf, output: PathBuf },
    /// Decrypt a file produced by `encrypt`
    Decrypt { input: PathBuf, output: PathBuf },
    /// Password-protect a PDF with the external container tool
    Protect {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        deny_print: bool,
        #[arg(long)]
        allow_modify: bool,
        #[arg(long)]
        allow_extract: bool,
    },
    /// Redact every occurrence of a term from a plain-text export
    /// (pages separated by form feeds)
    Redact {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        term: String,
        /// Also write redacted page images (PPM) to this directory
        #[arg(long)]
        images: Option<PathBuf>,
    },
    /// Show recent security events
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Verify the hash chain of the live log
        #[arg(long)]
        verify: bool,
    },
    /// List quarantined files
    QuarantineLog,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let app = App::open(cli.data_dir)?;
    match cli.command {
        Commands::Run => run_command(&app).await,
        Commands::Register { paths } => register_command(&app, &paths),
        Commands::Unregister { path } => unregister_command(&app, &path),
        Commands::Verify { path } => verify_command(&app, &path),
        Commands::Scan => scan_command(&app),
        Commands::Status => status_command(&app),
        Commands::Encrypt { input, output } => encrypt_command(&app, input, output).await,
        Commands::Decrypt { input, output } => decrypt_command(&app, input, output).await,
        Commands::Protect {
            input,
            output,
            deny_print,
            allow_modify,
            allow_extract,
        } => {
            let permissions = ContainerPermissions {
                allow_print: !deny_print,
                allow_modify,
                allow_extract,
            };
            protect_command(&app, &input, &output, permissions)
        }
        Commands::Redact {
            input,
            output,
            term,
            images,
        } => redact_command(&app, &input, &output, &term, images),
        Commands::Events { limit, verify } => events_command(&app, limit, verify),
        Commands::QuarantineLog => quarantine_log_command(&app),
    }
}

struct App {
    layout: DataLayout,
    settings: ShieldSettings,
}

impl App {
    fn open(data_dir: Option<PathBuf>) -> Result<Self> {
        let layout = match data_dir {
            Some(dir) => DataLayout::new(dir),
            None => DataLayout::from_env()?,
        };
        layout.ensure()?;
        let settings = ShieldSettings::load_or_default(&layout.settings_path())
            .with_context(|| format!("load settings from {}", layout.settings_path().display()))?;
        settings.validate()?;
        Ok(Self { layout, settings })
    }

    fn event_log(&self) -> Result<Arc<SecurityEventLog>> {
        Ok(Arc::new(SecurityEventLog::new(
            self.layout.security_log_path(),
            self.settings.event_log.max_bytes,
        )?))
    }

    fn quarantine(&self) -> Result<QuarantineStore> {
        Ok(QuarantineStore::new(self.layout.quarantine_dir())?)
    }

    fn monitor(&self) -> Result<Arc<IntegrityMonitor>> {
        let monitor = IntegrityMonitor::new(
            self.settings.protection.clone(),
            IntegrityIndex::new(self.layout.integrity_index_path()),
            self.quarantine()?,
            self.event_log()?,
        )?;
        Ok(Arc::new(monitor))
    }

    fn crypto(&self) -> Arc<CryptoEngine> {
        Arc::new(CryptoEngine::new(self.settings.crypto.kdf))
    }
}

async fn run_command(app: &App) -> Result<()> {
    let monitor = app.monitor()?;
    let mut alerts = monitor.subscribe();
    let handle = monitor.start();

    let alert_task = tokio::spawn(async move {
        loop {
            match alerts.recv().await {
                Ok(alert) => match serde_json::to_string(&alert) {
                    Ok(line) => warn!(alert = %line, "security alert"),
                    Err(e) => warn!(error = %e, "unprintable alert"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "alert stream lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    info!(data_dir = %app.layout.root().display(), "monitor running; Ctrl-C to stop");
    signal::ctrl_c().await?;
    info!("monitor stopping");
    handle.stop().await?;
    alert_task.abort();
    Ok(())
}

fn register_command(app: &App, paths: &[PathBuf]) -> Result<()> {
    let monitor = app.monitor()?;
    for path in paths {
        if path.is_dir() {
            let n = monitor.register_tree(path)?;
            println!("{}: {n} files registered", path.display());
        } else {
            let record = monitor.register(path)?;
            println!("{}  {}", record.expected_hash_hex, record.file_path.display());
        }
    }
    monitor.persist()?;
    Ok(())
}

fn unregister_command(app: &App, path: &Path) -> Result<()> {
    let monitor = app.monitor()?;
    if !monitor.unregister(path) {
        bail!("{} is not registered", path.display());
    }
    monitor.persist()?;
    println!("unregistered {}", path.display());
    Ok(())
}

fn verify_command(app: &App, path: &Path) -> Result<()> {
    let monitor = app.monitor()?;
    if monitor.record(path).is_none() {
        bail!("{} is not registered", path.display());
    }
    if monitor.verify(path) {
        println!("OK        {}", path.display());
        Ok(())
    } else {
        println!("MODIFIED  {}", path.display());
        Err(anyhow!("integrity check failed"))
    }
}

fn scan_command(app: &App) -> Result<()> {
    let monitor = app.monitor()?;
    let report = monitor.scan_once();
    monitor.persist()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn status_command(app: &App) -> Result<()> {
    let monitor = app.monitor()?;
    println!("{}", serde_json::to_string_pretty(&monitor.status())?);
    for record in monitor.records() {
        println!("{:<12} {}", record.state, record.file_path.display());
    }
    Ok(())
}

async fn encrypt_command(app: &App, input: PathBuf, output: PathBuf) -> Result<()> {
    let password = prompt_password_twice("Encryption password: ")?;
    app.crypto()
        .encrypt_file_async(input, output.clone(), password, CancelToken::never())
        .await?;
    println!("encrypted -> {}", output.display());
    Ok(())
}

async fn decrypt_command(app: &App, input: PathBuf, output: PathBuf) -> Result<()> {
    let password = prompt_password_once("Password: ")?;
    app.crypto()
        .decrypt_file_async(input, output.clone(), password, CancelToken::never())
        .await?;
    println!("decrypted -> {}", output.display());
    Ok(())
}

fn protect_command(
    app: &App,
    input: &Path,
    output: &Path,
    permissions: ContainerPermissions,
) -> Result<()> {
    let user = Zeroizing::new(
        rpassword::prompt_password("User (open) password, empty for none: ")
            .map_err(|e| anyhow!("password prompt: {e}"))?,
    );
    let owner = prompt_password_twice("Owner password: ")?;
    ContainerProtector::new(&app.settings.container).protect(
        input,
        output,
        &user,
        &owner,
        permissions,
    )?;
    println!("protected -> {}", output.display());
    Ok(())
}

fn redact_command(
    app: &App,
    input: &Path,
    output: &Path,
    term: &str,
    images: Option<PathBuf>,
) -> Result<()> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("read {}", input.display()))?;
    let document =
        TextDocument::new(text.split(PAGE_BREAK)).with_metrics(app.settings.redaction.heuristic);
    let engine = RedactionEngine::new(RedactionOptions::from(&app.settings.redaction))?;
    let outcome = engine.redact(Some(&document), term)?;

    let mut assembler = TextExportAssembler::new(&document);
    if let Some(dir) = images {
        assembler = assembler.with_image_dir(dir);
    }
    outcome
        .document
        .write_atomic(&mut assembler, output, &CancelToken::never())?;
    println!(
        "{} match(es) on {} page(s) redacted -> {}",
        outcome.match_count(),
        outcome.targets.len(),
        output.display()
    );
    Ok(())
}

fn events_command(app: &App, limit: usize, verify: bool) -> Result<()> {
    let log = app.event_log()?;
    if verify {
        println!("{:?}", log.verify_chain()?);
    }
    for entry in log.read_recent(Some(limit))? {
        println!(
            "{:>6} {} {:?} {:?} {}",
            entry.seq,
            entry.timestamp.to_rfc3339(),
            entry.severity,
            entry.kind,
            entry.message
        );
    }
    Ok(())
}

fn quarantine_log_command(app: &App) -> Result<()> {
    for entry in app.quarantine()?.entries()? {
        let dest = entry
            .quarantine_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {} -> {} ({})",
            entry.timestamp.to_rfc3339(),
            entry.original_path.display(),
            dest,
            entry.reason
        );
    }
    Ok(())
}

fn prompt_password_once(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let pw = rpassword::prompt_password(prompt).map_err(|e| anyhow!("password prompt: {e}"))?;
    if pw.trim().is_empty() {
        bail!("password must not be empty");
    }
    Ok(Zeroizing::new(pw))
}

fn prompt_password_twice(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let first = prompt_password_once(prompt)?;
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm password: ")
            .map_err(|e| anyhow!("password prompt: {e}"))?,
    );
    if *first != *second {
        bail!("passwords do not match");
    }
    Ok(first)
}
