//! Tamper-evident security event log.
//!
//! JSON lines, each entry hashed (SHA-256) together with the previous entry's
//! hash. Rotates by size and keeps [`MAX_ROTATIONS`] old files.

use crate::error::{Result, ShieldError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const MAX_ROTATIONS: usize = 5;
const CHAIN_START: &str = "CHAIN_START";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Info,
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventKind {
    MonitorStarted,
    MonitorStopped,
    IndexLoaded,
    FileRegistered,
    FileUnregistered,
    IntegrityViolation,
    FileMissing,
    FileQuarantined,
    QuarantineFailed,
    FileUnreadable,
    SuspiciousFile,
    ProtectionChanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: SecurityEventKind,
    pub severity: EventSeverity,
    pub message: String,
    pub data: serde_json::Value,
    pub prev_hash: String,
    pub hash: String,
}

/// The hashed portion of an entry, in a fixed field order.
#[derive(Serialize)]
struct HashedFields<'a> {
    seq: u64,
    timestamp: &'a DateTime<Utc>,
    kind: SecurityEventKind,
    severity: EventSeverity,
    message: &'a str,
    data: &'a serde_json::Value,
    prev_hash: &'a str,
}

impl EventEntry {
    fn compute_hash(&self) -> Result<String> {
        let fields = HashedFields {
            seq: self.seq,
            timestamp: &self.timestamp,
            kind: self.kind,
            severity: self.severity,
            message: &self.message,
            data: &self.data,
            prev_hash: &self.prev_hash,
        };
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&fields)?);
        Ok(hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerification {
    Valid { entries: usize },
    Broken { seq: u64 },
}

#[derive(Debug)]
struct LogState {
    last_seq: u64,
    last_hash: String,
}

pub struct SecurityEventLog {
    path: PathBuf,
    inner: Mutex<LogState>,
    max_bytes: u64,
}

impl SecurityEventLog {
    pub fn new<P: AsRef<Path>>(path: P, max_bytes: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ShieldError::io(parent, e))?;
            }
        }
        let (last_seq, last_hash) = Self::load_state(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(LogState {
                last_seq,
                last_hash,
            }),
            max_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_state(path: &Path) -> Result<(u64, String)> {
        let entries = read_entries(path)?;
        Ok(entries
            .last()
            .map(|e| (e.seq, e.hash.clone()))
            .unwrap_or((0, CHAIN_START.to_string())))
    }

    pub fn append(
        &self,
        kind: SecurityEventKind,
        severity: EventSeverity,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<EventEntry> {
        let mut state = self.inner.lock();
        self.rotate_if_needed(&mut state)?;
        let mut entry = EventEntry {
            seq: state.last_seq + 1,
            timestamp: Utc::now(),
            kind,
            severity,
            message: message.into(),
            data,
            prev_hash: state.last_hash.clone(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash()?;
        self.write_entry(&entry)?;
        state.last_seq = entry.seq;
        state.last_hash = entry.hash.clone();
        match severity {
            EventSeverity::Info => info!(kind = ?kind, "{}", entry.message),
            EventSeverity::Warn => warn!(kind = ?kind, "{}", entry.message),
            EventSeverity::Error | EventSeverity::Critical => {
                error!(kind = ?kind, severity = ?severity, "{}", entry.message)
            }
        }
        Ok(entry)
    }

    /// Append, logging instead of failing. For callers that must not abort on log IO.
    pub fn record(
        &self,
        kind: SecurityEventKind,
        severity: EventSeverity,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        if let Err(e) = self.append(kind, severity, message, data) {
            error!(error = %e, kind = ?kind, "failed to write security event");
        }
    }

    fn write_entry(&self, entry: &EventEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ShieldError::io(&self.path, e))?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)
            .and_then(|_| file.flush())
            .map_err(|e| ShieldError::io(&self.path, e))?;
        Ok(())
    }

    fn rotate_if_needed(&self, state: &mut LogState) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(metadata) if metadata.len() >= self.max_bytes => {}
            _ => return Ok(()),
        }
        for i in (1..=MAX_ROTATIONS).rev() {
            let rotated = self.path_with_suffix(i);
            if rotated.exists() {
                if i == MAX_ROTATIONS {
                    fs::remove_file(&rotated).map_err(|e| ShieldError::io(&rotated, e))?;
                } else {
                    let next = self.path_with_suffix(i + 1);
                    fs::rename(&rotated, &next).map_err(|e| ShieldError::io(&rotated, e))?;
                }
            }
        }
        let first = self.path_with_suffix(1);
        fs::rename(&self.path, &first).map_err(|e| ShieldError::io(&self.path, e))?;
        // new file starts a new chain; seq stays monotonic
        state.last_hash = CHAIN_START.to_string();
        Ok(())
    }

    /// Most recent first.
    pub fn read_recent(&self, limit: Option<usize>) -> Result<Vec<EventEntry>> {
        let _guard = self.inner.lock();
        let mut entries = read_entries(&self.path)?;
        entries.reverse();
        if let Some(lim) = limit {
            entries.truncate(lim);
        }
        Ok(entries)
    }

    /// Recompute every hash in the live file and check the links.
    pub fn verify_chain(&self) -> Result<ChainVerification> {
        let _guard = self.inner.lock();
        let lines = read_lines(&self.path)?;
        let mut prev = CHAIN_START.to_string();
        let mut last_seq = 0;
        for line in &lines {
            let entry = match line {
                Ok(entry) => entry,
                // unparsable line: the break is right after the last good entry
                Err(_) => return Ok(ChainVerification::Broken { seq: last_seq + 1 }),
            };
            if entry.prev_hash != prev || entry.compute_hash()? != entry.hash {
                return Ok(ChainVerification::Broken { seq: entry.seq });
            }
            prev = entry.hash.clone();
            last_seq = entry.seq;
        }
        Ok(ChainVerification::Valid {
            entries: lines.len(),
        })
    }

    fn path_with_suffix(&self, index: usize) -> PathBuf {
        let filename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "security.log".to_string());
        self.path.with_file_name(format!("{}.{}", filename, index))
    }
}

fn read_lines(path: &Path) -> Result<Vec<serde_json::Result<EventEntry>>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let file = File::open(path).map_err(|e| ShieldError::io(path, e))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ShieldError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        lines.push(serde_json::from_str(&line));
    }
    Ok(lines)
}

/// Parsed entries; torn or corrupt lines are skipped with a warning.
fn read_entries(path: &Path) -> Result<Vec<EventEntry>> {
    let mut entries = Vec::new();
    for (n, line) in read_lines(path)?.into_iter().enumerate() {
        match line {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(log = %path.display(), line = n + 1, error = %e, "skipping unreadable event"),
        }
    }
    Ok(entries)
}
