//! Quarantine store: moves files that failed an integrity check into a
//! holding area for later inspection. Files are never deleted, only moved.
//!
//! Layout: {quarantine_dir}/{timestamp}_{tag}_{original_filename}.quarantine
//! plus an append-only `quarantine.log` of JSON lines.
//!
//! Quarantine is best-effort: a file can change between the hash check and
//! the move, and nothing here prevents that.

use chrono::{DateTime, Utc};
use docshield_core::{Result, ShieldError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const QUARANTINE_LOG: &str = "quarantine.log";
const QUARANTINE_SUFFIX: &str = ".quarantine";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub original_path: PathBuf,
    /// `None` when the file was already gone.
    pub quarantine_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

pub struct QuarantineStore {
    root: PathBuf,
    log_lock: Mutex<()>,
}

impl QuarantineStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| ShieldError::io(&root, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&root, fs::Permissions::from_mode(0o700)) {
                warn!(path = %root.display(), error = %e, "could not restrict quarantine dir");
            }
        }
        Ok(Self {
            root,
            log_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(QUARANTINE_LOG)
    }

    fn destination_for(&self, source: &Path, now: DateTime<Utc>) -> PathBuf {
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let ts = now.format("%Y%m%dT%H%M%S%.3f");
        self.root
            .join(format!("{ts}_{}_{filename}{QUARANTINE_SUFFIX}", &tag[..8]))
    }

    /// Move `source` into quarantine and log it.
    ///
    /// A source that no longer exists is logged with no quarantine path.
    /// Fails with `QuarantineFailure` when the file cannot be moved; the
    /// source is left in place in that case.
    pub fn quarantine(&self, source: &Path, reason: &str) -> Result<QuarantineEntry> {
        let now = Utc::now();
        let quarantine_path = if source.is_file() {
            let dest = self.destination_for(source, now);
            self.move_file(source, &dest)?;
            Some(dest)
        } else {
            info!(path = %source.display(), "quarantine: no regular file at source, nothing to move");
            None
        };

        let entry = QuarantineEntry {
            original_path: source.to_path_buf(),
            quarantine_path,
            timestamp: now,
            reason: reason.to_string(),
        };
        if let Err(e) = self.append_log(&entry) {
            error!(path = %source.display(), error = %e, "failed to write quarantine log");
        }
        Ok(entry)
    }

    fn move_file(&self, source: &Path, dest: &Path) -> Result<()> {
        let failure = |reason: String| ShieldError::QuarantineFailure {
            path: source.to_path_buf(),
            reason,
        };
        match fs::rename(source, dest) {
            Ok(()) => {
                info!(from = %source.display(), to = %dest.display(), "file quarantined (moved)");
                Ok(())
            }
            Err(rename_err) => {
                // cross-filesystem rename fails; fall back to copy-then-delete
                warn!(error = %rename_err, "rename to quarantine failed, trying copy");
                fs::copy(source, dest).map_err(|e| failure(format!("copy failed: {e}")))?;
                if let Err(e) = fs::remove_file(source) {
                    // the original is still live; do not leave a second copy behind
                    let _ = fs::remove_file(dest);
                    return Err(failure(format!("original could not be removed: {e}")));
                }
                info!(from = %source.display(), to = %dest.display(), "file quarantined (copied)");
                Ok(())
            }
        }
    }

    fn append_log(&self, entry: &QuarantineEntry) -> Result<()> {
        let _guard = self.log_lock.lock();
        let path = self.log_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ShieldError::io(&path, e))?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{line}").map_err(|e| ShieldError::io(&path, e))?;
        Ok(())
    }

    /// Logged entries, oldest first. Unreadable lines are skipped.
    pub fn entries(&self) -> Result<Vec<QuarantineEntry>> {
        let _guard = self.log_lock.lock();
        let path = self.log_path();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ShieldError::io(&path, e)),
        };
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping malformed quarantine log line");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn moves_file_and_logs_entry() {
        let dir = tempdir().unwrap();
        let store = QuarantineStore::new(dir.path().join("q")).unwrap();
        let victim = dir.path().join("report.pdf");
        fs::write(&victim, b"tampered").unwrap();

        let entry = store.quarantine(&victim, "hash mismatch").unwrap();
        assert!(!victim.exists());
        let dest = entry.quarantine_path.clone().unwrap();
        assert!(dest.starts_with(store.root()));
        assert!(dest.to_string_lossy().ends_with("report.pdf.quarantine"));
        assert_eq!(fs::read(&dest).unwrap(), b"tampered");

        assert_eq!(store.entries().unwrap(), vec![entry]);
    }

    #[test]
    fn same_name_twice_does_not_collide() {
        let dir = tempdir().unwrap();
        let store = QuarantineStore::new(dir.path().join("q")).unwrap();
        let victim = dir.path().join("a.txt");

        fs::write(&victim, b"one").unwrap();
        let first = store.quarantine(&victim, "r").unwrap();
        fs::write(&victim, b"two").unwrap();
        let second = store.quarantine(&victim, "r").unwrap();

        assert_ne!(first.quarantine_path, second.quarantine_path);
        assert_eq!(store.entries().unwrap().len(), 2);
    }

    #[test]
    fn absent_file_is_logged_without_destination() {
        let dir = tempdir().unwrap();
        let store = QuarantineStore::new(dir.path().join("q")).unwrap();
        let entry = store
            .quarantine(&dir.path().join("gone.txt"), "file missing")
            .unwrap();
        assert!(entry.quarantine_path.is_none());
        assert_eq!(store.entries().unwrap().len(), 1);
    }

    #[test]
    fn unusable_store_reports_failure_and_keeps_source() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("q");
        let store = QuarantineStore::new(&root).unwrap();
        fs::remove_dir(&root).unwrap();
        fs::write(&root, b"not a directory").unwrap();

        let victim = dir.path().join("keep.txt");
        fs::write(&victim, b"data").unwrap();
        let err = store.quarantine(&victim, "r").unwrap_err();
        assert!(matches!(err, ShieldError::QuarantineFailure { .. }));
        assert!(err.is_retryable());
        assert!(victim.exists());
    }

    #[cfg(unix)]
    #[test]
    fn quarantine_dir_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let store = QuarantineStore::new(dir.path().join("q")).unwrap();
        let mode = fs::metadata(store.root()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
