//! Integrity monitor: registry of protected files, scan cycle, heuristic
//! sweep and quarantine policy.
//!
//! One instance per running application, shared as `Arc<IntegrityMonitor>`.
//! Hashing and quarantine run outside the registry lock, so `register` and
//! `verify` stay responsive while a scan is in progress.

use super::audit_loop::spawn_audit_loop;
use super::hasher::{hashes_match, sha256_file};
use super::heuristics::analyze_file;
use super::index::IntegrityIndex;
use super::record::{IntegrityRecord, IntegrityState};
use crate::enforcement::quarantine::QuarantineStore;
use chrono::{DateTime, Utc};
use docshield_core::settings::ProtectionSettings;
use docshield_core::{EventSeverity, Result, SecurityEventKind, SecurityEventLog, ShieldError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const ALERT_CAPACITY: usize = 256;

/// Pushed to subscribers as the monitor detects and responds to problems.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityAlert {
    IntegrityViolation {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    FileMissing {
        path: PathBuf,
    },
    FileQuarantined {
        path: PathBuf,
        quarantine_path: Option<PathBuf>,
    },
    QuarantineFailed {
        path: PathBuf,
        reason: String,
    },
    SuspiciousFile {
        path: PathBuf,
        findings: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub scanned: usize,
    pub ok: usize,
    pub violated: usize,
    pub missing: usize,
    pub quarantined: usize,
    pub quarantine_failures: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub enabled: bool,
    pub realtime_enabled: bool,
    pub heuristic_scanning: bool,
    pub total: usize,
    pub ok: usize,
    pub violated: usize,
    pub missing: usize,
    pub quarantined: usize,
    pub last_scan: Option<DateTime<Utc>>,
}

/// What a scan found for one path, computed without holding the registry lock.
enum Observation {
    Matches,
    Differs(String),
    Absent,
}

pub struct IntegrityMonitor {
    records: RwLock<HashMap<PathBuf, IntegrityRecord>>,
    index: IntegrityIndex,
    quarantine: QuarantineStore,
    events: Arc<SecurityEventLog>,
    protection: ProtectionSettings,
    enabled: AtomicBool,
    realtime: AtomicBool,
    heuristic: AtomicBool,
    dirty: AtomicBool,
    unreadable: Mutex<HashSet<PathBuf>>,
    last_scan: Mutex<Option<DateTime<Utc>>>,
    scan_lock: Mutex<()>,
    index_lock: Mutex<()>,
    alerts: broadcast::Sender<SecurityAlert>,
}

impl IntegrityMonitor {
    /// Build a monitor and load the persisted index.
    pub fn new(
        protection: ProtectionSettings,
        index: IntegrityIndex,
        quarantine: QuarantineStore,
        events: Arc<SecurityEventLog>,
    ) -> Result<Self> {
        let loaded = index.load()?;
        let count = loaded.len();
        let flagged = loaded.iter().filter(|r| r.state != IntegrityState::Ok).count();
        let records = loaded
            .into_iter()
            .map(|r| (r.file_path.clone(), r))
            .collect::<HashMap<_, _>>();
        let (alerts, _) = broadcast::channel(ALERT_CAPACITY);

        events.record(
            SecurityEventKind::IndexLoaded,
            EventSeverity::Info,
            format!("Integrity index loaded with {count} records"),
            json!({ "records": count, "flagged": flagged, "index": index.path() }),
        );

        Ok(Self {
            records: RwLock::new(records),
            index,
            quarantine,
            events,
            enabled: AtomicBool::new(protection.enabled),
            realtime: AtomicBool::new(protection.realtime_enabled),
            heuristic: AtomicBool::new(protection.heuristic_scanning),
            protection,
            dirty: AtomicBool::new(false),
            unreadable: Mutex::new(HashSet::new()),
            last_scan: Mutex::new(None),
            scan_lock: Mutex::new(()),
            index_lock: Mutex::new(()),
            alerts,
        })
    }

    pub fn quarantine_store(&self) -> &QuarantineStore {
        &self.quarantine
    }

    pub fn events(&self) -> &SecurityEventLog {
        &self.events
    }

    fn alert(&self, alert: SecurityAlert) {
        // no subscribers is fine
        let _ = self.alerts.send(alert);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SecurityAlert> {
        self.alerts.subscribe()
    }

    // ── registry ────────────────────────────────────────────────────────────

    /// Hash `path` and store it as the expected state. Re-registering
    /// overwrites the record and clears any violation.
    pub fn register(&self, path: &Path) -> Result<IntegrityRecord> {
        let canonical = path.canonicalize().map_err(|e| ShieldError::io(path, e))?;
        if !canonical.is_file() {
            return Err(ShieldError::InvalidInput(format!(
                "{} is not a regular file",
                canonical.display()
            )));
        }
        let hash = sha256_file(&canonical)?;
        let record = IntegrityRecord::new(canonical.clone(), hash);
        let previous = self.records.write().insert(canonical.clone(), record.clone());
        self.dirty.store(true, Ordering::SeqCst);

        self.events.record(
            SecurityEventKind::FileRegistered,
            EventSeverity::Info,
            format!("File registered: {}", canonical.display()),
            json!({
                "path": canonical,
                "hash": record.expected_hash_hex,
                "replaced": previous.map(|p| p.state),
            }),
        );
        Ok(record)
    }

    /// Register every regular file under `dir`. Files that fail are skipped.
    pub fn register_tree(&self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Err(ShieldError::InvalidInput(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        let mut registered = 0;
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match self.register(entry.path()) {
                Ok(_) => registered += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "register failed"),
            }
        }
        info!(dir = %dir.display(), registered, "directory registered");
        Ok(registered)
    }

    fn key_for(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    }

    /// Stop monitoring `path`. Returns whether a record existed.
    pub fn unregister(&self, path: &Path) -> bool {
        let key = Self::key_for(path);
        let removed = self.records.write().remove(&key);
        if let Some(record) = &removed {
            self.dirty.store(true, Ordering::SeqCst);
            self.events.record(
                SecurityEventKind::FileUnregistered,
                EventSeverity::Info,
                format!("File unregistered: {}", key.display()),
                json!({ "path": key, "state": record.state }),
            );
        }
        removed.is_some()
    }

    /// Whether the file's current hash matches its registered hash.
    /// Read-only: no state change, no quarantine. Unregistered or unreadable
    /// paths are `false`.
    pub fn verify(&self, path: &Path) -> bool {
        let key = Self::key_for(path);
        let expected = match self.records.read().get(&key) {
            Some(r) => r.expected_hash_hex.clone(),
            None => return false,
        };
        match sha256_file(&key) {
            Ok(actual) => hashes_match(&expected, &actual),
            Err(e) => {
                debug!(path = %key.display(), error = %e, "verify could not hash file");
                false
            }
        }
    }

    pub fn record(&self, path: &Path) -> Option<IntegrityRecord> {
        self.records.read().get(&Self::key_for(path)).cloned()
    }

    /// Snapshot of all records, sorted by path.
    pub fn records(&self) -> Vec<IntegrityRecord> {
        let mut all: Vec<_> = self.records.read().values().cloned().collect();
        all.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        all
    }

    // ── protection flags ────────────────────────────────────────────────────

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn realtime_protection(&self) -> bool {
        self.realtime.load(Ordering::SeqCst)
    }

    pub fn heuristic_scanning(&self) -> bool {
        self.heuristic.load(Ordering::SeqCst)
    }

    fn set_flag(&self, flag: &AtomicBool, name: &str, value: bool) {
        if flag.swap(value, Ordering::SeqCst) != value {
            self.events.record(
                SecurityEventKind::ProtectionChanged,
                EventSeverity::Warn,
                format!("{name} {}", if value { "enabled" } else { "disabled" }),
                json!({ "setting": name, "value": value }),
            );
        }
    }

    pub fn set_enabled(&self, value: bool) {
        self.set_flag(&self.enabled, "protection", value);
    }

    pub fn set_realtime_protection(&self, value: bool) {
        self.set_flag(&self.realtime, "realtime_protection", value);
    }

    pub fn set_heuristic_scanning(&self, value: bool) {
        self.set_flag(&self.heuristic, "heuristic_scanning", value);
    }

    pub fn status(&self) -> MonitorStatus {
        let records = self.records.read();
        let count = |s: IntegrityState| records.values().filter(|r| r.state == s).count();
        MonitorStatus {
            enabled: self.is_enabled(),
            realtime_enabled: self.realtime_protection(),
            heuristic_scanning: self.heuristic_scanning(),
            total: records.len(),
            ok: count(IntegrityState::Ok),
            violated: count(IntegrityState::Violated),
            missing: count(IntegrityState::Missing),
            quarantined: count(IntegrityState::Quarantined),
            last_scan: *self.last_scan.lock(),
        }
    }

    // ── scanning ────────────────────────────────────────────────────────────

    /// One full pass over the registry. Scans do not overlap.
    pub fn scan_once(&self) -> ScanReport {
        let _scan = self.scan_lock.lock();
        let snapshot: Vec<(PathBuf, String, IntegrityState)> = self
            .records
            .read()
            .values()
            .map(|r| (r.file_path.clone(), r.expected_hash_hex.clone(), r.state))
            .collect();

        let mut report = ScanReport::default();
        for (path, expected, state) in snapshot {
            report.scanned += 1;
            if state == IntegrityState::Quarantined {
                report.quarantined += 1;
                continue;
            }
            let observation = match fs::metadata(&path) {
                // replaced by a directory or other non-file
                Ok(meta) if !meta.is_file() => Observation::Absent,
                _ => match sha256_file(&path) {
                    Ok(actual) if hashes_match(&expected, &actual) => Observation::Matches,
                    Ok(actual) => Observation::Differs(actual),
                    Err(ShieldError::FileNotFound(_)) => Observation::Absent,
                    Err(e) => {
                        report.errors += 1;
                        self.note_unreadable(&path, &e);
                        continue;
                    }
                },
            };
            self.unreadable.lock().remove(&path);
            self.judge(&path, &expected, observation, &mut report);
        }

        *self.last_scan.lock() = Some(Utc::now());
        info!(
            scanned = report.scanned,
            ok = report.ok,
            violated = report.violated,
            missing = report.missing,
            quarantined = report.quarantined,
            failures = report.quarantine_failures,
            errors = report.errors,
            "integrity scan complete"
        );
        report
    }

    /// Log a hash failure once per path until the file can be read again.
    fn note_unreadable(&self, path: &Path, err: &ShieldError) {
        warn!(path = %path.display(), error = %err, "scan could not hash file");
        if self.unreadable.lock().insert(path.to_path_buf()) {
            self.events.record(
                SecurityEventKind::FileUnreadable,
                EventSeverity::Error,
                format!("Protected file unreadable: {}", path.display()),
                json!({ "path": path, "error": err.to_string() }),
            );
        }
    }

    /// Apply one observation to the record, if it is still the one that was hashed.
    fn judge(&self, path: &Path, expected: &str, observation: Observation, report: &mut ScanReport) {
        let state = {
            let mut records = self.records.write();
            let record = match records.get_mut(path) {
                // re-registered or removed while hashing
                Some(r) if r.expected_hash_hex == expected => r,
                _ => return,
            };
            record.last_checked_at = Utc::now();
            match &observation {
                Observation::Matches => {}
                Observation::Differs(actual) => {
                    if record.transition(IntegrityState::Violated) {
                        self.dirty.store(true, Ordering::SeqCst);
                        self.events.record(
                            SecurityEventKind::IntegrityViolation,
                            EventSeverity::Critical,
                            format!("Integrity violation: {}", path.display()),
                            json!({ "path": path, "expected": expected, "actual": actual }),
                        );
                        self.alert(SecurityAlert::IntegrityViolation {
                            path: path.to_path_buf(),
                            expected: expected.to_string(),
                            actual: actual.clone(),
                        });
                    }
                }
                Observation::Absent => {
                    if record.transition(IntegrityState::Missing) {
                        self.dirty.store(true, Ordering::SeqCst);
                        self.events.record(
                            SecurityEventKind::FileMissing,
                            EventSeverity::Critical,
                            format!("Protected file missing: {}", path.display()),
                            json!({ "path": path }),
                        );
                        self.alert(SecurityAlert::FileMissing {
                            path: path.to_path_buf(),
                        });
                    }
                }
            }
            record.state
        };

        match state {
            IntegrityState::Ok => report.ok += 1,
            IntegrityState::Violated => report.violated += 1,
            IntegrityState::Missing => report.missing += 1,
            IntegrityState::Quarantined => report.quarantined += 1,
        }

        if state.awaiting_quarantine() && self.realtime_protection() {
            self.enforce(path, expected, state, report);
        }
    }

    fn enforce(&self, path: &Path, expected: &str, state: IntegrityState, report: &mut ScanReport) {
        let reason = match state {
            IntegrityState::Missing => "protected file missing",
            _ => "integrity violation",
        };
        match self.quarantine.quarantine(path, reason) {
            Ok(entry) => {
                {
                    let mut records = self.records.write();
                    if let Some(r) = records.get_mut(path) {
                        if r.expected_hash_hex == expected && r.transition(IntegrityState::Quarantined) {
                            self.dirty.store(true, Ordering::SeqCst);
                        }
                    }
                }
                match state {
                    IntegrityState::Missing => report.missing -= 1,
                    _ => report.violated -= 1,
                }
                report.quarantined += 1;
                self.events.record(
                    SecurityEventKind::FileQuarantined,
                    EventSeverity::Warn,
                    format!("File quarantined: {}", path.display()),
                    json!({ "path": path, "quarantine_path": entry.quarantine_path, "reason": reason }),
                );
                self.alert(SecurityAlert::FileQuarantined {
                    path: path.to_path_buf(),
                    quarantine_path: entry.quarantine_path,
                });
            }
            Err(e) => {
                report.quarantine_failures += 1;
                self.events.record(
                    SecurityEventKind::QuarantineFailed,
                    EventSeverity::Error,
                    format!("Quarantine failed for {}: {e}", path.display()),
                    json!({ "path": path, "error": e.to_string() }),
                );
                self.alert(SecurityAlert::QuarantineFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Run content heuristics over registered files that are still in place.
    /// Returns the number of files with findings.
    pub fn heuristic_sweep(&self) -> usize {
        let paths: Vec<PathBuf> = self
            .records
            .read()
            .values()
            .filter(|r| r.state == IntegrityState::Ok)
            .map(|r| r.file_path.clone())
            .collect();

        let mut flagged = 0;
        for path in paths {
            let findings = match analyze_file(&path) {
                Ok(f) if f.is_empty() => continue,
                Ok(f) => f,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "heuristic scan skipped file");
                    continue;
                }
            };
            flagged += 1;
            let findings: Vec<String> = findings.iter().map(ToString::to_string).collect();
            self.events.record(
                SecurityEventKind::SuspiciousFile,
                EventSeverity::Warn,
                format!("Suspicious content in {}", path.display()),
                json!({ "path": path, "findings": findings }),
            );
            self.alert(SecurityAlert::SuspiciousFile { path, findings });
        }
        debug!(flagged, "heuristic sweep complete");
        flagged
    }

    // ── persistence and lifecycle ───────────────────────────────────────────

    /// Write the index to disk.
    pub fn persist(&self) -> Result<()> {
        let _guard = self.index_lock.lock();
        self.dirty.store(false, Ordering::SeqCst);
        let records = self.records();
        if let Err(e) = self.index.save(records.iter()) {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }
        debug!(records = records.len(), "integrity index saved");
        Ok(())
    }

    fn persist_if_dirty(&self) {
        if self.dirty.load(Ordering::SeqCst) {
            if let Err(e) = self.persist() {
                warn!(error = %e, "failed to save integrity index");
            }
        }
    }

    /// Spawn the periodic scan loop and the heuristic sweep loop.
    pub fn start(self: &Arc<Self>) -> MonitorHandle {
        let wake = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let monitor = Arc::clone(self);
        let scan = spawn_audit_loop(
            "integrity-scan",
            self.protection.initial_delay(),
            self.protection.scan_interval(),
            wake.clone(),
            shutdown_rx.clone(),
            move || {
                if !monitor.is_enabled() {
                    debug!("protection disabled, skipping scan");
                    return;
                }
                monitor.scan_once();
                monitor.persist_if_dirty();
            },
        );

        let monitor = Arc::clone(self);
        let sweep = spawn_audit_loop(
            "heuristic-sweep",
            self.protection.initial_delay(),
            self.protection.heuristic_interval(),
            Arc::new(Notify::new()),
            shutdown_rx,
            move || {
                if monitor.is_enabled() && monitor.heuristic_scanning() {
                    monitor.heuristic_sweep();
                }
            },
        );

        self.events.record(
            SecurityEventKind::MonitorStarted,
            EventSeverity::Info,
            "Integrity monitor started",
            json!({
                "records": self.records.read().len(),
                "scan_interval_secs": self.protection.scan_interval_secs,
                "realtime": self.realtime_protection(),
            }),
        );

        MonitorHandle {
            monitor: Arc::clone(self),
            wake,
            shutdown_tx,
            tasks: vec![scan, sweep],
        }
    }
}

/// Control handle for a started monitor.
pub struct MonitorHandle {
    monitor: Arc<IntegrityMonitor>,
    wake: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Run a scan now instead of waiting for the next interval.
    pub fn trigger_scan(&self) {
        self.wake.notify_one();
    }

    /// Stop both loops, wait for them, and save the index.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "monitor task ended abnormally");
            }
        }
        let monitor = self.monitor.clone();
        docshield_core::task::run_blocking(move || monitor.persist()).await?;
        self.monitor.events.record(
            SecurityEventKind::MonitorStopped,
            EventSeverity::Info,
            "Integrity monitor stopped",
            json!({}),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn monitor(root: &Path, realtime: bool) -> IntegrityMonitor {
        let protection = ProtectionSettings {
            realtime_enabled: realtime,
            ..ProtectionSettings::default()
        };
        let events = Arc::new(SecurityEventLog::new(root.join("logs/security.log"), 1 << 20).unwrap());
        IntegrityMonitor::new(
            protection,
            IntegrityIndex::new(root.join("file_integrity.dat")),
            QuarantineStore::new(root.join("quarantine")).unwrap(),
            events,
        )
        .unwrap()
    }

    #[test]
    fn register_missing_file_fails() {
        let dir = tempdir().unwrap();
        let m = monitor(dir.path(), true);
        assert!(matches!(
            m.register(&dir.path().join("nope.pdf")),
            Err(ShieldError::FileNotFound(_))
        ));
    }

    #[test]
    fn reregister_overwrites_and_clears_violation() {
        let dir = tempdir().unwrap();
        let m = monitor(dir.path(), false);
        let f = dir.path().join("doc.txt");
        fs::write(&f, b"v1").unwrap();
        m.register(&f).unwrap();
        fs::write(&f, b"v2").unwrap();
        m.scan_once();
        assert_eq!(m.record(&f).unwrap().state, IntegrityState::Violated);

        m.register(&f).unwrap();
        assert_eq!(m.records().len(), 1);
        assert_eq!(m.record(&f).unwrap().state, IntegrityState::Ok);
    }

    #[test]
    fn verify_is_read_only() {
        let dir = tempdir().unwrap();
        let m = monitor(dir.path(), true);
        let f = dir.path().join("doc.txt");
        fs::write(&f, b"original").unwrap();
        m.register(&f).unwrap();
        assert!(m.verify(&f));

        fs::write(&f, b"changed").unwrap();
        assert!(!m.verify(&f));
        assert_eq!(m.record(&f).unwrap().state, IntegrityState::Ok);
        assert!(f.exists());

        assert!(!m.verify(&dir.path().join("unregistered.txt")));
    }

    #[test]
    fn unregister_removes_record() {
        let dir = tempdir().unwrap();
        let m = monitor(dir.path(), true);
        let f = dir.path().join("doc.txt");
        fs::write(&f, b"x").unwrap();
        m.register(&f).unwrap();
        assert!(m.unregister(&f));
        assert!(!m.unregister(&f));
        assert!(m.records().is_empty());
    }

    #[test]
    fn flags_are_logged_once_per_change() {
        let dir = tempdir().unwrap();
        let m = monitor(dir.path(), true);
        m.set_realtime_protection(false);
        m.set_realtime_protection(false);
        m.set_heuristic_scanning(false);
        let status = m.status();
        assert!(!status.realtime_enabled);
        assert!(!status.heuristic_scanning);

        let changes = m
            .events()
            .read_recent(None)
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == SecurityEventKind::ProtectionChanged)
            .count();
        assert_eq!(changes, 2);
    }

    #[test]
    fn index_survives_restart() {
        let dir = tempdir().unwrap();
        let f = dir.path().join("doc.txt");
        fs::write(&f, b"x").unwrap();
        {
            let m = monitor(dir.path(), true);
            m.register(&f).unwrap();
            m.persist().unwrap();
        }
        let m = monitor(dir.path(), true);
        assert_eq!(m.records().len(), 1);
        assert!(m.verify(&f));
    }

    #[test]
    fn state_changes_mark_index_dirty() {
        let dir = tempdir().unwrap();
        let m = monitor(dir.path(), false);
        let f = dir.path().join("doc.txt");
        fs::write(&f, b"v1").unwrap();
        m.register(&f).unwrap();
        m.persist().unwrap();
        assert!(!m.dirty.load(Ordering::SeqCst));

        m.scan_once();
        assert!(!m.dirty.load(Ordering::SeqCst));
        fs::write(&f, b"v2").unwrap();
        m.scan_once();
        assert!(m.dirty.load(Ordering::SeqCst));
    }

    #[test]
    fn heuristic_sweep_flags_but_never_quarantines() {
        let dir = tempdir().unwrap();
        let m = monitor(dir.path(), true);
        let f = dir.path().join("tool.bin");
        fs::write(&f, b"\x7fELF\x02\x01\x01rest-of-binary").unwrap();
        m.register(&f).unwrap();
        let mut alerts = m.subscribe();

        assert_eq!(m.heuristic_sweep(), 1);
        assert!(f.exists());
        assert_eq!(m.record(&f).unwrap().state, IntegrityState::Ok);
        assert!(matches!(
            alerts.try_recv().unwrap(),
            SecurityAlert::SuspiciousFile { .. }
        ));
    }
}
