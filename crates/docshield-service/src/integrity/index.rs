//! Persisted integrity index: one `path|hashHex|lastChecked|state` line per file.
//!
//! The path is recovered with a right split so it may contain `|`.
//! Timestamps are RFC 3339. The trailing state is optional on load; lines
//! without it come back as `Ok`.

use super::hasher::is_sha256_hex;
use super::record::{IntegrityRecord, IntegrityState};
use chrono::{DateTime, Utc};
use docshield_core::fsutil::write_atomic;
use docshield_core::{CancelToken, Result, ShieldError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct IntegrityIndex {
    path: PathBuf,
}

impl IntegrityIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records from disk. A missing index file is an empty index.
    pub fn load(&self) -> Result<Vec<IntegrityRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ShieldError::io(&self.path, e)),
        };
        let mut records = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some(r) => records.push(r),
                None => warn!(line = n + 1, index = %self.path.display(), "skipping malformed index line"),
            }
        }
        Ok(records)
    }

    pub fn save<'a, I>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a IntegrityRecord>,
    {
        let mut out = String::new();
        for r in records {
            let path = r.file_path.to_string_lossy();
            if path.contains('\n') || path.contains('\r') {
                warn!(path = %path, "path contains a line break; not indexed");
                continue;
            }
            out.push_str(&format_line(r));
            out.push('\n');
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ShieldError::io(parent, e))?;
            }
        }
        write_atomic(&self.path, out.as_bytes(), &CancelToken::never())
    }
}

fn format_line(r: &IntegrityRecord) -> String {
    format!(
        "{}|{}|{}|{}",
        r.file_path.to_string_lossy(),
        r.expected_hash_hex,
        r.last_checked_at.to_rfc3339(),
        r.state.as_str()
    )
}

fn parse_line(line: &str) -> Option<IntegrityRecord> {
    let (line, state) = match line.rsplit_once('|') {
        Some((rest, tail)) => match IntegrityState::parse(tail) {
            Some(state) => (rest, state),
            None => (line, IntegrityState::Ok),
        },
        None => return None,
    };
    let mut parts = line.rsplitn(3, '|');
    let checked = parts.next()?;
    let hash = parts.next()?;
    let path = parts.next()?;
    if path.is_empty() || !is_sha256_hex(hash) {
        return None;
    }
    let last_checked_at = DateTime::parse_from_rfc3339(checked)
        .ok()?
        .with_timezone(&Utc);
    let mut record = IntegrityRecord::new(PathBuf::from(path), hash.to_ascii_lowercase());
    record.last_checked_at = last_checked_at;
    record.state = state;
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HASH: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn save_then_load_keeps_paths_with_pipes() {
        let dir = tempdir().unwrap();
        let index = IntegrityIndex::new(dir.path().join("file_integrity.dat"));
        let mut rec = IntegrityRecord::new(PathBuf::from("/docs/a|b.pdf"), HASH.into());
        rec.state = IntegrityState::Violated;
        index.save([&rec]).unwrap();

        let loaded = index.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].file_path, PathBuf::from("/docs/a|b.pdf"));
        assert_eq!(loaded[0].expected_hash_hex, HASH);
        assert_eq!(loaded[0].state, IntegrityState::Violated);
        assert_eq!(
            loaded[0].last_checked_at.timestamp(),
            rec.last_checked_at.timestamp()
        );
    }

    #[test]
    fn lines_without_state_load_as_ok() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file_integrity.dat");
        let content = format!(
            "/a|b.txt|{HASH}|2024-01-01T00:00:00+00:00\n/c.txt|{HASH}|2024-01-01T00:00:00+00:00|quarantined\n"
        );
        fs::write(&path, content).unwrap();

        let loaded = IntegrityIndex::new(&path).load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].file_path, PathBuf::from("/a|b.txt"));
        assert_eq!(loaded[0].state, IntegrityState::Ok);
        assert_eq!(loaded[1].file_path, PathBuf::from("/c.txt"));
        assert_eq!(loaded[1].state, IntegrityState::Quarantined);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file_integrity.dat");
        let good = format!("/a.txt|{}|2024-01-01T00:00:00+00:00", HASH.to_uppercase());
        let content = format!("garbage\n/b.txt|nothex|2024-01-01T00:00:00+00:00\n{good}\n/c.txt|{HASH}|yesterday\n");
        fs::write(&path, content).unwrap();

        let loaded = IntegrityIndex::new(&path).load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].file_path, PathBuf::from("/a.txt"));
        assert_eq!(loaded[0].expected_hash_hex, HASH);
    }

    #[test]
    fn missing_index_is_empty() {
        let dir = tempdir().unwrap();
        let index = IntegrityIndex::new(dir.path().join("none.dat"));
        assert!(index.load().unwrap().is_empty());
    }
}
