//! Atomic output files: write next to the destination, then rename.
//!
//! A crash or cancellation never leaves a partial file under the final name.

use crate::error::{Result, ShieldError};
use crate::task::CancelToken;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempPath};

fn parent_dir(dst: &Path) -> PathBuf {
    match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn temp_path_near(dst: &Path) -> Result<TempPath> {
    let dir = parent_dir(dst);
    let file = Builder::new()
        .prefix(".docshield-")
        .suffix(".tmp")
        .tempfile_in(&dir)
        .map_err(|e| ShieldError::io(&dir, e))?;
    Ok(file.into_temp_path())
}

pub fn write_atomic(dst: &Path, bytes: &[u8], cancel: &CancelToken) -> Result<()> {
    let dir = parent_dir(dst);
    let mut file = Builder::new()
        .prefix(".docshield-")
        .suffix(".tmp")
        .tempfile_in(&dir)
        .map_err(|e| ShieldError::io(&dir, e))?;
    file.write_all(bytes)
        .and_then(|_| file.as_file().sync_all())
        .map_err(|e| ShieldError::io(file.path(), e))?;
    // dropping the temp file removes it
    cancel.check()?;
    file.persist(dst).map_err(|e| ShieldError::io(dst, e.error))?;
    Ok(())
}

/// Let `produce` write a complete file at a temporary path, then move it to `dst`.
pub fn persist_atomic<F>(dst: &Path, cancel: &CancelToken, produce: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let tmp = temp_path_near(dst)?;
    produce(&tmp)?;
    cancel.check()?;
    tmp.persist(dst).map_err(|e| ShieldError::io(dst, e.error))?;
    Ok(())
}
