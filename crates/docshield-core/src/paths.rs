use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use crate::error::{Result, ShieldError};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "docshield";
pub const APP_NAME: &str = "docshield";
pub const DATA_DIR_ENV: &str = "DOCSHIELD_DATA_DIR";

pub const SECURITY_LOG_FILE: &str = "security.log";
pub const INTEGRITY_INDEX_FILE: &str = "file_integrity.dat";
pub const SETTINGS_FILE: &str = "settings.json";

pub fn data_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| ShieldError::Config("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Layout of everything docshield keeps under one data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(data_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn security_log_path(&self) -> PathBuf {
        self.log_dir().join(SECURITY_LOG_FILE)
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join("quarantine")
    }

    pub fn integrity_index_path(&self) -> PathBuf {
        self.root.join(INTEGRITY_INDEX_FILE)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [self.root.clone(), self.log_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| ShieldError::io(&dir, e))?;
        }
        Ok(())
    }
}
