use crate::error::{Result, ShieldError};
use crate::fsutil::write_atomic;
use crate::kdf::KdfParams;
use crate::task::CancelToken;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Rasterization floor for redacted pages.
pub const MIN_REDACTION_DPI: u32 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionSettings {
    pub enabled: bool,
    pub realtime_enabled: bool,
    #[serde(default = "default_true")]
    pub heuristic_scanning: bool,
    pub scan_interval_secs: u64,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_heuristic_interval")]
    pub heuristic_interval_secs: u64,
}

impl Default for ProtectionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            realtime_enabled: true,
            heuristic_scanning: true,
            scan_interval_secs: 300,
            initial_delay_secs: default_initial_delay(),
            heuristic_interval_secs: default_heuristic_interval(),
        }
    }
}

impl ProtectionSettings {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn heuristic_interval(&self) -> Duration {
        Duration::from_secs(self.heuristic_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptoSettings {
    #[serde(default)]
    pub kdf: KdfParams,
}

/// Fixed-pitch layout assumed when a page has no glyph positions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HeuristicMetrics {
    pub line_height: f32,
    pub char_width: f32,
    pub margin_left: f32,
    pub margin_top: f32,
}

impl Default for HeuristicMetrics {
    fn default() -> Self {
        Self {
            line_height: 14.0,
            char_width: 7.2,
            margin_left: 72.0,
            margin_top: 72.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionSettings {
    pub dpi: u32,
    pub mask_color: [u8; 4],
    #[serde(default)]
    pub heuristic: HeuristicMetrics,
}

impl Default for RedactionSettings {
    fn default() -> Self {
        Self {
            dpi: MIN_REDACTION_DPI,
            mask_color: [0, 0, 0, 255],
            heuristic: HeuristicMetrics::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSettings {
    pub tool: PathBuf,
    pub key_bits: u32,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            tool: PathBuf::from("qpdf"),
            key_bits: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogSettings {
    pub max_bytes: u64,
}

impl Default for EventLogSettings {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldSettings {
    pub protection: ProtectionSettings,
    #[serde(default)]
    pub crypto: CryptoSettings,
    #[serde(default)]
    pub redaction: RedactionSettings,
    #[serde(default)]
    pub container: ContainerSettings,
    #[serde(default)]
    pub event_log: EventLogSettings,
}

fn default_true() -> bool {
    true
}

fn default_initial_delay() -> u64 {
    30
}

fn default_heuristic_interval() -> u64 {
    1800
}

impl Default for ShieldSettings {
    fn default() -> Self {
        Self {
            protection: ProtectionSettings::default(),
            crypto: CryptoSettings::default(),
            redaction: RedactionSettings::default(),
            container: ContainerSettings::default(),
            event_log: EventLogSettings::default(),
        }
    }
}

impl ShieldSettings {
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read(path).map_err(|e| ShieldError::io(path, e))?;
        let settings: ShieldSettings = serde_json::from_slice(&data)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let data = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &data, &CancelToken::never())
    }

    pub fn validate(&self) -> Result<()> {
        if self.protection.scan_interval_secs == 0 {
            return Err(ShieldError::Config("scan interval must be positive".into()));
        }
        if self.protection.heuristic_interval_secs == 0 {
            return Err(ShieldError::Config(
                "heuristic interval must be positive".into(),
            ));
        }
        self.crypto.kdf.validate()?;
        if self.redaction.dpi < MIN_REDACTION_DPI {
            return Err(ShieldError::Config(format!(
                "redaction dpi must be at least {MIN_REDACTION_DPI}"
            )));
        }
        if self.redaction.mask_color[3] != 255 {
            return Err(ShieldError::Config("redaction mask must be opaque".into()));
        }
        let h = &self.redaction.heuristic;
        if !(h.line_height > 0.0 && h.char_width > 0.0) {
            return Err(ShieldError::Config(
                "heuristic line height and char width must be positive".into(),
            ));
        }
        if self.container.key_bits != 128 && self.container.key_bits != 256 {
            return Err(ShieldError::Config("container key bits must be 128 or 256".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let s = ShieldSettings::default();
        s.validate().unwrap();
        assert_eq!(s.protection.scan_interval(), Duration::from_secs(300));
        assert!(s.protection.realtime_enabled);
    }

    #[test]
    fn missing_file_gives_defaults_and_save_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut s = ShieldSettings::load_or_default(&path).unwrap();
        s.protection.realtime_enabled = false;
        s.redaction.dpi = 600;
        s.save(&path).unwrap();
        let loaded = ShieldSettings::load_or_default(&path).unwrap();
        assert!(!loaded.protection.realtime_enabled);
        assert_eq!(loaded.redaction.dpi, 600);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"protection":{"enabled":true,"realtime_enabled":false,"scan_interval_secs":60}}"#,
        )
        .unwrap();
        let s = ShieldSettings::load_or_default(&path).unwrap();
        assert_eq!(s.protection.initial_delay_secs, 30);
        assert_eq!(s.redaction.dpi, MIN_REDACTION_DPI);
    }

    #[test]
    fn rejects_low_dpi_and_translucent_mask() {
        let mut s = ShieldSettings::default();
        s.redaction.dpi = 150;
        assert!(matches!(s.validate(), Err(ShieldError::Config(_))));
        let mut s = ShieldSettings::default();
        s.redaction.mask_color = [0, 0, 0, 128];
        assert!(matches!(s.validate(), Err(ShieldError::Config(_))));
    }
}
