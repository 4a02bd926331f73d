//! Password protection of the document container, delegated to an external
//! qpdf-compatible tool. Only the exit status is interpreted.

use crate::error::{Result, ShieldError};
use crate::fsutil::persist_atomic;
use crate::settings::ContainerSettings;
use crate::task::CancelToken;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerPermissions {
    pub allow_print: bool,
    pub allow_modify: bool,
    pub allow_extract: bool,
}

impl Default for ContainerPermissions {
    fn default() -> Self {
        Self {
            allow_print: true,
            allow_modify: false,
            allow_extract: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerProtector {
    tool: PathBuf,
    key_bits: u32,
}

impl ContainerProtector {
    pub fn new(settings: &ContainerSettings) -> Self {
        Self {
            tool: settings.tool.clone(),
            key_bits: settings.key_bits,
        }
    }

    pub fn build_args(
        &self,
        input: &Path,
        output: &Path,
        user_password: &str,
        owner_password: &str,
        permissions: ContainerPermissions,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--encrypt".into(),
            user_password.into(),
            owner_password.into(),
            self.key_bits.to_string().into(),
        ];
        if !permissions.allow_print {
            args.push("--print=none".into());
        }
        if !permissions.allow_modify {
            args.push("--modify=none".into());
        }
        if !permissions.allow_extract {
            args.push("--extract=n".into());
        }
        args.push("--".into());
        args.push(input.into());
        args.push(output.into());
        args
    }

    pub fn protect(
        &self,
        input: &Path,
        output: &Path,
        user_password: &str,
        owner_password: &str,
        permissions: ContainerPermissions,
    ) -> Result<()> {
        if owner_password.trim().is_empty() {
            return Err(ShieldError::InvalidInput("owner password must not be empty".into()));
        }
        if !input.exists() {
            return Err(ShieldError::FileNotFound(input.to_path_buf()));
        }
        persist_atomic(output, &CancelToken::never(), |tmp| {
            let args = self.build_args(input, tmp, user_password, owner_password, permissions);
            let status = Command::new(&self.tool).args(&args).status().map_err(|e| {
                ShieldError::ExternalTool(format!("spawn {}: {e}", self.tool.display()))
            })?;
            if status.success() {
                Ok(())
            } else {
                warn!(tool = %self.tool.display(), status = %status, "container protection failed");
                Err(ShieldError::ExternalTool(format!(
                    "{} exited with {status}",
                    self.tool.display()
                )))
            }
        })?;
        info!(output = %output.display(), "container password protection applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn protector(tool: &str) -> ContainerProtector {
        ContainerProtector::new(&ContainerSettings {
            tool: PathBuf::from(tool),
            key_bits: 256,
        })
    }

    #[test]
    fn args_follow_encrypt_syntax() {
        let args = protector("qpdf").build_args(
            Path::new("in.pdf"),
            Path::new("out.pdf"),
            "user",
            "owner",
            ContainerPermissions::default(),
        );
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--encrypt",
                "user",
                "owner",
                "256",
                "--modify=none",
                "--extract=n",
                "--",
                "in.pdf",
                "out.pdf"
            ]
        );
    }

    #[test]
    fn missing_tool_is_external_failure_without_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        std::fs::write(&input, b"%PDF-1.7").unwrap();
        let err = protector("/nonexistent/docshield-test-tool")
            .protect(&input, &output, "u", "o", ContainerPermissions::default())
            .unwrap_err();
        assert!(matches!(err, ShieldError::ExternalTool(_)));
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_failure() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        std::fs::write(&input, b"%PDF-1.7").unwrap();
        let err = protector("false")
            .protect(&input, &output, "u", "o", ContainerPermissions::default())
            .unwrap_err();
        assert!(matches!(err, ShieldError::ExternalTool(_)));
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn zero_exit_persists_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        std::fs::write(&input, b"%PDF-1.7").unwrap();
        protector("true")
            .protect(&input, &output, "u", "o", ContainerPermissions::default())
            .unwrap();
        assert!(output.exists());
    }
}
