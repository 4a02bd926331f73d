//! Content heuristics for registered files: executable magic bytes, script
//! prefixes and high entropy. Findings are reported, never acted on.

use docshield_core::{Result, ShieldError};
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const SAMPLE_BYTES: usize = 64 * 1024;
const ENTROPY_MIN_LEN: u64 = 1024;
const ENTROPY_THRESHOLD: f64 = 7.5;

const MAGIC: &[(&[u8], &str)] = &[
    (b"MZ", "Windows executable (PE)"),
    (b"\x7fELF", "ELF binary"),
    (b"\xca\xfe\xba\xbe", "Java class or Mach-O universal binary"),
    (b"\xfe\xed\xfa\xce", "Mach-O binary"),
    (b"\xfe\xed\xfa\xcf", "Mach-O binary"),
    (b"\xce\xfa\xed\xfe", "Mach-O binary"),
    (b"\xcf\xfa\xed\xfe", "Mach-O binary"),
];

const SCRIPT_PREFIXES: &[(&[u8], &str)] = &[
    (b"#!", "shebang script"),
    (b"<?php", "PHP script"),
    (b"<?=", "PHP script"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "finding", rename_all = "snake_case")]
pub enum Finding {
    ExecutableMagic { format: &'static str },
    Script { kind: &'static str },
    HighEntropy { bits_per_byte: f64 },
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Finding::ExecutableMagic { format } => write!(f, "{format} detected"),
            Finding::Script { kind } => write!(f, "{kind} detected"),
            Finding::HighEntropy { bits_per_byte } => write!(
                f,
                "high entropy: {bits_per_byte:.2} (possible encrypted/packed content)"
            ),
        }
    }
}

/// Shannon entropy in bits per byte (0.0 = constant, 8.0 = max random).
pub fn calculate_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }
    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in &counts {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * p.log2();
        }
    }
    entropy
}

/// Inspect the leading sample of a file. `total_len` is the full file size.
pub fn analyze_sample(sample: &[u8], total_len: u64) -> Vec<Finding> {
    let mut findings = Vec::new();
    if let Some(&(_, format)) = MAGIC.iter().find(|(m, _)| sample.starts_with(m)) {
        findings.push(Finding::ExecutableMagic { format });
    }
    if let Some(&(_, kind)) = SCRIPT_PREFIXES.iter().find(|(p, _)| sample.starts_with(p)) {
        findings.push(Finding::Script { kind });
    }
    if total_len >= ENTROPY_MIN_LEN {
        let sample = &sample[..sample.len().min(SAMPLE_BYTES)];
        let bits_per_byte = calculate_entropy(sample);
        if bits_per_byte > ENTROPY_THRESHOLD {
            findings.push(Finding::HighEntropy { bits_per_byte });
        }
    }
    findings
}

pub fn analyze_file(path: &Path) -> Result<Vec<Finding>> {
    let file = File::open(path).map_err(|e| ShieldError::io(path, e))?;
    let total_len = file
        .metadata()
        .map_err(|e| ShieldError::io(path, e))?
        .len();
    let mut sample = Vec::with_capacity(SAMPLE_BYTES);
    file.take(SAMPLE_BYTES as u64)
        .read_to_end(&mut sample)
        .map_err(|e| ShieldError::io(path, e))?;
    Ok(analyze_sample(&sample, total_len))
}
