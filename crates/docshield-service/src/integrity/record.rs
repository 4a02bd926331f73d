use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-path integrity state.
///
/// `Ok → Violated → Quarantined` and `Ok → Missing → Quarantined`; nothing
/// moves back to `Ok` except a fresh registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityState {
    Ok,
    Violated,
    Missing,
    Quarantined,
}

impl IntegrityState {
    pub fn can_transition_to(self, next: IntegrityState) -> bool {
        use IntegrityState::*;
        matches!(
            (self, next),
            (Ok, Violated) | (Ok, Missing) | (Violated, Quarantined) | (Missing, Quarantined)
        )
    }

    /// Violated or missing files still waiting to be quarantined.
    pub fn awaiting_quarantine(self) -> bool {
        matches!(self, IntegrityState::Violated | IntegrityState::Missing)
    }
}

impl IntegrityState {
    pub fn as_str(self) -> &'static str {
        match self {
            IntegrityState::Ok => "ok",
            IntegrityState::Violated => "violated",
            IntegrityState::Missing => "missing",
            IntegrityState::Quarantined => "quarantined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(IntegrityState::Ok),
            "violated" => Some(IntegrityState::Violated),
            "missing" => Some(IntegrityState::Missing),
            "quarantined" => Some(IntegrityState::Quarantined),
            _ => None,
        }
    }
}

impl std::fmt::Display for IntegrityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityRecord {
    pub file_path: PathBuf,
    pub expected_hash_hex: String,
    pub last_checked_at: DateTime<Utc>,
    pub state: IntegrityState,
}

impl IntegrityRecord {
    pub fn new(file_path: PathBuf, expected_hash_hex: String) -> Self {
        Self {
            file_path,
            expected_hash_hex,
            last_checked_at: Utc::now(),
            state: IntegrityState::Ok,
        }
    }

    /// Apply `next` if the state machine allows it. Returns whether the state changed.
    pub(crate) fn transition(&mut self, next: IntegrityState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}
