//! Docshield core library
//!
//! Password-based file encryption, irreversible raster redaction and the
//! shared plumbing (settings, paths, security event log, cancellation) used
//! by the integrity service.

pub mod container;
pub mod crypto;
pub mod error;
pub mod event_log;
pub mod fsutil;
pub mod kdf;
pub mod paths;
pub mod payload;
pub mod redaction;
pub mod settings;
pub mod task;

pub use crypto::CryptoEngine;
pub use error::{Result, ShieldError};
pub use event_log::{EventSeverity, SecurityEventKind, SecurityEventLog};
pub use kdf::{derive_key, DerivedKey, KdfParams};
pub use payload::EncryptedPayload;
pub use redaction::{PageRasterAdapter, RedactionEngine};
pub use settings::ShieldSettings;
pub use task::{cancel_pair, CancelHandle, CancelToken};
