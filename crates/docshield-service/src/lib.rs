//! Docshield integrity service: file integrity monitoring, heuristic file
//! analysis and quarantine.

pub mod enforcement;
pub mod integrity;

pub use enforcement::quarantine::{QuarantineEntry, QuarantineStore};
pub use integrity::monitor::{IntegrityMonitor, MonitorHandle, MonitorStatus, ScanReport, SecurityAlert};
pub use integrity::record::{IntegrityRecord, IntegrityState};
