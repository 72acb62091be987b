//! Scan lifecycle: the registry that owns scans and the status model it
//! exposes.

mod registry;
pub mod status;

pub use registry::ScanRegistry;
pub use status::{
    RunningScan, ScanFailure, ScanResult, ScanSnapshot, ScanStatus, StageRecord, StageState,
    TerminalStatus,
};
