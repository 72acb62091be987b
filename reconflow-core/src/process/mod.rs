//! External process execution and the per-scan log it writes to.

pub mod log;
pub mod runner;

pub use log::{LineRing, LogSink, ScanLog};
pub use runner::{Invocation, NoopHooks, ProcessHooks, ProcessOutcome, ProcessRunner, StdoutSink};
