//! Server plumbing: state, errors and tracing setup.

pub mod app_state;
pub mod errors;
pub mod telemetry;
