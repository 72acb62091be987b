//! # Reconflow Server
//!
//! HTTP binding of the scan registry: submit, poll, list and stop scans,
//! read scan logs and check which recon tools are installed.

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use infra::errors::{AppError, AppResult};
pub use routes::create_api_router;
