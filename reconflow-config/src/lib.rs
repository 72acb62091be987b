//! Layered configuration for reconflow.
//!
//! [`ConfigLoader`] reads an optional `.env`, a `reconflow.toml`, the inline
//! `RECONFLOW_PIPELINE_JSON` and the `RECONFLOW_*` overrides, then validates
//! the result once.

pub mod loader;
pub mod models;
pub mod sources;
mod util;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::{Config, ConfigMetadata, ServerConfig};
pub use sources::{EnvConfig, FileConfig};
