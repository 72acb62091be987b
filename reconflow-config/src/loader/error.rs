//! Errors raised while loading configuration.

use std::path::PathBuf;

use reconflow_core::ReconError;
use thiserror::Error;

/// Why a configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// An explicitly requested file does not exist.
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    /// The file exists but could not be read.
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// `RECONFLOW_PIPELINE_JSON` did not parse.
    #[error("failed to parse RECONFLOW_PIPELINE_JSON")]
    Json {
        #[source]
        source: serde_json::Error,
    },
    /// An override variable held a malformed value.
    #[error("invalid value for {var}: {message}")]
    Env { var: &'static str, message: String },
    /// The merged configuration failed validation.
    #[error(transparent)]
    Invalid(#[from] ReconError),
    /// The `.env` file could not be parsed.
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
