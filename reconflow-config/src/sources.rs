//! Raw configuration inputs: the TOML file shape and the `RECONFLOW_*`
//! environment variables.

use std::env;
use std::path::PathBuf;

use reconflow_core::{EngineConfig, PipelineSettings};
use serde::Deserialize;

use crate::models::ServerConfig;
use crate::util::non_empty;

/// Raw values gathered from the process environment. Nothing is parsed
/// here so the loader can report which variable was malformed.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    /// `RECONFLOW_CONFIG`
    pub config_path: Option<PathBuf>,
    /// `RECONFLOW_PIPELINE_JSON`
    pub pipeline_json: Option<String>,
    /// `RECONFLOW_HOST`
    pub host: Option<String>,
    /// `RECONFLOW_PORT`
    pub port: Option<String>,
    /// `RECONFLOW_OUTPUT_ROOT`
    pub output_root: Option<PathBuf>,
    /// `RECONFLOW_LOG_DIR`
    pub log_dir: Option<PathBuf>,
    /// `RECONFLOW_MODE`
    pub mode: Option<String>,
    /// `RECONFLOW_MAX_PARALLEL_STAGES`
    pub max_parallel_stages: Option<String>,
}

impl EnvConfig {
    /// Reads every recognised variable. Empty values count as unset.
    pub fn gather() -> Self {
        let var = |name: &str| non_empty(env::var(name).ok());
        Self {
            config_path: var("RECONFLOW_CONFIG").map(PathBuf::from),
            pipeline_json: var("RECONFLOW_PIPELINE_JSON"),
            host: var("RECONFLOW_HOST"),
            port: var("RECONFLOW_PORT"),
            output_root: var("RECONFLOW_OUTPUT_ROOT").map(PathBuf::from),
            log_dir: var("RECONFLOW_LOG_DIR").map(PathBuf::from),
            mode: var("RECONFLOW_MODE"),
            max_parallel_stages: var("RECONFLOW_MAX_PARALLEL_STAGES"),
        }
    }
}

/// Shape of `reconflow.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// `[server]`
    pub server: ServerConfig,
    /// `[engine]`
    pub engine: EngineConfig,
    /// `[pipeline]`
    pub pipeline: PipelineSettings,
}
