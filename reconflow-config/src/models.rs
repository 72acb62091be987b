//! The resolved configuration handed to the server.

use std::net::SocketAddr;
use std::path::PathBuf;

use reconflow_core::{EngineConfig, PipelineSettings};
use serde::{Deserialize, Serialize};

/// Fully resolved configuration for a reconflow process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener.
    pub server: ServerConfig,
    /// Scan execution limits and output locations.
    pub engine: EngineConfig,
    /// Scan mode and per-tool settings.
    pub pipeline: PipelineSettings,
    /// Provenance, never serialized.
    #[serde(skip)]
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Renders the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind, an IP literal or host name.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Socket address to bind, if `host` is an IP literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        format!("{}:{}", self.host, self.port).parse().ok()
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMetadata {
    /// TOML file that was read, if any.
    pub config_path: Option<PathBuf>,
    /// A `.env` file was found and loaded.
    pub env_file_loaded: bool,
    /// `[pipeline]` came from `RECONFLOW_PIPELINE_JSON`.
    pub pipeline_from_env: bool,
}
