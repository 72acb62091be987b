//! Shared handler state.

use std::sync::Arc;

use reconflow_config::Config;
use reconflow_core::{LocalArtifactStore, ReconPipelinePlanner, ScanRegistry};

/// Shared handler state. The registry is the only owner of scan records.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Every scan this process knows about.
    pub registry: ScanRegistry,
    /// Configuration the process started with.
    pub config: Arc<Config>,
}

impl AppState {
    /// Builds the standard recon planner and an empty registry from `config`.
    pub fn from_config(config: Config) -> reconflow_core::Result<Self> {
        let planner = ReconPipelinePlanner::new(&config.pipeline, &config.engine)?;
        let registry = ScanRegistry::new(
            config.engine.clone(),
            Arc::new(planner),
            Arc::new(LocalArtifactStore::new()),
        );
        Ok(Self::new(registry, config))
    }

    /// Wraps an existing registry, as tests do.
    pub fn new(registry: ScanRegistry, config: Config) -> Self {
        Self {
            registry,
            config: Arc::new(config),
        }
    }
}
