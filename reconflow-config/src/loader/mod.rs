//! Layered configuration loading.

pub mod error;

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use reconflow_core::{PipelineSettings, ReconError, ScanMode};
use tracing::debug;

pub use error::ConfigLoadError;

use crate::models::{Config, ConfigMetadata};
use crate::sources::{EnvConfig, FileConfig};
use crate::util::parse_var;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("reconflow.toml"),
        PathBuf::from("config/reconflow.toml"),
    ]
});

/// Explicit paths, each overriding its discovery rule.
#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    /// TOML file to read instead of the search path.
    pub config_path: Option<PathBuf>,
    /// `.env` file to load instead of the one in the working directory.
    pub env_file: Option<PathBuf>,
}

/// Builds a [`Config`] from, lowest priority first: built-in defaults, a
/// TOML file, `RECONFLOW_PIPELINE_JSON` and the `RECONFLOW_*` overrides.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

/// Result of a load: the validated configuration plus anything the
/// operator should hear about.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    /// Validated configuration.
    pub config: Config,
    /// Non-fatal notes, such as falling back to built-in defaults.
    pub warnings: Vec<String>,
}

impl ConfigLoader {
    /// Loader with the default search rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader with every explicit path set at once.
    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    /// Reads `path` and fails if it is missing.
    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    /// Loads `path` instead of `./.env`.
    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads `.env` into the process environment, then composes the
    /// configuration from the environment.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = self.load_env_file()?;
        let mut load = self.load_from_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Composes the configuration from already gathered environment values.
    pub fn load_from_env(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = Vec::new();

        let (file, config_path) = match self.resolve_path(&env) {
            Some((path, required)) => match read_file(&path, required)? {
                Some(file) => (file, Some(path)),
                None => (FileConfig::default(), None),
            },
            None => (FileConfig::default(), None),
        };
        if config_path.is_none() {
            warnings.push("no reconflow.toml found; using built-in defaults".to_string());
        }

        let FileConfig {
            server,
            engine,
            pipeline,
        } = file;
        let mut config = Config {
            server,
            engine,
            pipeline,
            metadata: ConfigMetadata {
                config_path,
                ..ConfigMetadata::default()
            },
        };

        if let Some(json) = env.pipeline_json.as_deref() {
            config.pipeline = serde_json::from_str::<PipelineSettings>(json)
                .map_err(|source| ConfigLoadError::Json { source })?;
            config.metadata.pipeline_from_env = true;
            if config.metadata.config_path.is_some() {
                warnings.push(
                    "RECONFLOW_PIPELINE_JSON replaces the [pipeline] section of the config file"
                        .to_string(),
                );
            }
        }

        apply_env_overrides(&mut config, &env)?;
        validate(&config)?;

        debug!(
            config_path = ?config.metadata.config_path,
            mode = %config.pipeline.mode,
            "configuration loaded"
        );
        Ok(ConfigLoad { config, warnings })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        match loaded {
            Ok(loaded) => Ok(loaded),
            Err(dotenvy::Error::Io(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Path to read and whether it must exist.
    fn resolve_path(&self, env: &EnvConfig) -> Option<(PathBuf, bool)> {
        if let Some(explicit) = &self.options.config_path {
            return Some((explicit.clone(), true));
        }
        if let Some(from_env) = &env.config_path {
            return Some((from_env.clone(), true));
        }
        DEFAULT_CONFIG_LOCATIONS
            .iter()
            .find(|candidate| candidate.exists())
            .map(|path| (path.clone(), false))
    }
}

fn read_file(path: &Path, required: bool) -> Result<Option<FileConfig>, ConfigLoadError> {
    if !path.exists() {
        if required {
            return Err(ConfigLoadError::MissingConfig {
                path: path.to_path_buf(),
            });
        }
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file = toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(file))
}

fn apply_env_overrides(config: &mut Config, env: &EnvConfig) -> Result<(), ConfigLoadError> {
    if let Some(host) = &env.host {
        config.server.host = host.trim().to_string();
    }
    if let Some(port) = parse_var::<u16>("RECONFLOW_PORT", env.port.as_deref())? {
        config.server.port = port;
    }
    if let Some(root) = &env.output_root {
        config.engine.output_root = root.clone();
    }
    if let Some(dir) = &env.log_dir {
        config.engine.log_dir = Some(dir.clone());
    }
    if let Some(mode) = parse_var::<ScanMode>("RECONFLOW_MODE", env.mode.as_deref())? {
        config.pipeline.mode = mode;
    }
    if let Some(max) = parse_var::<usize>(
        "RECONFLOW_MAX_PARALLEL_STAGES",
        env.max_parallel_stages.as_deref(),
    )? {
        config.engine.max_parallel_stages = max;
    }
    Ok(())
}

fn validate(config: &Config) -> Result<(), ConfigLoadError> {
    if config.server.host.is_empty() {
        return Err(ReconError::InvalidConfig("server.host must not be empty".to_string()).into());
    }
    config.engine.validate()?;
    config.pipeline.validate()?;
    Ok(())
}
