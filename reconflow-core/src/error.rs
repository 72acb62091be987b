//! Error types of the engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::ids::ScanId;

/// Errors of the engine outside the scan control API.
#[derive(Error, Debug)]
pub enum ReconError {
    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A tool could not be started.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// A pipeline broke one of its construction rules.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Settings that fail validation or parsing.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias over [`ReconError`].
pub type Result<T> = std::result::Result<T, ReconError>;

/// Failure to start an external tool. Recorded against the stage, never
/// fatal to the scan on its own.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The invocation has no program.
    #[error("empty command line")]
    EmptyCommand,

    /// Not on `PATH` and not a path to a file.
    #[error("executable `{program}` not found")]
    NotFound { program: String },

    /// Found but lacking execute permission.
    #[error("executable `{program}` is not executable")]
    NotExecutable { program: String },

    /// Any other spawn failure.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The stdin file could not be opened.
    #[error("failed to open stdin file {path}: {source}")]
    Stdin {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    pub(crate) fn from_spawn(program: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => LaunchError::NotFound {
                program: program.to_string(),
            },
            io::ErrorKind::PermissionDenied => LaunchError::NotExecutable {
                program: program.to_string(),
            },
            _ => LaunchError::Spawn {
                program: program.to_string(),
                source,
            },
        }
    }
}

/// Invariant violations of a pipeline, either at construction or while
/// preparing the output tree.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage with an empty name.
    #[error("stage name must not be empty")]
    EmptyStageName,

    /// Two stages share a name.
    #[error("duplicate stage `{0}`")]
    DuplicateStage(String),

    /// One artifact has two producers.
    #[error("artifact `{artifact}` is produced by both `{first}` and `{second}`")]
    DuplicateProducer {
        artifact: String,
        first: String,
        second: String,
    },

    /// Stages that depend on each other, in no particular order.
    #[error("dependency cycle between stages: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// A content or vulnerability stage reads something other than alive hosts or URLs.
    #[error("stage `{stage}` consumes `{artifact}`, which is not an alive-filtered artifact")]
    UngatedInput { stage: String, artifact: String },

    /// `max_parallel` of zero.
    #[error("max parallel stages must be at least 1")]
    InvalidConcurrency,

    /// The target directory or a stale artifact could not be prepared.
    #[error("cannot prepare output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Request validation errors returned synchronously by the scan registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanControlError {
    /// No scan with this id is registered.
    #[error("scan {0} not found")]
    NotFound(ScanId),

    /// Malformed domain, or a domain list that cannot be read.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Another live scan writes to the same target directory.
    #[error("scan {scan_id} is already active for {}", target_dir.display())]
    DuplicateActiveScan { scan_id: ScanId, target_dir: PathBuf },

    /// The planner rejected the pipeline.
    #[error("cannot plan pipeline: {0}")]
    Pipeline(String),
}

impl From<PipelineError> for ScanControlError {
    fn from(err: PipelineError) -> Self {
        ScanControlError::Pipeline(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_errors_are_classified_by_kind() {
        let missing =
            LaunchError::from_spawn("subfinder", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(missing, LaunchError::NotFound { .. }));
        assert_eq!(ReconError::from(missing).to_string(), "executable `subfinder` not found");

        let denied =
            LaunchError::from_spawn("httpx", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(denied, LaunchError::NotExecutable { .. }));

        let other = LaunchError::from_spawn("nuclei", io::Error::other("boom"));
        assert!(matches!(other, LaunchError::Spawn { .. }));
    }

    #[test]
    fn pipeline_errors_surface_as_control_errors() {
        let err = ScanControlError::from(PipelineError::DuplicateStage("httpx".into()));
        assert_eq!(err.to_string(), "cannot plan pipeline: duplicate stage `httpx`");
    }
}
