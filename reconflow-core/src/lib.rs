//! # Reconflow Core
//!
//! Scan orchestration engine for multi-stage reconnaissance. It drives
//! external command-line tools against a domain or a list of domains,
//! derives filtered inputs for later stages and exposes live status to
//! pollers.
//!
//! ## Architecture
//!
//! - [`process`]: runs one external command with output capture and
//!   two-phase cancellation (SIGTERM, grace period, SIGKILL).
//! - [`stage`]: the stage contract. A stage declares the artifacts it needs
//!   and produces; [`stage::ToolStage`] wraps an external tool.
//! - [`pipeline`]: validates a set of stages into a dependency graph and runs
//!   it with bounded parallelism. [`pipeline::ReconPipelinePlanner`] builds
//!   the standard recon flow.
//! - [`scan`]: the [`scan::ScanRegistry`] that owns every scan and the
//!   status model pollers read.
//! - [`tools`]: command lines for the supported recon tools.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use reconflow_core::{
//!     EngineConfig, LocalArtifactStore, PipelineSettings, ReconPipelinePlanner, ScanRegistry,
//!     Target,
//! };
//!
//! async fn scan_example() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = EngineConfig::default();
//!     let planner = ReconPipelinePlanner::new(&PipelineSettings::default(), &engine)?;
//!     let registry = ScanRegistry::new(
//!         engine,
//!         Arc::new(planner),
//!         Arc::new(LocalArtifactStore::new()),
//!     );
//!
//!     let scan_id = registry
//!         .submit(Target::domain("example.com")?, Path::new("output"))
//!         .await?;
//!     let finished = registry.wait(scan_id).await?;
//!     println!("{scan_id}: {}", finished.status.as_str());
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod ids;
pub mod pipeline;
pub mod process;
pub mod scan;
pub mod stage;
pub mod target;
pub mod tools;

pub use artifact::{Artifact, ArtifactLayout, ArtifactStore, LocalArtifactStore};
pub use config::{EngineConfig, PipelineSettings, ScanMode, StagePolicy, ToolKind, ToolSettings};
pub use error::{LaunchError, PipelineError, ReconError, Result, ScanControlError};
pub use ids::ScanId;
pub use pipeline::{
    Pipeline, PipelineObserver, PipelinePlanner, PipelineReport, ReconPipelinePlanner,
};
pub use process::{Invocation, ProcessOutcome, ProcessRunner, ScanLog};
pub use scan::{RunningScan, ScanRegistry, ScanSnapshot, ScanStatus, StageRecord, StageState};
pub use stage::{Stage, StageDescriptor, StageKind, StageOutcome, StageResult, ToolSpec, ToolStage};
pub use target::{Target, TargetKind};
