//! The stage contract: a named unit of work with declared input and output
//! artifacts.

mod tool;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::artifact::{Artifact, ArtifactStore};
use crate::config::StagePolicy;
use crate::ids::ScanId;
use crate::process::{LogSink, ProcessHooks, ProcessOutcome, ProcessRunner, ScanLog};
use crate::target::Target;

pub use tool::{ToolSpec, ToolStage};

/// Role of a stage in the recon flow. Used for the alive gate: content and
/// vulnerability stages may only consume alive-filtered artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Subdomain enumeration.
    Discovery,
    /// Pure derivation of one artifact from others.
    Transform,
    /// Probing which hosts answer.
    AliveCheck,
    /// Extracting alive hosts and URLs from the probe output.
    AliveFilter,
    /// Crawling, fuzzing and archive lookups against alive targets.
    ContentDiscovery,
    /// Port scanning of alive hosts.
    PortScan,
    /// Cloud resource enumeration.
    Cloud,
    /// Vulnerability scanning.
    VulnScan,
    /// Anything else; not subject to the alive gate.
    Auxiliary,
}

impl StageKind {
    /// Whether stages of this kind may only read alive-filtered artifacts.
    pub fn requires_alive_input(&self) -> bool {
        matches!(self, StageKind::ContentDiscovery | StageKind::VulnScan)
    }
}

/// When a stage may run given the state of its required inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPolicy {
    /// Every required input must be populated.
    AllNonEmpty,
    /// At least one required input must be populated.
    AnyNonEmpty,
    /// Never skipped on input grounds. Used by transforms that must still
    /// emit an (empty) artifact.
    Always,
}

/// How often a failing stage is attempted, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least 1.
    pub max_attempts: u32,
    /// Wait between a failure and the next attempt. Cancellation cuts it short.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Static declaration of a stage: identity, inputs, outputs and scheduling.
#[derive(Debug, Clone)]
pub struct StageDescriptor {
    /// Unique within a pipeline.
    pub name: String,
    /// Role in the recon flow.
    pub kind: StageKind,
    /// Artifacts read by the stage. Their producers become dependencies.
    pub requires: Vec<Artifact>,
    /// When the stage is skipped for lack of input.
    pub input_policy: InputPolicy,
    /// Artifacts written by the stage. Each has exactly one producer.
    pub produces: Vec<Artifact>,
    /// Disabled stages report `Skipped` without running.
    pub enabled: bool,
    /// A failure skips every stage downstream and ends the scan in `error`.
    pub blocking: bool,
    /// Attempts and backoff on failure.
    pub retry: RetryPolicy,
}

impl StageDescriptor {
    /// Enabled, non-blocking, single attempt, no inputs or outputs.
    pub fn new(name: impl Into<String>, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            kind,
            requires: Vec::new(),
            input_policy: InputPolicy::AllNonEmpty,
            produces: Vec::new(),
            enabled: true,
            blocking: false,
            retry: RetryPolicy::default(),
        }
    }

    /// Adds required inputs.
    pub fn requires(mut self, inputs: impl IntoIterator<Item = Artifact>) -> Self {
        self.requires.extend(inputs);
        self
    }

    /// Adds produced artifacts.
    pub fn produces(mut self, outputs: impl IntoIterator<Item = Artifact>) -> Self {
        self.produces.extend(outputs);
        self
    }

    /// Sets the input policy.
    pub fn input_policy(mut self, policy: InputPolicy) -> Self {
        self.input_policy = policy;
        self
    }

    /// Marks the stage as gating its dependents.
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Turns the stage on or off.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Applies configured policy on top of the built-in declaration.
    pub fn with_policy(mut self, policy: &StagePolicy) -> Self {
        self.enabled = policy.enabled;
        if let Some(blocking) = policy.blocking {
            self.blocking = blocking;
        }
        self.retry = RetryPolicy {
            max_attempts: policy.max_attempts.max(1),
            backoff: Duration::from_millis(policy.retry_backoff_ms),
        };
        self
    }
}

/// How one stage execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Ran to the end.
    Completed,
    /// Tool exited non-zero, could not start, or a transform hit an I/O error.
    Failed,
    /// Preconditions not met; not an error.
    Skipped,
    /// The scan was stopped while the stage ran.
    Cancelled,
}

/// Outcome of a stage plus what its last process left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    /// How the stage ended.
    pub outcome: StageOutcome,
    /// Human readable reason for failures and skips.
    pub detail: Option<String>,
    /// Exit code of the last process, if any ran.
    pub exit_code: Option<i32>,
    /// Bounded stdout of the last process.
    pub stdout_tail: String,
    /// Bounded stderr of the last process.
    pub stderr_tail: String,
    /// Wall time of the final attempt.
    pub duration: Duration,
    /// Attempts made; 0 for skipped stages.
    pub attempts: u32,
}

impl StageResult {
    fn new(outcome: StageOutcome, detail: Option<String>) -> Self {
        Self {
            outcome,
            detail,
            exit_code: None,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            duration: Duration::ZERO,
            attempts: 1,
        }
    }

    /// Successful result with no process data.
    pub fn completed() -> Self {
        Self::new(StageOutcome::Completed, None)
    }

    /// Failed result with a reason.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self::new(StageOutcome::Failed, Some(detail.into()))
    }

    /// Skipped result with a reason and no attempts.
    pub fn skipped(detail: impl Into<String>) -> Self {
        let mut result = Self::new(StageOutcome::Skipped, Some(detail.into()));
        result.attempts = 0;
        result
    }

    /// Result of a stage interrupted by a stop request.
    pub fn cancelled() -> Self {
        Self::new(StageOutcome::Cancelled, Some("cancelled".to_string()))
    }

    /// Replaces the detail.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Records the wall time.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Copies exit code and output tails from `outcome`.
    pub fn with_process(mut self, outcome: &ProcessOutcome) -> Self {
        self.exit_code = outcome.exit_code;
        self.stdout_tail = outcome.stdout_tail.clone();
        self.stderr_tail = outcome.stderr_tail.clone();
        self
    }

    /// Whether the result has `outcome`.
    pub fn is(&self, outcome: StageOutcome) -> bool {
        self.outcome == outcome
    }
}

/// Everything a scan's stages share.
pub struct ScanContext {
    /// Scan being executed.
    pub scan_id: ScanId,
    /// What is being scanned.
    pub target: Target,
    /// `recon_<base>` directory holding every artifact.
    pub target_dir: PathBuf,
    /// Target name used in artifact file names.
    pub base_name: String,
    /// Storage for artifacts.
    pub store: Arc<dyn ArtifactStore>,
    /// Runner shared by every tool stage.
    pub runner: ProcessRunner,
    /// Fires once when the scan is asked to stop.
    pub cancel: CancellationToken,
    /// Shared scan log.
    pub log: Arc<ScanLog>,
}

impl fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanContext")
            .field("scan_id", &self.scan_id)
            .field("target", &self.target)
            .field("target_dir", &self.target_dir)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ScanContext {
    /// Where `artifact` lives for this scan.
    pub fn artifact_path(&self, artifact: &Artifact) -> PathBuf {
        artifact.path_in(&self.target_dir, &self.base_name)
    }

    /// The scan log as a sink for the process runner.
    pub fn log_sink(&self) -> Arc<dyn LogSink> {
        self.log.clone()
    }

    /// Appends one line to the scan log.
    pub async fn note(&self, line: impl AsRef<str>) {
        self.log.append(line.as_ref()).await;
    }
}

/// Per-execution view handed to a stage.
pub struct StageContext<'a> {
    /// Scan-wide context.
    pub scan: &'a ScanContext,
    /// Declaration of the executing stage.
    pub descriptor: &'a StageDescriptor,
    /// Told about every spawned process.
    pub hooks: &'a dyn ProcessHooks,
}

impl StageContext<'_> {
    /// Where `artifact` lives for this scan.
    pub fn artifact_path(&self, artifact: &Artifact) -> PathBuf {
        self.scan.artifact_path(artifact)
    }

    /// Whether a stop was requested.
    pub fn is_cancelled(&self) -> bool {
        self.scan.cancel.is_cancelled()
    }

    /// Whether `artifact` holds at least one non-empty file.
    pub async fn is_populated(&self, artifact: &Artifact) -> bool {
        self.scan
            .store
            .is_populated(&self.artifact_path(artifact))
            .await
    }

    /// Lines of `artifact`, empty when it does not exist.
    pub async fn read_lines(&self, artifact: &Artifact) -> std::io::Result<Vec<String>> {
        let path = self.artifact_path(artifact);
        match self.scan.store.read_lines(&path).await {
            Ok(lines) => Ok(lines),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    /// Missing artifacts according to the input policy, or `None` when the
    /// stage may run.
    pub async fn unmet_inputs(&self) -> Option<String> {
        let descriptor = self.descriptor;
        if descriptor.input_policy == InputPolicy::Always || descriptor.requires.is_empty() {
            return None;
        }

        let mut missing = Vec::new();
        for artifact in &descriptor.requires {
            if !self.is_populated(artifact).await {
                missing.push(artifact.to_string());
            }
        }

        let unmet = match descriptor.input_policy {
            InputPolicy::AllNonEmpty => !missing.is_empty(),
            InputPolicy::AnyNonEmpty => missing.len() == descriptor.requires.len(),
            InputPolicy::Always => false,
        };
        unmet.then(|| format!("missing or empty input: {}", missing.join(", ")))
    }
}

/// A unit of pipeline work. Implementations report failures through
/// [`StageResult`], never by panicking.
#[async_trait]
pub trait Stage: Send + Sync + fmt::Debug {
    /// Static declaration used for planning.
    fn descriptor(&self) -> &StageDescriptor;

    /// Does the work. Only called once preconditions hold.
    async fn run(&self, ctx: &StageContext<'_>) -> StageResult;

    /// Precondition check, then [`Stage::run`].
    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
        if let Some(reason) = ctx.unmet_inputs().await {
            return StageResult::skipped(reason);
        }
        if ctx.is_cancelled() {
            return StageResult::cancelled();
        }
        self.run(ctx).await
    }
}
