//! Status model shared by the registry, the pipeline and status readers.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ScanId;
use crate::stage::{StageOutcome, StageResult};
use crate::target::Target;

/// Scan lifecycle. Transitions only move forward:
/// `queued -> running -> {stopped, completed, error}`, with `queued` allowed
/// to jump straight to `stopped` or `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Accepted, not started yet.
    Queued,
    /// The pipeline is executing.
    Running,
    /// Ended by a stop request.
    Stopped,
    /// Every blocking stage succeeded.
    Completed,
    /// A blocking stage failed, or the scan could not start.
    Error,
}

impl ScanStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Queued => "queued",
            ScanStatus::Running => "running",
            ScanStatus::Stopped => "stopped",
            ScanStatus::Completed => "completed",
            ScanStatus::Error => "error",
        }
    }

    /// `stopped`, `completed` or `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Stopped | ScanStatus::Completed | ScanStatus::Error
        )
    }

    /// Whether the lifecycle allows moving to `next`. Terminal states never move.
    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        use ScanStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Stopped)
                | (Queued, Error)
                | (Running, Stopped)
                | (Running, Completed)
                | (Running, Error)
        )
    }
}

/// Aggregate outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    /// Cancelled before finishing.
    Stopped,
    /// No blocking stage failed.
    Completed,
    /// A blocking stage failed.
    Error,
}

impl From<TerminalStatus> for ScanStatus {
    fn from(value: TerminalStatus) -> Self {
        match value {
            TerminalStatus::Stopped => ScanStatus::Stopped,
            TerminalStatus::Completed => ScanStatus::Completed,
            TerminalStatus::Error => ScanStatus::Error,
        }
    }
}

/// Per-stage progress as seen by status readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Waiting on dependencies, or never reached.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Not run: disabled, missing input, or blocked upstream.
    Skipped,
    /// Interrupted by a stop request.
    Cancelled,
}

impl From<StageOutcome> for StageState {
    fn from(value: StageOutcome) -> Self {
        match value {
            StageOutcome::Completed => StageState::Completed,
            StageOutcome::Failed => StageState::Failed,
            StageOutcome::Skipped => StageState::Skipped,
            StageOutcome::Cancelled => StageState::Cancelled,
        }
    }
}

/// Status view of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub name: String,
    /// Current state.
    pub state: StageState,
    /// Whether the stage gates its dependents.
    pub blocking: bool,
    /// Attempts made so far.
    pub attempts: u32,
    /// Exit code of the last process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Skip or failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// First start, retries included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage reached its terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    /// Record of a stage that has not started.
    pub fn pending(name: impl Into<String>, blocking: bool) -> Self {
        Self {
            name: name.into(),
            state: StageState::Pending,
            blocking,
            attempts: 0,
            exit_code: None,
            detail: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub(crate) fn mark_started(&mut self, at: DateTime<Utc>) {
        self.state = StageState::Running;
        self.started_at.get_or_insert(at);
    }

    pub(crate) fn mark_finished(&mut self, result: &StageResult, at: DateTime<Utc>) {
        self.state = result.outcome.into();
        self.attempts = result.attempts;
        self.exit_code = result.exit_code;
        self.detail = result.detail.clone();
        self.ended_at = Some(at);
    }
}

/// The error that ended a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    /// Stage that failed, if the failure came from one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// What went wrong.
    pub message: String,
    /// Bounded stderr of the failing process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_tail: Option<String>,
}

/// Final return code and bounded output of the last finished stage, or the
/// terminating error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Exit code of the last process that ran.
    pub return_code: Option<i32>,
    /// Stage the result was taken from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_stage: Option<String>,
    /// Bounded stdout of that stage.
    pub output_tail: String,
    /// Bounded stderr of that stage.
    pub stderr_tail: String,
    /// Set when the scan ended in `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ScanFailure>,
}

impl ScanResult {
    /// Result of a scan that ended with `failure`.
    pub fn failed(failure: ScanFailure) -> Self {
        Self {
            return_code: None,
            last_stage: failure.stage.clone(),
            output_tail: String::new(),
            stderr_tail: failure.stderr_tail.clone().unwrap_or_default(),
            error: Some(failure),
        }
    }
}

/// Point-in-time copy of a scan, safe to hand to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    /// Identifier returned by submit.
    pub scan_id: ScanId,
    /// What is being scanned.
    pub target: Target,
    /// Directory receiving the artifacts.
    pub target_dir: PathBuf,
    /// Lifecycle status.
    pub status: ScanStatus,
    /// Most recently started stage still running.
    pub current_stage: Option<String>,
    /// Every stage currently running.
    pub running_stages: Vec<String>,
    /// A stop was requested; the scan may still be winding down.
    pub cancel_requested: bool,
    /// Tool processes currently alive.
    pub live_processes: usize,
    /// When the scan was accepted.
    pub submitted_at: DateTime<Utc>,
    /// Set on `queued -> running`.
    pub started_at: Option<DateTime<Utc>>,
    /// Set once, on the terminal transition.
    pub ended_at: Option<DateTime<Utc>>,
    /// Present once the scan is terminal.
    pub result: Option<ScanResult>,
    /// Per-stage view, in pipeline order.
    pub stages: Vec<StageRecord>,
}

impl ScanSnapshot {
    /// Run time so far, or total run time once finished.
    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - start).to_std().ok()
    }

    /// Record of the stage called `name`.
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|record| record.name == name)
    }
}

/// Entry of the running-scans listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningScan {
    /// Scan identifier.
    pub scan_id: ScanId,
    /// What is being scanned.
    pub target: Target,
    /// Directory receiving the artifacts.
    pub target_dir: PathBuf,
    /// Most recently started stage still running.
    pub current_stage: Option<String>,
}
