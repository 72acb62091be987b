use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use tracing::warn;

use super::{Stage, StageContext, StageDescriptor, StageResult};
use crate::process::ProcessOutcome;

/// Builds the command lines for one external tool.
#[async_trait]
pub trait ToolSpec: Send + Sync + fmt::Debug {
    /// Binary looked up on `PATH`.
    fn program(&self) -> &str;

    /// Invocations to run, in order. An empty plan skips the stage.
    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<crate::process::Invocation>>;
}

/// A stage that runs one tool through the scan's process runner.
#[derive(Debug)]
pub struct ToolStage {
    descriptor: StageDescriptor,
    spec: Box<dyn ToolSpec>,
}

impl ToolStage {
    /// Tool stage declared by `descriptor`.
    pub fn new(descriptor: StageDescriptor, spec: impl ToolSpec + 'static) -> Self {
        Self {
            descriptor,
            spec: Box::new(spec),
        }
    }

    /// Adjusts the descriptor after construction.
    pub fn with_descriptor(
        mut self,
        update: impl FnOnce(StageDescriptor) -> StageDescriptor,
    ) -> Self {
        self.descriptor = update(self.descriptor);
        self
    }

    /// Command builder of this stage.
    pub fn spec(&self) -> &dyn ToolSpec {
        self.spec.as_ref()
    }
}

#[async_trait]
impl Stage for ToolStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &StageContext<'_>) -> StageResult {
        let started = Instant::now();
        let invocations = match self.spec.plan(ctx).await {
            Ok(invocations) => invocations,
            Err(err) => {
                return StageResult::failed(format!("cannot build command: {err}"))
                    .with_duration(started.elapsed());
            }
        };
        if invocations.is_empty() {
            return StageResult::skipped("nothing to run");
        }

        let total = invocations.len();
        let mut last: Option<ProcessOutcome> = None;
        let mut first_failure: Option<(String, ProcessOutcome)> = None;
        let mut failures = 0usize;

        for invocation in &invocations {
            if ctx.is_cancelled() {
                return StageResult::cancelled().with_duration(started.elapsed());
            }

            let outcome = match ctx
                .scan
                .runner
                .run(invocation, &ctx.scan.cancel, ctx.scan.log_sink(), ctx.hooks)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(
                        target: "scan::stage",
                        scan_id = %ctx.scan.scan_id,
                        stage = %self.descriptor.name,
                        error = %err,
                        "tool launch failed"
                    );
                    ctx.scan
                        .note(format!("[{}] launch failed: {err}", invocation.label))
                        .await;
                    return StageResult::failed(err.to_string()).with_duration(started.elapsed());
                }
            };

            if outcome.cancelled {
                return StageResult::cancelled()
                    .with_process(&outcome)
                    .with_duration(started.elapsed());
            }
            if !outcome.success() {
                failures += 1;
                if first_failure.is_none() {
                    first_failure = Some((invocation.label.clone(), outcome.clone()));
                }
            }
            last = Some(outcome);
        }

        if let Some((label, outcome)) = first_failure {
            let code = outcome
                .exit_code
                .map_or_else(|| "a signal".to_string(), |code| format!("code {code}"));
            let detail = if total > 1 {
                format!("`{label}` exited with {code} ({failures} of {total} invocations failed)")
            } else {
                format!("`{label}` exited with {code}")
            };
            return StageResult::failed(detail)
                .with_process(&outcome)
                .with_duration(started.elapsed());
        }

        let mut result = StageResult::completed().with_duration(started.elapsed());
        if let Some(outcome) = &last {
            result = result.with_process(outcome);
        }

        let mut produced_any = self.descriptor.produces.is_empty();
        for artifact in &self.descriptor.produces {
            if ctx.is_populated(artifact).await {
                produced_any = true;
                break;
            }
        }
        if !produced_any {
            result = result.with_detail("no output produced");
        }
        result
    }
}
