//! Dependency-ordered, partially parallel execution of a scan's stages.
//!
//! Stages are wired together by the artifacts they declare: a stage waits
//! for every producer of its required inputs to reach a terminal state.
//! Independent stages share a concurrency budget. A failed blocking stage
//! skips everything downstream of it; cancellation stops scheduling.

pub mod filters;
mod plan;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::process::{NoopHooks, ProcessHooks};
use crate::scan::status::{ScanFailure, ScanResult, TerminalStatus};
use crate::stage::{
    ScanContext, Stage, StageContext, StageDescriptor, StageKind, StageOutcome, StageResult,
};

pub use filters::{
    AliveHostExtractor, AliveUrlExtractor, FilterStage, LineFilter, SubdomainNormalizer,
};
pub use plan::{PipelinePlanner, ReconPipelinePlanner};

/// Receives stage lifecycle events of one pipeline run.
#[async_trait]
pub trait PipelineObserver: ProcessHooks {
    /// A stage passed its checks and is about to run.
    async fn stage_started(&self, stage: &str);
    /// A stage reached a terminal outcome, including skips.
    async fn stage_finished(&self, stage: &str, result: &StageResult);
}

#[async_trait]
impl PipelineObserver for NoopHooks {
    async fn stage_started(&self, _stage: &str) {}
    async fn stage_finished(&self, _stage: &str, _result: &StageResult) {}
}

/// A validated stage graph ready to run against one scan.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    /// Indices of the producers each stage waits on.
    deps: Vec<Vec<usize>>,
    max_parallel: usize,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("max_parallel", &self.max_parallel)
            .finish()
    }
}

/// Collects stages and checks the graph in [`PipelineBuilder::build`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Stage>>,
    max_parallel: Option<usize>,
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("stages", &self.stages.len())
            .field("max_parallel", &self.max_parallel)
            .finish()
    }
}

impl PipelineBuilder {
    /// Adds a stage. Order only matters for tie-breaking among ready stages.
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Adds a stage that is already behind an `Arc`.
    pub fn shared_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Limit on concurrently running stages. Defaults to 1.
    pub fn max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    /// Drops disabled stages and validates the rest.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let max_parallel = self.max_parallel.unwrap_or(1);
        if max_parallel == 0 {
            return Err(PipelineError::InvalidConcurrency);
        }

        let stages: Vec<Arc<dyn Stage>> = self
            .stages
            .into_iter()
            .filter(|stage| stage.descriptor().enabled)
            .collect();

        let mut names = HashSet::new();
        let mut producers: HashMap<&str, usize> = HashMap::new();
        for (idx, stage) in stages.iter().enumerate() {
            let descriptor = stage.descriptor();
            if descriptor.name.trim().is_empty() {
                return Err(PipelineError::EmptyStageName);
            }
            if !names.insert(descriptor.name.as_str()) {
                return Err(PipelineError::DuplicateStage(descriptor.name.clone()));
            }
            for artifact in &descriptor.produces {
                if let Some(first) = producers.insert(artifact.name(), idx) {
                    return Err(PipelineError::DuplicateProducer {
                        artifact: artifact.to_string(),
                        first: stages[first].descriptor().name.clone(),
                        second: descriptor.name.clone(),
                    });
                }
            }
        }

        let mut deps = Vec::with_capacity(stages.len());
        for stage in &stages {
            let descriptor = stage.descriptor();
            let mut stage_deps: Vec<usize> = Vec::new();
            for artifact in &descriptor.requires {
                let producer = producers.get(artifact.name()).copied();
                if descriptor.kind.requires_alive_input() {
                    let gated = producer.is_some_and(|idx| {
                        stages[idx].descriptor().kind == StageKind::AliveFilter
                    });
                    if !gated {
                        return Err(PipelineError::UngatedInput {
                            stage: descriptor.name.clone(),
                            artifact: artifact.to_string(),
                        });
                    }
                }
                if let Some(idx) = producer
                    && !stage_deps.contains(&idx)
                {
                    stage_deps.push(idx);
                }
            }
            deps.push(stage_deps);
        }

        check_acyclic(&stages, &deps)?;

        Ok(Pipeline {
            stages,
            deps,
            max_parallel,
        })
    }
}

fn check_acyclic(stages: &[Arc<dyn Stage>], deps: &[Vec<usize>]) -> Result<(), PipelineError> {
    let mut indegree: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
    for (idx, stage_deps) in deps.iter().enumerate() {
        for dep in stage_deps {
            dependents[*dep].push(idx);
        }
    }

    let mut queue: VecDeque<usize> = (0..stages.len()).filter(|idx| indegree[*idx] == 0).collect();
    let mut visited = 0;
    while let Some(idx) = queue.pop_front() {
        visited += 1;
        for next in &dependents[idx] {
            indegree[*next] -= 1;
            if indegree[*next] == 0 {
                queue.push_back(*next);
            }
        }
    }

    if visited == stages.len() {
        return Ok(());
    }
    let stuck = indegree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree > 0)
        .map(|(idx, _)| stages[idx].descriptor().name.clone())
        .collect();
    Err(PipelineError::Cycle(stuck))
}

/// Final state of one stage after a run. `result` is `None` for stages that
/// never started because the run was cancelled.
#[derive(Debug, Clone)]
pub struct StageReport {
    /// Stage name.
    pub name: String,
    /// Whether the stage gated its dependents.
    pub blocking: bool,
    /// Terminal result, if the stage got one.
    pub result: Option<StageResult>,
}

/// Aggregate outcome of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Terminal status of the run.
    pub status: TerminalStatus,
    /// Per-stage results in declaration order.
    pub stages: Vec<StageReport>,
    /// The error that ended the run, when it ended in `error`.
    pub failure: Option<ScanFailure>,
    /// Stage that finished last among those that ran a process or transform.
    pub last_stage: Option<String>,
}

impl PipelineReport {
    /// Report of the stage called `name`.
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.name == name)
    }

    /// Outcome of the stage called `name`, if it finished.
    pub fn outcome(&self, name: &str) -> Option<StageOutcome> {
        self.stage(name)?.result.as_ref().map(|result| result.outcome)
    }

    fn aborted(error: &PipelineError, stages: &[Arc<dyn Stage>]) -> Self {
        Self {
            status: TerminalStatus::Error,
            stages: stages
                .iter()
                .map(|stage| StageReport {
                    name: stage.descriptor().name.clone(),
                    blocking: stage.descriptor().blocking,
                    result: None,
                })
                .collect(),
            failure: Some(ScanFailure {
                stage: None,
                message: error.to_string(),
                stderr_tail: None,
            }),
            last_stage: None,
        }
    }

    /// Status result handed to pollers.
    pub fn scan_result(&self) -> ScanResult {
        if let Some(failure) = &self.failure {
            return ScanResult::failed(failure.clone());
        }
        let last = self
            .last_stage
            .as_deref()
            .and_then(|name| self.stage(name))
            .and_then(|report| report.result.as_ref());
        ScanResult {
            return_code: last.and_then(|result| result.exit_code),
            last_stage: self.last_stage.clone(),
            output_tail: last.map(|result| result.stdout_tail.clone()).unwrap_or_default(),
            stderr_tail: last.map(|result| result.stderr_tail.clone()).unwrap_or_default(),
            error: None,
        }
    }
}

impl Pipeline {
    /// Starts an empty builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Stage names in declaration order.
    pub fn stage_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .map(|stage| stage.descriptor().name.clone())
            .collect()
    }

    /// Stage declarations in declaration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.stages.iter().map(|stage| stage.descriptor())
    }

    /// Limit on concurrently running stages.
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Names of stages `name` waits on.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.index_of(name)
            .map(|idx| {
                self.deps[idx]
                    .iter()
                    .map(|dep| self.stages[*dep].descriptor().name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.stages
            .iter()
            .position(|stage| stage.descriptor().name == name)
    }

    /// Prepares the output tree: the target directory exists and no artifact
    /// this pipeline produces is left over from an earlier run.
    async fn prepare(&self, ctx: &ScanContext) -> Result<(), PipelineError> {
        let output_error = |source| PipelineError::OutputDirectory {
            path: ctx.target_dir.clone(),
            source,
        };
        ctx.store
            .ensure_dir(&ctx.target_dir)
            .await
            .map_err(output_error)?;
        for descriptor in self.descriptors() {
            for artifact in &descriptor.produces {
                ctx.store
                    .remove(&ctx.artifact_path(artifact))
                    .await
                    .map_err(output_error)?;
            }
        }
        Ok(())
    }

    /// Root blocking failure upstream of `idx`, if any.
    fn blocked_by(
        &self,
        idx: usize,
        results: &[Option<StageResult>],
        blocked: &[Option<String>],
    ) -> Option<String> {
        self.deps[idx].iter().find_map(|dep| {
            if let Some(root) = &blocked[*dep] {
                return Some(root.clone());
            }
            let descriptor = self.stages[*dep].descriptor();
            let failed = results[*dep]
                .as_ref()
                .is_some_and(|result| result.is(StageOutcome::Failed));
            (failed && descriptor.blocking).then(|| descriptor.name.clone())
        })
    }

    async fn execute_stage(
        &self,
        idx: usize,
        ctx: &ScanContext,
        observer: &dyn PipelineObserver,
    ) -> StageResult {
        let stage = &self.stages[idx];
        let descriptor = stage.descriptor();
        let stage_ctx = StageContext {
            scan: ctx,
            descriptor,
            hooks: observer,
        };

        let mut attempt = 1;
        loop {
            let mut result = stage.execute(&stage_ctx).await;
            if !result.is(StageOutcome::Skipped) {
                result.attempts = attempt;
            }
            if !result.is(StageOutcome::Failed) || attempt >= descriptor.retry.max_attempts {
                return result;
            }

            warn!(
                target: "scan::pipeline",
                scan_id = %ctx.scan_id,
                stage = %descriptor.name,
                attempt,
                detail = ?result.detail,
                "stage failed, retrying"
            );
            ctx.note(format!(
                "[{}] attempt {attempt} failed, retrying in {}ms",
                descriptor.name,
                descriptor.retry.backoff.as_millis()
            ))
            .await;

            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    let mut cancelled = StageResult::cancelled();
                    cancelled.attempts = attempt;
                    return cancelled;
                }
                _ = tokio::time::sleep(descriptor.retry.backoff) => {}
            }
            attempt += 1;
        }
    }

    /// Runs every stage to a terminal state, or until cancellation stops
    /// scheduling, and aggregates the outcome.
    pub async fn run(&self, ctx: &ScanContext, observer: &dyn PipelineObserver) -> PipelineReport {
        if let Err(err) = self.prepare(ctx).await {
            warn!(
                target: "scan::pipeline",
                scan_id = %ctx.scan_id,
                error = %err,
                "cannot prepare output directory"
            );
            ctx.note(format!("[pipeline] {err}")).await;
            return PipelineReport::aborted(&err, &self.stages);
        }

        let count = self.stages.len();
        let mut results: Vec<Option<StageResult>> = vec![None; count];
        let mut blocked: Vec<Option<String>> = vec![None; count];
        let mut started = vec![false; count];
        let mut finish_order: Vec<usize> = Vec::with_capacity(count);
        let mut in_flight = FuturesUnordered::new();

        loop {
            let mut progressed = true;
            while progressed && !ctx.cancel.is_cancelled() {
                progressed = false;
                for idx in 0..count {
                    if started[idx] || !self.deps[idx].iter().all(|dep| results[*dep].is_some()) {
                        continue;
                    }
                    let name = &self.stages[idx].descriptor().name;

                    if let Some(root) = self.blocked_by(idx, &results, &blocked) {
                        let result = StageResult::skipped(format!("blocked by {root}"));
                        debug!(
                            target: "scan::pipeline",
                            scan_id = %ctx.scan_id,
                            stage = %name,
                            blocked_by = %root,
                            "stage skipped"
                        );
                        ctx.note(format!("[{name}] skipped: blocked by {root}")).await;
                        observer.stage_finished(name, &result).await;
                        started[idx] = true;
                        blocked[idx] = Some(root);
                        results[idx] = Some(result);
                        progressed = true;
                        continue;
                    }

                    if in_flight.len() >= self.max_parallel || ctx.cancel.is_cancelled() {
                        continue;
                    }

                    info!(
                        target: "scan::pipeline",
                        scan_id = %ctx.scan_id,
                        stage = %name,
                        "stage started"
                    );
                    ctx.note(format!("=== Stage {name} ===")).await;
                    observer.stage_started(name).await;
                    started[idx] = true;
                    in_flight.push(
                        self.execute_stage(idx, ctx, observer)
                            .map(move |result| (idx, result)),
                    );
                    progressed = true;
                }
            }

            let Some((idx, result)) = in_flight.next().await else {
                break;
            };
            let name = &self.stages[idx].descriptor().name;
            info!(
                target: "scan::pipeline",
                scan_id = %ctx.scan_id,
                stage = %name,
                outcome = ?result.outcome,
                attempts = result.attempts,
                duration_ms = result.duration.as_millis() as u64,
                "stage finished"
            );
            ctx.note(format!(
                "[{name}] {:?}{}",
                result.outcome,
                result
                    .detail
                    .as_deref()
                    .map(|detail| format!(": {detail}"))
                    .unwrap_or_default()
            ))
            .await;
            observer.stage_finished(name, &result).await;
            if !result.is(StageOutcome::Skipped) {
                finish_order.push(idx);
            }
            results[idx] = Some(result);
        }

        self.aggregate(ctx, results, finish_order)
    }

    fn aggregate(
        &self,
        ctx: &ScanContext,
        results: Vec<Option<StageResult>>,
        finish_order: Vec<usize>,
    ) -> PipelineReport {
        let interrupted = ctx.cancel.is_cancelled()
            && results.iter().any(|result| {
                result
                    .as_ref()
                    .is_none_or(|result| result.is(StageOutcome::Cancelled))
            });

        let blocking_failure = results.iter().enumerate().find_map(|(idx, result)| {
            let result = result.as_ref()?;
            let descriptor = self.stages[idx].descriptor();
            (descriptor.blocking && result.is(StageOutcome::Failed)).then(|| ScanFailure {
                stage: Some(descriptor.name.clone()),
                message: result
                    .detail
                    .clone()
                    .unwrap_or_else(|| "blocking stage failed".to_string()),
                stderr_tail: (!result.stderr_tail.is_empty()).then(|| result.stderr_tail.clone()),
            })
        });

        let (status, failure) = if interrupted {
            (TerminalStatus::Stopped, None)
        } else if let Some(failure) = blocking_failure {
            (TerminalStatus::Error, Some(failure))
        } else {
            (TerminalStatus::Completed, None)
        };

        let last_stage = finish_order
            .last()
            .map(|idx| self.stages[*idx].descriptor().name.clone());
        let stages = self
            .stages
            .iter()
            .zip(results)
            .map(|(stage, result)| StageReport {
                name: stage.descriptor().name.clone(),
                blocking: stage.descriptor().blocking,
                result,
            })
            .collect();

        PipelineReport {
            status,
            stages,
            failure,
            last_stage,
        }
    }
}
