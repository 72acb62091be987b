use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::status::{
    RunningScan, ScanFailure, ScanResult, ScanSnapshot, ScanStatus, StageRecord, StageState,
};
use crate::artifact::ArtifactStore;
use crate::config::EngineConfig;
use crate::error::ScanControlError;
use crate::ids::ScanId;
use crate::pipeline::{Pipeline, PipelineObserver, PipelinePlanner};
use crate::process::{LogSink, ProcessHooks, ScanLog};
use crate::stage::{ScanContext, StageResult};
use crate::target::Target;

/// Process-wide table of scans. Cheap to clone; every clone shares the same
/// table.
#[derive(Clone)]
pub struct ScanRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for ScanRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scans = self.inner.scans.try_read().ok().map(|guard| guard.len());
        f.debug_struct("ScanRegistry")
            .field("scans", &scans)
            .field("planner", &self.inner.planner)
            .field("output_root", &self.inner.config.output_root)
            .finish()
    }
}

struct RegistryInner {
    config: EngineConfig,
    planner: Arc<dyn PipelinePlanner>,
    store: Arc<dyn ArtifactStore>,
    scans: RwLock<HashMap<ScanId, ScanEntry>>,
}

struct ScanEntry {
    scan_id: ScanId,
    target: Target,
    target_dir: PathBuf,
    status: ScanStatus,
    status_tx: watch::Sender<ScanStatus>,
    current_stage: Option<String>,
    running_stages: Vec<String>,
    cancel_requested: bool,
    cancel: CancellationToken,
    processes: HashMap<String, u32>,
    submitted_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    result: Option<ScanResult>,
    stages: Vec<StageRecord>,
    log: Arc<ScanLog>,
}

impl ScanEntry {
    fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            scan_id: self.scan_id,
            target: self.target.clone(),
            target_dir: self.target_dir.clone(),
            status: self.status,
            current_stage: self.current_stage.clone(),
            running_stages: self.running_stages.clone(),
            cancel_requested: self.cancel_requested,
            live_processes: self.processes.len(),
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            result: self.result.clone(),
            stages: self.stages.clone(),
        }
    }

    /// Moves to `next` if the lifecycle allows it. Timestamps are set once.
    fn transition(&mut self, next: ScanStatus, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next == ScanStatus::Running {
            self.started_at.get_or_insert(at);
        } else if next.is_terminal() {
            self.ended_at.get_or_insert(at);
        }
        self.status_tx.send_replace(next);
        true
    }

    /// First stop request on a live scan. Returns whether this call made it.
    fn request_cancel(&mut self) -> bool {
        if self.status.is_terminal() || self.cancel_requested {
            return false;
        }
        self.cancel_requested = true;
        self.cancel.cancel();
        true
    }

    fn record_mut(&mut self, stage: &str) -> Option<&mut StageRecord> {
        self.stages.iter_mut().find(|record| record.name == stage)
    }
}

impl ScanRegistry {
    /// An empty registry. `planner` builds one pipeline per submitted target.
    pub fn new(
        config: EngineConfig,
        planner: Arc<dyn PipelinePlanner>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                planner,
                store,
                scans: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Engine settings every scan runs with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Planner used for new submissions.
    pub fn planner(&self) -> &Arc<dyn PipelinePlanner> {
        &self.inner.planner
    }

    /// Validates and registers a scan, then starts it in the background.
    /// Returns as soon as the scan is queued.
    pub async fn submit(
        &self,
        target: Target,
        output_root: &Path,
    ) -> Result<ScanId, ScanControlError> {
        target.verify().await?;
        let target_dir = target.target_dir(output_root);
        let pipeline = self.inner.planner.plan(&target)?;

        let scan_id = ScanId::new();
        let log = self.open_log(scan_id).await;
        let cancel = CancellationToken::new();
        let submitted_at = Utc::now();

        {
            let mut scans = self.inner.scans.write().await;
            if let Some(active) = scans
                .values()
                .find(|entry| !entry.status.is_terminal() && entry.target_dir == target_dir)
            {
                let err = ScanControlError::DuplicateActiveScan {
                    scan_id: active.scan_id,
                    target_dir: target_dir.clone(),
                };
                drop(scans);
                discard_log(&log).await;
                return Err(err);
            }

            let (status_tx, _) = watch::channel(ScanStatus::Queued);
            scans.insert(
                scan_id,
                ScanEntry {
                    scan_id,
                    target: target.clone(),
                    target_dir: target_dir.clone(),
                    status: ScanStatus::Queued,
                    status_tx,
                    current_stage: None,
                    running_stages: Vec::new(),
                    cancel_requested: false,
                    cancel: cancel.clone(),
                    processes: HashMap::new(),
                    submitted_at,
                    started_at: None,
                    ended_at: None,
                    result: None,
                    stages: pipeline
                        .descriptors()
                        .map(|descriptor| {
                            StageRecord::pending(&descriptor.name, descriptor.blocking)
                        })
                        .collect(),
                    log: log.clone(),
                },
            );
        }

        info!(
            target: "scan::registry",
            scan_id = %scan_id,
            target = %target,
            target_dir = %target_dir.display(),
            stages = pipeline.stage_names().len(),
            "scan submitted"
        );
        log.append(&format!("=== Scan {scan_id} ===")).await;
        log.append(&format!("Target: {target}")).await;
        log.append(&format!("Target directory: {}", target_dir.display()))
            .await;
        log.append(&format!("Mode: {}", self.inner.planner.label()))
            .await;
        log.append(&format!("Stages: {}", pipeline.stage_names().join(", ")))
            .await;
        log.append(&format!("Submitted: {}", submitted_at.to_rfc3339()))
            .await;

        let ctx = ScanContext {
            scan_id,
            base_name: target.base_name(),
            target,
            target_dir,
            store: Arc::clone(&self.inner.store),
            runner: self.inner.config.process_runner(),
            cancel,
            log,
        };
        tokio::spawn(run_scan(Arc::clone(&self.inner), pipeline, ctx));
        Ok(scan_id)
    }

    /// Current snapshot of `scan_id`, live or finished.
    pub async fn get_status(&self, scan_id: ScanId) -> Result<ScanSnapshot, ScanControlError> {
        let scans = self.inner.scans.read().await;
        scans
            .get(&scan_id)
            .map(ScanEntry::snapshot)
            .ok_or(ScanControlError::NotFound(scan_id))
    }

    /// Every scan, newest first.
    pub async fn list(&self) -> Vec<ScanSnapshot> {
        let scans = self.inner.scans.read().await;
        let mut all: Vec<ScanSnapshot> = scans.values().map(ScanEntry::snapshot).collect();
        all.sort_by(|a, b| b.scan_id.cmp(&a.scan_id));
        all
    }

    /// Scans in `running` state, in submission order.
    pub async fn list_running(&self) -> Vec<RunningScan> {
        let scans = self.inner.scans.read().await;
        let mut running: Vec<RunningScan> = scans
            .values()
            .filter(|entry| entry.status == ScanStatus::Running)
            .map(|entry| RunningScan {
                scan_id: entry.scan_id,
                target: entry.target.clone(),
                target_dir: entry.target_dir.clone(),
                current_stage: entry.current_stage.clone(),
            })
            .collect();
        running.sort_by_key(|scan| scan.scan_id);
        running
    }

    /// Requests a stop of one scan, or of every live scan when `scan_id` is
    /// `None`. Returns how many scans received their first stop request;
    /// unknown and finished scans count as zero.
    pub async fn cancel(&self, scan_id: Option<ScanId>) -> usize {
        let stopped: Vec<(ScanId, Arc<ScanLog>)> = {
            let mut scans = self.inner.scans.write().await;
            match scan_id {
                Some(id) => match scans.get_mut(&id) {
                    Some(entry) => {
                        if entry.request_cancel() {
                            vec![(entry.scan_id, Arc::clone(&entry.log))]
                        } else {
                            Vec::new()
                        }
                    }
                    None => Vec::new(),
                },
                None => scans
                    .values_mut()
                    .filter_map(|entry| {
                        entry
                            .request_cancel()
                            .then(|| (entry.scan_id, Arc::clone(&entry.log)))
                    })
                    .collect(),
            }
        };

        for (id, log) in &stopped {
            info!(target: "scan::registry", scan_id = %id, "stop requested");
            log.append("[registry] stop requested").await;
        }
        stopped.len()
    }

    /// Stops every live scan and waits up to `limit` for them to record a
    /// terminal status. Returns the scans still live when the limit ran out.
    pub async fn shutdown(&self, limit: Duration) -> Vec<ScanId> {
        self.cancel(None).await;
        let live = self.live_ids().await;
        if live.is_empty() {
            return live;
        }

        info!(target: "scan::registry", scans = live.len(), "waiting for live scans to stop");
        let waits = live.iter().map(|scan_id| self.wait(*scan_id));
        if tokio::time::timeout(limit, join_all(waits)).await.is_ok() {
            return Vec::new();
        }
        let remaining = self.live_ids().await;
        warn!(
            target: "scan::registry",
            scans = remaining.len(),
            "scans still live after shutdown wait"
        );
        remaining
    }

    async fn live_ids(&self) -> Vec<ScanId> {
        let scans = self.inner.scans.read().await;
        scans
            .values()
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| entry.scan_id)
            .collect()
    }

    /// Last `tail` lines of the scan log, or all retained lines.
    pub async fn logs(
        &self,
        scan_id: ScanId,
        tail: Option<usize>,
    ) -> Result<Vec<String>, ScanControlError> {
        let log = {
            let scans = self.inner.scans.read().await;
            let entry = scans
                .get(&scan_id)
                .ok_or(ScanControlError::NotFound(scan_id))?;
            Arc::clone(&entry.log)
        };
        Ok(match tail {
            Some(count) => log.tail(count).await,
            None => log.lines().await,
        })
    }

    /// Resolves once the scan reaches a terminal status.
    pub async fn wait(&self, scan_id: ScanId) -> Result<ScanSnapshot, ScanControlError> {
        let mut status_rx = {
            let scans = self.inner.scans.read().await;
            scans
                .get(&scan_id)
                .ok_or(ScanControlError::NotFound(scan_id))?
                .status_tx
                .subscribe()
        };
        if status_rx.wait_for(ScanStatus::is_terminal).await.is_err() {
            return Err(ScanControlError::NotFound(scan_id));
        }
        self.get_status(scan_id).await
    }

    /// Drops a finished scan from the table. Live scans are kept and
    /// reported as `Ok(false)`.
    pub async fn evict(&self, scan_id: ScanId) -> Result<bool, ScanControlError> {
        let mut scans = self.inner.scans.write().await;
        let entry = scans
            .get(&scan_id)
            .ok_or(ScanControlError::NotFound(scan_id))?;
        if !entry.status.is_terminal() {
            return Ok(false);
        }
        scans.remove(&scan_id);
        debug!(target: "scan::registry", scan_id = %scan_id, "scan evicted");
        Ok(true)
    }

    /// Evicts every scan that ended before `cutoff`.
    pub async fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut scans = self.inner.scans.write().await;
        let before = scans.len();
        scans.retain(|_, entry| {
            !(entry.status.is_terminal() && entry.ended_at.is_some_and(|ended| ended < cutoff))
        });
        before - scans.len()
    }

    async fn open_log(&self, scan_id: ScanId) -> Arc<ScanLog> {
        let config = &self.inner.config;
        if let Some(dir) = &config.log_dir {
            let path = dir.join(format!("{scan_id}.log"));
            match ScanLog::with_file(&path, config.log_tail_lines, config.log_tail_bytes).await {
                Ok(log) => return Arc::new(log),
                Err(err) => warn!(
                    target: "scan::registry",
                    scan_id = %scan_id,
                    path = %path.display(),
                    error = %err,
                    "cannot create scan log file, keeping log in memory"
                ),
            }
        }
        Arc::new(ScanLog::in_memory(
            config.log_tail_lines,
            config.log_tail_bytes,
        ))
    }
}

async fn discard_log(log: &ScanLog) {
    if let Some(path) = log.path()
        && let Err(err) = tokio::fs::remove_file(path).await
    {
        debug!(
            target: "scan::registry",
            path = %path.display(),
            error = %err,
            "cannot remove unused scan log"
        );
    }
}

impl RegistryInner {
    async fn update<F>(&self, scan_id: ScanId, apply: F)
    where
        F: FnOnce(&mut ScanEntry),
    {
        let mut scans = self.scans.write().await;
        if let Some(entry) = scans.get_mut(&scan_id) {
            apply(entry);
        }
    }

    /// `queued -> running`, unless a stop arrived first.
    async fn begin(&self, scan_id: ScanId) -> bool {
        let mut scans = self.scans.write().await;
        match scans.get_mut(&scan_id) {
            Some(entry) if !entry.cancel_requested => {
                entry.transition(ScanStatus::Running, Utc::now())
            }
            _ => false,
        }
    }

    /// Records the terminal status exactly once and clears live state.
    async fn finish(&self, scan_id: ScanId, status: ScanStatus, result: ScanResult) -> bool {
        let mut scans = self.scans.write().await;
        let Some(entry) = scans.get_mut(&scan_id) else {
            return false;
        };
        let now = Utc::now();
        if !entry.transition(status, now) {
            return false;
        }
        entry.result = Some(result);
        entry.current_stage = None;
        entry.running_stages.clear();
        entry.processes.clear();
        for record in &mut entry.stages {
            if record.state == StageState::Running {
                record.state = StageState::Cancelled;
                record.ended_at.get_or_insert(now);
            }
        }
        true
    }
}

/// Feeds pipeline progress back into the registry entry.
struct ScanObserver {
    inner: Arc<RegistryInner>,
    scan_id: ScanId,
}

#[async_trait]
impl ProcessHooks for ScanObserver {
    async fn process_spawned(&self, label: &str, pid: u32) {
        self.inner
            .update(self.scan_id, |entry| {
                entry.processes.insert(label.to_string(), pid);
            })
            .await;
    }

    async fn process_exited(&self, label: &str) {
        self.inner
            .update(self.scan_id, |entry| {
                entry.processes.remove(label);
            })
            .await;
    }
}

#[async_trait]
impl PipelineObserver for ScanObserver {
    async fn stage_started(&self, stage: &str) {
        let now = Utc::now();
        self.inner
            .update(self.scan_id, |entry| {
                entry.running_stages.push(stage.to_string());
                entry.current_stage = Some(stage.to_string());
                if let Some(record) = entry.record_mut(stage) {
                    record.mark_started(now);
                }
            })
            .await;
    }

    async fn stage_finished(&self, stage: &str, result: &StageResult) {
        let now = Utc::now();
        self.inner
            .update(self.scan_id, |entry| {
                entry.running_stages.retain(|name| name != stage);
                entry.current_stage = entry.running_stages.last().cloned();
                if let Some(record) = entry.record_mut(stage) {
                    record.mark_finished(result, now);
                }
            })
            .await;
    }
}

async fn run_scan(inner: Arc<RegistryInner>, pipeline: Pipeline, ctx: ScanContext) {
    let scan_id = ctx.scan_id;

    let (status, result) = if inner.begin(scan_id).await {
        info!(target: "scan::registry", scan_id = %scan_id, "scan running");
        let observer = ScanObserver {
            inner: Arc::clone(&inner),
            scan_id,
        };
        match AssertUnwindSafe(pipeline.run(&ctx, &observer))
            .catch_unwind()
            .await
        {
            Ok(report) => (ScanStatus::from(report.status), report.scan_result()),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    target: "scan::registry",
                    scan_id = %scan_id,
                    panic = %message,
                    "scan task panicked"
                );
                ctx.cancel.cancel();
                (
                    ScanStatus::Error,
                    ScanResult::failed(ScanFailure {
                        stage: None,
                        message: format!("scan task panicked: {message}"),
                        stderr_tail: None,
                    }),
                )
            }
        }
    } else {
        (
            ScanStatus::Stopped,
            ScanResult {
                return_code: None,
                last_stage: None,
                output_tail: String::new(),
                stderr_tail: String::new(),
                error: None,
            },
        )
    };

    let return_code = result
        .return_code
        .map_or_else(|| "none".to_string(), |code| code.to_string());
    // Footer goes out before the transition so waiters see a complete log.
    ctx.note(format!(
        "=== Scan {} === Return Code: {return_code}",
        status_title(status)
    ))
    .await;
    ctx.log.close().await;
    if inner.finish(scan_id, status, result).await {
        info!(
            target: "scan::registry",
            scan_id = %scan_id,
            status = status.as_str(),
            "scan finished"
        );
    } else {
        warn!(
            target: "scan::registry",
            scan_id = %scan_id,
            status = status.as_str(),
            "terminal status already recorded"
        );
    }
}

fn status_title(status: ScanStatus) -> &'static str {
    match status {
        ScanStatus::Queued => "Queued",
        ScanStatus::Running => "Running",
        ScanStatus::Stopped => "Stopped",
        ScanStatus::Completed => "Completed",
        ScanStatus::Error => "Error",
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
