#![allow(dead_code)]

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reconflow_core::artifact::Artifact;
use reconflow_core::pipeline::{FilterStage, LineFilter, Pipeline, PipelinePlanner};
use reconflow_core::process::Invocation;
use reconflow_core::stage::{StageContext, StageDescriptor, StageKind, ToolSpec, ToolStage};
use reconflow_core::{
    EngineConfig, LocalArtifactStore, PipelineError, ScanId, ScanRegistry, ScanSnapshot, Target,
};
use tempfile::TempDir;

/// `sh -c <script>` with the first required input passed as `$1`.
#[derive(Debug, Clone)]
pub struct Shell {
    script: String,
}

#[async_trait]
impl ToolSpec for Shell {
    fn program(&self) -> &str {
        "sh"
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> reconflow_core::Result<Vec<Invocation>> {
        let mut argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            self.script.clone(),
            "sh".to_string(),
        ];
        if let Some(input) = ctx.descriptor.requires.first() {
            argv.push(ctx.artifact_path(input).to_string_lossy().into_owned());
        }
        let mut invocation =
            Invocation::new(ctx.descriptor.name.clone(), argv).cwd(&ctx.scan.target_dir);
        if let Some(output) = ctx.descriptor.produces.first() {
            invocation = invocation.stdout_to(ctx.artifact_path(output));
        }
        Ok(vec![invocation])
    }
}

pub fn shell(
    name: &str,
    kind: StageKind,
    requires: &[Artifact],
    produces: &[Artifact],
    script: &str,
) -> ToolStage {
    ToolStage::new(
        StageDescriptor::new(name, kind)
            .requires(requires.iter().cloned())
            .produces(produces.iter().cloned()),
        Shell {
            script: script.to_string(),
        },
    )
}

pub fn filter(
    name: &str,
    kind: StageKind,
    input: Artifact,
    output: Artifact,
    line_filter: impl LineFilter + 'static,
) -> FilterStage {
    let line_filter: Arc<dyn LineFilter> = Arc::new(line_filter);
    FilterStage::new(name, kind, [input], vec![(output, line_filter)])
}

type Build = dyn Fn() -> Result<Pipeline, PipelineError> + Send + Sync;

/// Planner that ignores the target and builds a fixed pipeline.
pub struct FixedPlanner {
    build: Box<Build>,
}

impl FixedPlanner {
    pub fn new(
        build: impl Fn() -> Result<Pipeline, PipelineError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            build: Box::new(build),
        }
    }
}

impl fmt::Debug for FixedPlanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedPlanner").finish_non_exhaustive()
    }
}

impl PipelinePlanner for FixedPlanner {
    fn plan(&self, _target: &Target) -> Result<Pipeline, PipelineError> {
        (self.build)()
    }
}

pub struct Harness {
    pub registry: ScanRegistry,
    pub output: TempDir,
}

impl Harness {
    pub fn output_root(&self) -> &Path {
        self.output.path()
    }

    pub async fn submit(&self, domain: &str) -> ScanId {
        self.registry
            .submit(Target::domain(domain).unwrap(), self.output_root())
            .await
            .unwrap()
    }
}

pub fn engine_config(output_root: &Path) -> EngineConfig {
    EngineConfig {
        output_root: output_root.to_path_buf(),
        log_dir: None,
        max_parallel_stages: 2,
        termination_grace_ms: 300,
        ..EngineConfig::default()
    }
}

pub fn harness(
    build: impl Fn() -> Result<Pipeline, PipelineError> + Send + Sync + 'static,
) -> Harness {
    let output = tempfile::tempdir().unwrap();
    let registry = ScanRegistry::new(
        engine_config(output.path()),
        Arc::new(FixedPlanner::new(build)),
        Arc::new(LocalArtifactStore::new()),
    );
    Harness { registry, output }
}

/// Polls until `check` accepts the snapshot, panicking after `limit`.
pub async fn poll_until(
    registry: &ScanRegistry,
    scan_id: ScanId,
    limit: Duration,
    check: impl Fn(&ScanSnapshot) -> bool,
) -> ScanSnapshot {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let snapshot = registry.get_status(scan_id).await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached, last snapshot: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_terminal(registry: &ScanRegistry, scan_id: ScanId) -> ScanSnapshot {
    tokio::time::timeout(Duration::from_secs(15), registry.wait(scan_id))
        .await
        .expect("scan did not finish in time")
        .unwrap()
}
