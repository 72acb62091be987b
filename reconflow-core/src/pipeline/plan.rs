use std::fmt;
use std::sync::Arc;

use super::filters::{
    AliveHostExtractor, AliveUrlExtractor, FilterStage, LineFilter, SubdomainNormalizer,
};
use super::{Pipeline, PipelineBuilder};
use crate::artifact::Artifact;
use crate::artifact::well_known::*;
use crate::config::{EngineConfig, PipelineSettings, ScanMode, StagePolicy, ToolKind, ToolSettings};
use crate::error::PipelineError;
use crate::stage::{InputPolicy, StageDescriptor, StageKind, ToolSpec, ToolStage};
use crate::target::Target;
use crate::tools;

pub const MERGE_STAGE: &str = "merge-subdomains";
pub const ALIVE_FILTER_STAGE: &str = "alive-filter";

/// Turns a target into the pipeline that will scan it.
pub trait PipelinePlanner: Send + Sync + fmt::Debug {
    /// Builds a fresh pipeline for `target`.
    fn plan(&self, target: &Target) -> Result<Pipeline, PipelineError>;

    /// Short label written to scan log headers.
    fn label(&self) -> String {
        "custom".to_string()
    }
}

/// The standard recon flow: subdomain discovery, merge, alive check and
/// filter, then everything that consumes alive hosts or URLs.
#[derive(Debug, Clone)]
pub struct ReconPipelinePlanner {
    mode: ScanMode,
    tools: ToolSettings,
    max_parallel: usize,
}

impl ReconPipelinePlanner {
    /// Validates the settings and resolves the tool set once.
    pub fn new(settings: &PipelineSettings, engine: &EngineConfig) -> crate::Result<Self> {
        settings.validate()?;
        engine.validate()?;
        Ok(Self {
            mode: settings.mode,
            tools: settings.resolve(),
            max_parallel: engine.max_parallel_stages,
        })
    }

    /// Preset the planner was built with.
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Resolved tool settings, with mode and overrides applied.
    pub fn tools(&self) -> &ToolSettings {
        &self.tools
    }

    fn tool(
        &self,
        tool: ToolKind,
        kind: StageKind,
        requires: impl IntoIterator<Item = Artifact>,
        produces: Artifact,
        spec: impl ToolSpec + 'static,
    ) -> ToolStage {
        // The alive check gates everything after it.
        let descriptor = StageDescriptor::new(tool.as_str(), kind)
            .requires(requires)
            .produces([produces])
            .blocking(kind == StageKind::AliveCheck)
            .with_policy(self.tools.policy(tool));
        ToolStage::new(descriptor, spec)
    }

    fn discovery_outputs(&self) -> Vec<Artifact> {
        [
            (ToolKind::Subfinder, SUBFINDER),
            (ToolKind::Amass, AMASS),
            (ToolKind::Sublist3r, SUBLIST3R),
        ]
        .into_iter()
        .filter(|(tool, _)| self.tools.is_enabled(*tool))
        .map(|(_, artifact)| artifact)
        .collect()
    }
}

/// The alive filter follows the blocking override of httpx.
fn filter_policy(descriptor: StageDescriptor, upstream: &StagePolicy) -> StageDescriptor {
    descriptor.blocking(upstream.blocking.unwrap_or(true))
}

impl PipelinePlanner for ReconPipelinePlanner {
    fn plan(&self, _target: &Target) -> Result<Pipeline, PipelineError> {
        let settings = &self.tools;
        let httpx_policy = settings.policy(ToolKind::Httpx);

        let builder = PipelineBuilder::default()
            .max_parallel(self.max_parallel)
            .stage(self.tool(
                ToolKind::Subfinder,
                StageKind::Discovery,
                [],
                SUBFINDER,
                tools::Subfinder::new(settings.subfinder.clone()),
            ))
            .stage(self.tool(
                ToolKind::Amass,
                StageKind::Discovery,
                [],
                AMASS,
                tools::Amass::new(settings.amass.clone()),
            ))
            .stage(self.tool(
                ToolKind::Sublist3r,
                StageKind::Discovery,
                [],
                SUBLIST3R,
                tools::Sublist3r::new(settings.sublist3r.clone()),
            ))
            .stage(
                FilterStage::new(
                    MERGE_STAGE,
                    StageKind::Transform,
                    self.discovery_outputs(),
                    vec![(SUBDOMAINS_MERGED, Arc::new(SubdomainNormalizer) as Arc<dyn LineFilter>)],
                )
                .with_descriptor(|descriptor| descriptor.blocking(true)),
            )
            .stage(self.tool(
                ToolKind::Httpx,
                StageKind::AliveCheck,
                [SUBDOMAINS_MERGED],
                HTTPX_ALIVE,
                tools::Httpx::new(settings.httpx.clone()),
            ))
            .stage(
                FilterStage::new(
                    ALIVE_FILTER_STAGE,
                    StageKind::AliveFilter,
                    [HTTPX_ALIVE],
                    vec![
                        (ALIVE_HOSTS, Arc::new(AliveHostExtractor) as Arc<dyn LineFilter>),
                        (ALIVE_URLS, Arc::new(AliveUrlExtractor) as Arc<dyn LineFilter>),
                    ],
                )
                .with_descriptor(|descriptor| filter_policy(descriptor, httpx_policy)),
            )
            .stage(self.tool(
                ToolKind::Dirsearch,
                StageKind::ContentDiscovery,
                [ALIVE_URLS],
                DIRSEARCH,
                tools::Dirsearch::new(settings.dirsearch.clone()),
            ))
            .stage(self.tool(
                ToolKind::Katana,
                StageKind::ContentDiscovery,
                [ALIVE_URLS],
                KATANA,
                tools::Katana::new(settings.katana.clone()),
            ))
            .stage(self.tool(
                ToolKind::Urlfinder,
                StageKind::ContentDiscovery,
                [ALIVE_HOSTS],
                URLFINDER,
                tools::Urlfinder::new(settings.urlfinder.clone()),
            ))
            .stage(self.tool(
                ToolKind::Waybackurls,
                StageKind::ContentDiscovery,
                [ALIVE_HOSTS],
                WAYBACKURLS,
                tools::Waybackurls::new(settings.waybackurls.clone()),
            ))
            .stage(self.tool(
                ToolKind::Waymore,
                StageKind::ContentDiscovery,
                [ALIVE_HOSTS],
                WAYMORE,
                tools::Waymore::new(settings.waymore.clone()),
            ))
            .stage(self.tool(
                ToolKind::Ffuf,
                StageKind::ContentDiscovery,
                [ALIVE_URLS],
                FFUF,
                tools::Ffuf::new(settings.ffuf.clone()),
            ))
            .stage(self.tool(
                ToolKind::Arjun,
                StageKind::ContentDiscovery,
                [ALIVE_URLS],
                ARJUN,
                tools::Arjun::new(settings.arjun.clone()),
            ))
            .stage(self.tool(
                ToolKind::Naabu,
                StageKind::PortScan,
                [ALIVE_HOSTS],
                NAABU,
                tools::Naabu::new(settings.naabu.clone()),
            ))
            .stage(self.tool(
                ToolKind::Cloudenum,
                StageKind::Cloud,
                [ALIVE_HOSTS],
                CLOUDENUM,
                tools::Cloudenum::new(settings.cloudenum.clone()),
            ))
            .stage(ToolStage::new(
                StageDescriptor::new(ToolKind::Nuclei.as_str(), StageKind::VulnScan)
                    .requires([ALIVE_HOSTS, ALIVE_URLS])
                    .input_policy(InputPolicy::AnyNonEmpty)
                    .produces([NUCLEI])
                    .with_policy(settings.policy(ToolKind::Nuclei)),
                tools::Nuclei::new(settings.nuclei.clone()),
            ));

        builder.build()
    }

    fn label(&self) -> String {
        self.mode.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner(mode: ScanMode) -> ReconPipelinePlanner {
        ReconPipelinePlanner::new(
            &PipelineSettings::default().with_mode(mode),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    fn target() -> Target {
        Target::domain("example.com").unwrap()
    }

    #[test]
    fn fast_mode_plans_the_minimal_flow() {
        let pipeline = planner(ScanMode::Fast).plan(&target()).unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec!["subfinder", "sublist3r", MERGE_STAGE, "httpx", ALIVE_FILTER_STAGE, "nuclei"]
        );
        assert_eq!(
            pipeline.dependencies_of(MERGE_STAGE),
            vec!["subfinder".to_string(), "sublist3r".to_string()]
        );
        assert_eq!(pipeline.dependencies_of("nuclei"), vec![ALIVE_FILTER_STAGE.to_string()]);
    }

    #[test]
    fn full_mode_plans_every_tool() {
        let pipeline = planner(ScanMode::Full).plan(&target()).unwrap();
        assert_eq!(pipeline.stage_names().len(), ToolKind::ALL.len() + 2);
        for tool in ["dirsearch", "katana", "ffuf", "arjun", "naabu", "waymore"] {
            assert_eq!(pipeline.dependencies_of(tool), vec![ALIVE_FILTER_STAGE.to_string()]);
        }
    }

    #[test]
    fn gating_stages_block_by_default() {
        let pipeline = planner(ScanMode::Standard).plan(&target()).unwrap();
        let blocking: Vec<&str> = pipeline
            .descriptors()
            .filter(|descriptor| descriptor.blocking)
            .map(|descriptor| descriptor.name.as_str())
            .collect();
        assert_eq!(blocking, vec![MERGE_STAGE, "httpx", ALIVE_FILTER_STAGE]);

        // Merge runs even when every discovery tool came back empty.
        for name in [MERGE_STAGE, ALIVE_FILTER_STAGE] {
            let descriptor = pipeline
                .descriptors()
                .find(|descriptor| descriptor.name == name)
                .unwrap();
            assert_eq!(descriptor.input_policy, crate::stage::InputPolicy::Always);
        }
    }

    #[test]
    fn httpx_blocking_override_applies_to_alive_filter() {
        let mut settings = PipelineSettings::default();
        settings.tools.httpx.policy.blocking = Some(false);
        let pipeline = ReconPipelinePlanner::new(&settings, &EngineConfig::default())
            .unwrap()
            .plan(&target())
            .unwrap();
        let blocking: Vec<&str> = pipeline
            .descriptors()
            .filter(|descriptor| descriptor.blocking)
            .map(|descriptor| descriptor.name.as_str())
            .collect();
        assert_eq!(blocking, vec![MERGE_STAGE]);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut settings = PipelineSettings::default();
        settings.tools.naabu.ports = None;
        settings.tools.naabu.top_ports = None;
        assert!(ReconPipelinePlanner::new(&settings, &EngineConfig::default()).is_err());
    }
}
