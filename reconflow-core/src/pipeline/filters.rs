//! Deterministic, idempotent line transforms that derive later stage inputs
//! from earlier outputs.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use url::Url;

use crate::artifact::Artifact;
use crate::stage::{InputPolicy, Stage, StageContext, StageDescriptor, StageKind, StageResult};

/// Pure transformation of artifact lines.
pub trait LineFilter: Send + Sync + fmt::Debug {
    /// Name written to the scan log.
    fn name(&self) -> &'static str;

    /// Must be deterministic and satisfy `apply(apply(x)) == apply(x)`.
    fn apply(&self, lines: &[String]) -> Vec<String>;
}

/// Lowercased, deduplicated and sorted host names from raw discovery output.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubdomainNormalizer;

impl SubdomainNormalizer {
    /// One raw line to a bare lowercase host name, or `None` when it is not one.
    pub fn normalize(line: &str) -> Option<String> {
        let mut host = line.trim().to_ascii_lowercase();
        for scheme in ["https://", "http://"] {
            if let Some(rest) = host.strip_prefix(scheme) {
                host = rest.to_string();
                break;
            }
        }
        if let Some(end) = host.find(['/', '?', '#', ':']) {
            host.truncate(end);
        }
        let host = host.trim_start_matches("*.").trim_end_matches('.');
        let valid = !host.is_empty()
            && host.contains('.')
            && !host.starts_with('.')
            && !host.chars().any(char::is_whitespace);
        valid.then(|| host.to_string())
    }
}

impl LineFilter for SubdomainNormalizer {
    fn name(&self) -> &'static str {
        "subdomains"
    }

    fn apply(&self, lines: &[String]) -> Vec<String> {
        lines
            .iter()
            .filter_map(|line| Self::normalize(line))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn first_token_as_url(line: &str) -> Option<(String, Url)> {
    let token = line.split_whitespace().next()?;
    let candidate = if token.contains("://") {
        token.to_string()
    } else {
        format!("https://{token}")
    };
    let url = Url::parse(&candidate).ok()?;
    url.host_str()?;
    Some((candidate, url))
}

/// `host[:port]` of every alive httpx line, sorted and deduplicated.
#[derive(Debug, Clone, Copy, Default)]
pub struct AliveHostExtractor;

impl LineFilter for AliveHostExtractor {
    fn name(&self) -> &'static str {
        "alive-hosts"
    }

    fn apply(&self, lines: &[String]) -> Vec<String> {
        lines
            .iter()
            .filter_map(|line| first_token_as_url(line))
            .filter_map(|(_, url)| {
                let host = url.host_str()?.to_ascii_lowercase();
                Some(match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host,
                })
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Alive URLs with a scheme, first occurrence order kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct AliveUrlExtractor;

impl LineFilter for AliveUrlExtractor {
    fn name(&self) -> &'static str {
        "alive-urls"
    }

    fn apply(&self, lines: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        lines
            .iter()
            .filter_map(|line| first_token_as_url(line))
            .map(|(candidate, _)| candidate)
            .filter(|candidate| seen.insert(candidate.clone()))
            .collect()
    }
}

/// Reads every required input that exists, runs each filter over the
/// combined lines and writes one output per filter. Always emits its
/// outputs, empty ones included, so dependents skip instead of failing.
#[derive(Debug)]
pub struct FilterStage {
    descriptor: StageDescriptor,
    outputs: Vec<(Artifact, Arc<dyn LineFilter>)>,
}

impl FilterStage {
    /// Filter stage reading `inputs` and writing one artifact per filter.
    pub fn new(
        name: impl Into<String>,
        kind: StageKind,
        inputs: impl IntoIterator<Item = Artifact>,
        outputs: Vec<(Artifact, Arc<dyn LineFilter>)>,
    ) -> Self {
        let descriptor = StageDescriptor::new(name, kind)
            .requires(inputs)
            .produces(outputs.iter().map(|(artifact, _)| artifact.clone()))
            .input_policy(InputPolicy::Always);
        Self {
            descriptor,
            outputs,
        }
    }

    /// Adjusts the generated descriptor, e.g. to make the stage blocking.
    pub fn with_descriptor(
        mut self,
        update: impl FnOnce(StageDescriptor) -> StageDescriptor,
    ) -> Self {
        self.descriptor = update(self.descriptor);
        self
    }
}

#[async_trait]
impl Stage for FilterStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &StageContext<'_>) -> StageResult {
        let started = Instant::now();
        let mut lines = Vec::new();
        for input in &self.descriptor.requires {
            match ctx.read_lines(input).await {
                Ok(mut chunk) => lines.append(&mut chunk),
                Err(err) => {
                    return StageResult::failed(format!("cannot read {input}: {err}"))
                        .with_duration(started.elapsed());
                }
            }
        }

        let mut summary = Vec::with_capacity(self.outputs.len());
        for (artifact, filter) in &self.outputs {
            let derived = filter.apply(&lines);
            let path = ctx.artifact_path(artifact);
            if let Err(err) = ctx.scan.store.write_lines(&path, &derived).await {
                return StageResult::failed(format!("cannot write {artifact}: {err}"))
                    .with_duration(started.elapsed());
            }
            summary.push(format!("{artifact}={}", derived.len()));
        }

        let detail = format!("{} input lines -> {}", lines.len(), summary.join(", "));
        ctx.scan
            .note(format!("[{}] {detail}", self.descriptor.name))
            .await;
        StageResult::completed()
            .with_detail(detail)
            .with_duration(started.elapsed())
    }
}
