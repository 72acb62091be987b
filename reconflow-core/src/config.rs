//! Engine and pipeline settings with their defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReconError, Result};
use crate::process::ProcessRunner;

/// Engine-wide knobs: where scans write, how many stages run at once and
/// how long tools get to exit after a stop request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Root under which each scan gets its `recon_<target>` directory.
    pub output_root: PathBuf,
    /// Directory for per-scan log files. `None` keeps logs in memory only.
    pub log_dir: Option<PathBuf>,
    /// Upper bound on independent stages running at the same time in one scan.
    pub max_parallel_stages: usize,
    /// Time between SIGTERM and SIGKILL when a scan is cancelled (ms).
    pub termination_grace_ms: u64,
    /// Lines kept in the in-memory scan log.
    pub log_tail_lines: usize,
    /// Bytes kept in the in-memory scan log.
    pub log_tail_bytes: usize,
    /// Bytes of stdout/stderr kept per process for status results.
    pub output_tail_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            log_dir: Some(PathBuf::from("logs")),
            max_parallel_stages: 3,
            termination_grace_ms: 5_000,
            log_tail_lines: 2_000,
            log_tail_bytes: 256 * 1024,
            output_tail_bytes: 8 * 1024,
        }
    }
}

impl EngineConfig {
    /// Grace period between SIGTERM and SIGKILL.
    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    /// Runner configured with this engine's grace period and tail budget.
    pub fn process_runner(&self) -> ProcessRunner {
        ProcessRunner::new(self.termination_grace(), self.output_tail_bytes)
    }

    /// Rejects zero limits and an empty output root.
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_stages == 0 {
            return Err(invalid("engine.max_parallel_stages must be at least 1"));
        }
        if self.termination_grace_ms == 0 {
            return Err(invalid("engine.termination_grace_ms must be positive"));
        }
        if self.log_tail_lines == 0 || self.log_tail_bytes == 0 {
            return Err(invalid("engine log tail limits must be positive"));
        }
        if self.output_root.as_os_str().is_empty() {
            return Err(invalid("engine.output_root must not be empty"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ReconError {
    ReconError::InvalidConfig(message.into())
}

/// Every external tool the standard pipeline knows how to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// ProjectDiscovery passive subdomain enumeration.
    Subfinder,
    /// OWASP amass enumeration.
    Amass,
    /// Search-engine subdomain enumeration.
    Sublist3r,
    /// HTTP probe deciding which hosts are alive.
    Httpx,
    /// Directory brute forcing.
    Dirsearch,
    /// Crawler.
    Katana,
    /// Passive URL collection.
    Urlfinder,
    /// Web fuzzer.
    Ffuf,
    /// Port scanner.
    Naabu,
    /// HTTP parameter discovery.
    Arjun,
    /// Wayback Machine URL lookup.
    Waybackurls,
    /// Archived URL collection across several providers.
    Waymore,
    /// Cloud storage enumeration (`cloud_enum`).
    Cloudenum,
    /// Template based vulnerability scanner.
    Nuclei,
}

impl ToolKind {
    /// Every tool, in pipeline order.
    pub const ALL: [ToolKind; 14] = [
        ToolKind::Subfinder,
        ToolKind::Amass,
        ToolKind::Sublist3r,
        ToolKind::Httpx,
        ToolKind::Dirsearch,
        ToolKind::Katana,
        ToolKind::Urlfinder,
        ToolKind::Ffuf,
        ToolKind::Naabu,
        ToolKind::Arjun,
        ToolKind::Waybackurls,
        ToolKind::Waymore,
        ToolKind::Cloudenum,
        ToolKind::Nuclei,
    ];

    /// Configuration key and stage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Subfinder => "subfinder",
            ToolKind::Amass => "amass",
            ToolKind::Sublist3r => "sublist3r",
            ToolKind::Httpx => "httpx",
            ToolKind::Dirsearch => "dirsearch",
            ToolKind::Katana => "katana",
            ToolKind::Urlfinder => "urlfinder",
            ToolKind::Ffuf => "ffuf",
            ToolKind::Naabu => "naabu",
            ToolKind::Arjun => "arjun",
            ToolKind::Waybackurls => "waybackurls",
            ToolKind::Waymore => "waymore",
            ToolKind::Cloudenum => "cloudenum",
            ToolKind::Nuclei => "nuclei",
        }
    }

    /// Subdomain discovery tools feed the merge stage.
    pub fn is_discovery(&self) -> bool {
        matches!(
            self,
            ToolKind::Subfinder | ToolKind::Amass | ToolKind::Sublist3r
        )
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        ToolKind::ALL
            .into_iter()
            .find(|tool| tool.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| invalid(format!("unknown tool `{s}`")))
    }
}

/// Scan intensity presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Subdomain discovery, alive check and nuclei.
    #[serde(alias = "1")]
    Fast,
    /// `fast` plus amass.
    #[default]
    #[serde(alias = "2")]
    Standard,
    /// Every tool, including content discovery.
    #[serde(alias = "3")]
    Full,
}

impl ScanMode {
    /// Lowercase name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Fast => "fast",
            ScanMode::Standard => "standard",
            ScanMode::Full => "full",
        }
    }

    /// Whether the preset turns `tool` on.
    pub fn includes(&self, tool: ToolKind) -> bool {
        match self {
            ScanMode::Full => true,
            ScanMode::Standard => matches!(
                tool,
                ToolKind::Subfinder
                    | ToolKind::Amass
                    | ToolKind::Sublist3r
                    | ToolKind::Httpx
                    | ToolKind::Nuclei
            ),
            ScanMode::Fast => matches!(
                tool,
                ToolKind::Subfinder | ToolKind::Sublist3r | ToolKind::Httpx | ToolKind::Nuclei
            ),
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanMode {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "fast" => Ok(ScanMode::Fast),
            "2" | "standard" => Ok(ScanMode::Standard),
            "3" | "full" => Ok(ScanMode::Full),
            other => Err(invalid(format!("unknown scan mode `{other}`"))),
        }
    }
}

/// Scheduling policy shared by every stage.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StagePolicy {
    /// Disabled stages are left out of the plan.
    pub enabled: bool,
    /// Overrides the stage's built-in blocking declaration.
    pub blocking: Option<bool>,
    /// Attempts for a failing stage; 1 disables retries.
    pub max_attempts: u32,
    /// Wait between attempts (ms).
    pub retry_backoff_ms: u64,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            blocking: None,
            max_attempts: 1,
            retry_backoff_ms: 2_000,
        }
    }
}

/// `[pipeline.tools.subfinder]`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubfinderSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// Adds `-recursive` when scanning a domain list.
    pub recursive_for_lists: bool,
}

impl Default for SubfinderSettings {
    fn default() -> Self {
        Self {
            policy: StagePolicy::default(),
            recursive_for_lists: true,
        }
    }
}

/// `[pipeline.tools.amass]`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AmassSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// Passed as `-config` when set.
    pub config_file: Option<PathBuf>,
    /// Passive sources only.
    pub passive: bool,
    /// Zone transfers and certificate grabbing.
    pub active: bool,
    /// DNS brute forcing with `wordlist`.
    pub bruteforce: bool,
    /// Explicit brute force wordlist.
    pub wordlist: Option<PathBuf>,
    /// Fallback wordlists tried in order when `wordlist` is unset.
    pub wordlist_candidates: Vec<PathBuf>,
}

impl Default for AmassSettings {
    fn default() -> Self {
        Self {
            policy: StagePolicy::default(),
            config_file: None,
            passive: true,
            active: false,
            bruteforce: false,
            wordlist: None,
            wordlist_candidates: vec![PathBuf::from("db/wordlists/DNS/subdomains.txt")],
        }
    }
}

/// `[pipeline.tools.sublist3r]`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Sublist3rSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// Enables the subbrute module.
    pub bruteforce: bool,
    /// Real-time results in the scan log.
    pub verbose: bool,
    /// Brute force threads.
    pub threads: Option<u32>,
    /// Comma separated search engines.
    pub engines: Option<String>,
}

/// `[pipeline.tools.httpx]`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpxSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// Binary name; some distributions ship it as `httpx-toolkit`.
    pub binary: String,
    /// Appended after `-silent`.
    pub extra_args: Vec<String>,
}

impl Default for HttpxSettings {
    fn default() -> Self {
        Self {
            policy: StagePolicy::default(),
            binary: "httpx".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// `[pipeline.tools.dirsearch]`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DirsearchSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// Custom wordlist; dirsearch's own list otherwise.
    pub wordlist: Option<PathBuf>,
    /// Worker threads.
    pub threads: u32,
    /// Requests per second.
    pub max_rate: Option<u32>,
    /// `-e` value.
    pub extensions: String,
    /// Status codes kept in the report.
    pub match_codes: String,
}

impl Default for DirsearchSettings {
    fn default() -> Self {
        Self {
            policy: StagePolicy::default(),
            wordlist: None,
            threads: 5,
            max_rate: Some(30),
            extensions: "all".to_string(),
            match_codes: "200,301,302,403,405,500".to_string(),
        }
    }
}

/// `[pipeline.tools.katana]`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KatanaSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// Crawl depth.
    pub depth: u32,
    /// Requests per second.
    pub rate_limit: u32,
    /// Parses JavaScript for endpoints.
    pub js_crawl: bool,
}

impl Default for KatanaSettings {
    fn default() -> Self {
        Self {
            policy: StagePolicy::default(),
            depth: 3,
            rate_limit: 10,
            js_crawl: true,
        }
    }
}

/// `[pipeline.tools.urlfinder]`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UrlfinderSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// Requests per second.
    pub rate_limit: u32,
}

impl Default for UrlfinderSettings {
    fn default() -> Self {
        Self {
            policy: StagePolicy::default(),
            rate_limit: 20,
        }
    }
}

/// `[pipeline.tools.waybackurls]`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WaybackurlsSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// Alive hosts looked up per scan; 0 means all.
    pub max_domains: usize,
}

impl Default for WaybackurlsSettings {
    fn default() -> Self {
        Self {
            policy: StagePolicy::default(),
            max_domains: 10,
        }
    }
}

/// `[pipeline.tools.waymore]`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WaymoreSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// `-mode` value; `U` collects URLs only.
    pub mode: String,
    /// Result limit per provider.
    pub limit: u32,
    /// Root domains processed per scan.
    pub max_domains: usize,
}

impl Default for WaymoreSettings {
    fn default() -> Self {
        Self {
            policy: StagePolicy::default(),
            mode: "U".to_string(),
            limit: 200,
            max_domains: 5,
        }
    }
}

/// `[pipeline.tools.ffuf]`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FfufSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// Explicit wordlist. Without one (and no candidate on disk) the stage is skipped.
    pub wordlist: Option<PathBuf>,
    /// Fallback wordlists tried in order.
    pub wordlist_candidates: Vec<PathBuf>,
    /// Worker threads.
    pub threads: u32,
    /// `-mc` value.
    pub match_codes: String,
    /// Per-request timeout.
    pub timeout_secs: u32,
    /// Requests per second.
    pub rate: Option<u32>,
    /// `-e` value.
    pub extensions: Option<String>,
    /// Recurses into discovered directories.
    pub recursion: bool,
    /// Only used with `recursion`.
    pub recursion_depth: u32,
    /// Cap on URLs fuzzed per scan.
    pub max_urls: usize,
}

impl Default for FfufSettings {
    fn default() -> Self {
        Self {
            policy: StagePolicy::default(),
            wordlist: None,
            wordlist_candidates: vec![PathBuf::from(
                "db/wordlists/WebContent/wordlists_001.txt",
            )],
            threads: 50,
            match_codes: "200,204,301,302,307,401,403,500".to_string(),
            timeout_secs: 10,
            rate: None,
            extensions: None,
            recursion: false,
            recursion_depth: 1,
            max_urls: 20,
        }
    }
}

/// `[pipeline.tools.naabu]`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NaabuSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// Explicit port list.
    pub ports: Option<String>,
    /// Takes precedence over `ports` when set.
    pub top_ports: Option<u32>,
    /// Ports never scanned.
    pub exclude_ports: Option<String>,
    /// Packets per second.
    pub rate: u32,
    /// Probe retries per port.
    pub retries: u32,
    /// Re-checks open ports with a TCP connect.
    pub verify: bool,
}

impl Default for NaabuSettings {
    fn default() -> Self {
        Self {
            policy: StagePolicy::default(),
            ports: Some("80,443,8080,8443,3000,8000,8888,9000".to_string()),
            top_ports: None,
            exclude_ports: None,
            rate: 1_000,
            retries: 2,
            verify: false,
        }
    }
}

/// `[pipeline.tools.arjun]`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArjunSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// Parameter wordlist; arjun's default otherwise.
    pub wordlist: Option<PathBuf>,
    /// HTTP method used for probing.
    pub method: String,
    /// Worker threads.
    pub threads: u32,
    /// Per-request timeout.
    pub timeout_secs: u32,
    /// Parameters always sent.
    pub include: Option<String>,
    /// Parameters never tried.
    pub exclude: Option<String>,
}

impl Default for ArjunSettings {
    fn default() -> Self {
        Self {
            policy: StagePolicy::default(),
            wordlist: None,
            method: "GET".to_string(),
            threads: 10,
            timeout_secs: 10,
            include: None,
            exclude: None,
        }
    }
}

/// `[pipeline.tools.cloudenum]`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CloudenumSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// Binary name on `PATH`.
    pub binary: String,
    /// Keywords derived from the target, at most this many.
    pub max_keywords: usize,
}

impl Default for CloudenumSettings {
    fn default() -> Self {
        Self {
            policy: StagePolicy::default(),
            binary: "cloud_enum".to_string(),
            max_keywords: 10,
        }
    }
}

/// `[pipeline.tools.nuclei]`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NucleiSettings {
    /// Shared scheduling policy.
    #[serde(flatten)]
    pub policy: StagePolicy,
    /// Templates run in parallel.
    pub concurrency: u32,
    /// Requests per second.
    pub rate_limit: u32,
    /// Runs the exposure templates against alive URLs as a second pass.
    pub exposures: bool,
    /// Template path used by the exposure pass.
    pub exposure_templates: String,
    /// Extra target list scanned as a third pass.
    pub extra_targets: Option<PathBuf>,
}

impl Default for NucleiSettings {
    fn default() -> Self {
        Self {
            policy: StagePolicy::default(),
            concurrency: 20,
            rate_limit: 10,
            exposures: true,
            exposure_templates: "http/exposures/".to_string(),
            extra_targets: None,
        }
    }
}

/// Typed per-tool settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolSettings {
    /// `[pipeline.tools.subfinder]`
    pub subfinder: SubfinderSettings,
    /// `[pipeline.tools.amass]`
    pub amass: AmassSettings,
    /// `[pipeline.tools.sublist3r]`
    pub sublist3r: Sublist3rSettings,
    /// `[pipeline.tools.httpx]`
    pub httpx: HttpxSettings,
    /// `[pipeline.tools.dirsearch]`
    pub dirsearch: DirsearchSettings,
    /// `[pipeline.tools.katana]`
    pub katana: KatanaSettings,
    /// `[pipeline.tools.urlfinder]`
    pub urlfinder: UrlfinderSettings,
    /// `[pipeline.tools.ffuf]`
    pub ffuf: FfufSettings,
    /// `[pipeline.tools.naabu]`
    pub naabu: NaabuSettings,
    /// `[pipeline.tools.arjun]`
    pub arjun: ArjunSettings,
    /// `[pipeline.tools.waybackurls]`
    pub waybackurls: WaybackurlsSettings,
    /// `[pipeline.tools.waymore]`
    pub waymore: WaymoreSettings,
    /// `[pipeline.tools.cloudenum]`
    pub cloudenum: CloudenumSettings,
    /// `[pipeline.tools.nuclei]`
    pub nuclei: NucleiSettings,
}

impl ToolSettings {
    /// Scheduling policy of `tool`.
    pub fn policy(&self, tool: ToolKind) -> &StagePolicy {
        match tool {
            ToolKind::Subfinder => &self.subfinder.policy,
            ToolKind::Amass => &self.amass.policy,
            ToolKind::Sublist3r => &self.sublist3r.policy,
            ToolKind::Httpx => &self.httpx.policy,
            ToolKind::Dirsearch => &self.dirsearch.policy,
            ToolKind::Katana => &self.katana.policy,
            ToolKind::Urlfinder => &self.urlfinder.policy,
            ToolKind::Ffuf => &self.ffuf.policy,
            ToolKind::Naabu => &self.naabu.policy,
            ToolKind::Arjun => &self.arjun.policy,
            ToolKind::Waybackurls => &self.waybackurls.policy,
            ToolKind::Waymore => &self.waymore.policy,
            ToolKind::Cloudenum => &self.cloudenum.policy,
            ToolKind::Nuclei => &self.nuclei.policy,
        }
    }

    /// Mutable scheduling policy of `tool`.
    pub fn policy_mut(&mut self, tool: ToolKind) -> &mut StagePolicy {
        match tool {
            ToolKind::Subfinder => &mut self.subfinder.policy,
            ToolKind::Amass => &mut self.amass.policy,
            ToolKind::Sublist3r => &mut self.sublist3r.policy,
            ToolKind::Httpx => &mut self.httpx.policy,
            ToolKind::Dirsearch => &mut self.dirsearch.policy,
            ToolKind::Katana => &mut self.katana.policy,
            ToolKind::Urlfinder => &mut self.urlfinder.policy,
            ToolKind::Ffuf => &mut self.ffuf.policy,
            ToolKind::Naabu => &mut self.naabu.policy,
            ToolKind::Arjun => &mut self.arjun.policy,
            ToolKind::Waybackurls => &mut self.waybackurls.policy,
            ToolKind::Waymore => &mut self.waymore.policy,
            ToolKind::Cloudenum => &mut self.cloudenum.policy,
            ToolKind::Nuclei => &mut self.nuclei.policy,
        }
    }

    /// Whether `tool` ends up in the plan.
    pub fn is_enabled(&self, tool: ToolKind) -> bool {
        self.policy(tool).enabled
    }
}

/// What the standard pipeline runs and how.
///
/// Tool toggles resolve in order: per-tool `enabled`, then the scan mode,
/// then explicit `tools_enabled` overrides.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Preset selecting the default tool set.
    pub mode: ScanMode,
    /// Explicit on/off switches that win over the mode.
    pub tools_enabled: BTreeMap<ToolKind, bool>,
    /// Per-tool options.
    pub tools: ToolSettings,
}

impl PipelineSettings {
    /// Same settings under another preset.
    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    /// Tool settings with mode and overrides applied.
    pub fn resolve(&self) -> ToolSettings {
        let mut tools = self.tools.clone();
        for tool in ToolKind::ALL {
            let policy = tools.policy_mut(tool);
            policy.enabled = match self.tools_enabled.get(&tool) {
                Some(enabled) => *enabled,
                None => policy.enabled && self.mode.includes(tool),
            };
        }
        tools
    }

    /// Checks the resolved tool set. At least one discovery tool must be
    /// enabled, attempt and thread counts must be positive and naabu needs ports.
    pub fn validate(&self) -> Result<()> {
        let tools = self.resolve();
        if !ToolKind::ALL
            .into_iter()
            .any(|tool| tool.is_discovery() && tools.is_enabled(tool))
        {
            return Err(invalid("at least one subdomain discovery tool must be enabled"));
        }

        for tool in ToolKind::ALL {
            if tools.policy(tool).max_attempts == 0 {
                return Err(invalid(format!("{tool}.max_attempts must be at least 1")));
            }
        }

        let thread_counts = [
            ("dirsearch.threads", tools.dirsearch.threads),
            ("ffuf.threads", tools.ffuf.threads),
            ("arjun.threads", tools.arjun.threads),
            ("nuclei.concurrency", tools.nuclei.concurrency),
            ("katana.depth", tools.katana.depth),
        ];
        if let Some((name, _)) = thread_counts.iter().find(|(_, value)| *value == 0) {
            return Err(invalid(format!("{name} must be positive")));
        }
        if tools.naabu.ports.is_none() && tools.naabu.top_ports.is_none() {
            return Err(invalid("naabu needs either ports or top_ports"));
        }
        Ok(())
    }
}
