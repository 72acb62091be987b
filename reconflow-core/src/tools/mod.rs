//! Argument construction for the external recon tools, plus `PATH`
//! availability checks.

mod content;
mod discovery;
mod probe;
mod vuln;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{ToolKind, ToolSettings};

pub use content::{Arjun, Dirsearch, Ffuf, Katana, Urlfinder, Waybackurls, Waymore};
pub use discovery::{Amass, Subfinder, Sublist3r};
pub use probe::{Httpx, Naabu};
pub use vuln::{Cloudenum, Nuclei};

/// Binary the pipeline will invoke for `tool` under `settings`.
pub fn program_for(tool: ToolKind, settings: &ToolSettings) -> String {
    match tool {
        ToolKind::Httpx => settings.httpx.binary.clone(),
        ToolKind::Cloudenum => settings.cloudenum.binary.clone(),
        other => other.as_str().to_string(),
    }
}

/// Whether one tool is enabled and where it resolves on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolAvailability {
    /// Which tool.
    pub tool: ToolKind,
    /// Binary name looked up.
    pub program: String,
    /// Enabled for the configured mode.
    pub enabled: bool,
    /// Resolved location, `None` when missing.
    pub path: Option<PathBuf>,
}

impl ToolAvailability {
    /// True when the binary was found.
    pub fn installed(&self) -> bool {
        self.path.is_some()
    }
}

/// Looks every tool up on `PATH`.
pub fn availability(settings: &ToolSettings) -> Vec<ToolAvailability> {
    ToolKind::ALL
        .into_iter()
        .map(|tool| {
            let program = program_for(tool, settings);
            ToolAvailability {
                tool,
                path: which::which(&program).ok(),
                program,
                enabled: settings.is_enabled(tool),
            }
        })
        .collect()
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Configured wordlist, else the first candidate that exists.
pub(crate) async fn resolve_wordlist(
    configured: Option<&Path>,
    candidates: &[PathBuf],
) -> Option<PathBuf> {
    if let Some(path) = configured {
        return tokio::fs::try_exists(path)
            .await
            .unwrap_or(false)
            .then(|| path.to_path_buf());
    }
    for candidate in candidates {
        if tokio::fs::try_exists(candidate).await.unwrap_or(false) {
            return Some(candidate.clone());
        }
    }
    None
}

const TWO_PART_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "com.au", "net.au", "org.au", "co.nz", "co.jp",
    "co.kr", "co.in", "com.br", "com.cn", "com.mx", "com.tr", "com.sg", "co.za",
];

/// Registrable domain of `host`: `www.example.co.uk` -> `example.co.uk`.
pub fn root_domain(host: &str) -> Option<String> {
    let host = host
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split(['/', ':']).next()?.trim_end_matches('.');
    let parts: Vec<&str> = host.split('.').filter(|part| !part.is_empty()).collect();
    if parts.len() < 2 {
        return None;
    }
    let last_two = parts[parts.len() - 2..].join(".");
    let take = if parts.len() >= 3 && TWO_PART_SUFFIXES.contains(&last_two.as_str()) {
        3
    } else {
        2
    };
    Some(parts[parts.len() - take..].join(".").to_ascii_lowercase())
}

/// Distinct root domains of `hosts`, first occurrence order, at most `limit`
/// (0 means unlimited).
pub(crate) fn root_domains(hosts: &[String], limit: usize) -> Vec<String> {
    let mut roots: Vec<String> = Vec::new();
    for root in hosts.iter().filter_map(|host| root_domain(host)) {
        if !roots.contains(&root) {
            roots.push(root);
        }
        if limit > 0 && roots.len() >= limit {
            break;
        }
    }
    roots
}
