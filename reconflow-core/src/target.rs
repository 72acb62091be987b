//! Scan targets and the output directory they resolve to.

use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ScanControlError;

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$")
        .expect("domain pattern is valid")
});

/// What a scan runs against. Immutable once the scan exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Target {
    /// One lowercased domain.
    Domain(String),
    /// A file with one domain per line.
    DomainList(PathBuf),
}

/// Wire-level discriminator used by callers that pass a raw target string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    /// A single domain.
    Domain,
    /// Path to a domain list file.
    DomainList,
}

impl Target {
    /// Parses a single domain. Surrounding whitespace is ignored and the
    /// domain is lowercased.
    pub fn domain(raw: &str) -> Result<Self, ScanControlError> {
        let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            return Err(ScanControlError::InvalidTarget(
                "target is empty".to_string(),
            ));
        }
        if domain.len() > 253 || !DOMAIN_RE.is_match(&domain) {
            return Err(ScanControlError::InvalidTarget(format!(
                "`{}` is not a valid domain",
                raw.trim()
            )));
        }
        Ok(Target::Domain(domain))
    }

    /// References a newline separated list of domains on disk. The file is
    /// checked when the scan is submitted, see [`Target::verify`].
    pub fn domain_list(path: impl Into<PathBuf>) -> Result<Self, ScanControlError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(ScanControlError::InvalidTarget(
                "domain list path is empty".to_string(),
            ));
        }
        let has_stem = path
            .file_stem()
            .map(|stem| !sanitize(&stem.to_string_lossy()).trim_matches('_').is_empty())
            .unwrap_or(false);
        if !has_stem {
            return Err(ScanControlError::InvalidTarget(format!(
                "{} has no usable file name",
                path.display()
            )));
        }
        Ok(Target::DomainList(path))
    }

    /// Validates `raw` as a target of the given kind.
    pub fn parse(kind: TargetKind, raw: &str) -> Result<Self, ScanControlError> {
        match kind {
            TargetKind::Domain => Self::domain(raw),
            TargetKind::DomainList => Self::domain_list(raw.trim()),
        }
    }

    /// Discriminator matching this target.
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Domain(_) => TargetKind::Domain,
            Target::DomainList(_) => TargetKind::DomainList,
        }
    }

    /// Filesystem-level checks that cannot run at parse time: a domain list
    /// must exist and be non-empty.
    pub async fn verify(&self) -> Result<(), ScanControlError> {
        let Target::DomainList(path) = self else {
            return Ok(());
        };
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
            Ok(_) => Err(ScanControlError::InvalidTarget(format!(
                "{} is empty or not a file",
                path.display()
            ))),
            Err(err) => Err(ScanControlError::InvalidTarget(format!(
                "cannot read {}: {err}",
                path.display()
            ))),
        }
    }

    /// Stem used for artifact names: `example_com` for `example.com`, the
    /// sanitised file stem for a list.
    pub fn base_name(&self) -> String {
        match self {
            Target::Domain(domain) => domain.replace('.', "_"),
            Target::DomainList(path) => path
                .file_stem()
                .map(|stem| sanitize(&stem.to_string_lossy()))
                .unwrap_or_else(|| "targets".to_string()),
        }
    }

    /// `output_root/recon_<base>`.
    pub fn target_dir(&self, output_root: &Path) -> PathBuf {
        output_root.join(format!("recon_{}", self.base_name()))
    }

    /// Every domain this target names. Lines of a list are trimmed,
    /// lowercased and deduplicated in order; comments and blanks are dropped.
    pub async fn domains(&self) -> std::io::Result<Vec<String>> {
        match self {
            Target::Domain(domain) => Ok(vec![domain.clone()]),
            Target::DomainList(path) => {
                let raw = tokio::fs::read(path).await?;
                let text = String::from_utf8_lossy(&raw);
                let mut seen = std::collections::HashSet::new();
                Ok(text
                    .lines()
                    .map(|line| line.trim().to_ascii_lowercase())
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .filter(|line| seen.insert(line.clone()))
                    .collect())
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Domain(domain) => f.write_str(domain),
            Target::DomainList(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_and_normalises_domains() {
        let target = Target::domain("  Example.COM ").unwrap();
        assert_eq!(target, Target::Domain("example.com".into()));
        assert_eq!(target.base_name(), "example_com");
        assert_eq!(
            target.target_dir(Path::new("/srv/out")),
            PathBuf::from("/srv/out/recon_example_com")
        );
    }

    #[test]
    fn rejects_malformed_domains() {
        for raw in [
            "",
            "   ",
            "localhost",
            "https://example.com",
            "exa mple.com",
            "-bad.com",
            "a..b.com",
        ] {
            assert!(
                matches!(Target::domain(raw), Err(ScanControlError::InvalidTarget(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn list_base_name_is_sanitised_stem() {
        let target = Target::domain_list("/tmp/scope list (1).txt").unwrap();
        assert_eq!(target.base_name(), "scope_list__1_");
        assert!(Target::domain_list("").is_err());
    }

    #[tokio::test]
    async fn verify_requires_non_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.txt");
        tokio::fs::write(&empty, b"").await.unwrap();
        let missing = dir.path().join("missing.txt");
        let good = dir.path().join("scope.txt");
        tokio::fs::write(&good, b"a.example.com\n# note\n\nA.example.com\nb.example.com\n")
            .await
            .unwrap();

        assert!(Target::domain_list(&empty).unwrap().verify().await.is_err());
        assert!(Target::domain_list(&missing).unwrap().verify().await.is_err());

        let target = Target::domain_list(&good).unwrap();
        target.verify().await.unwrap();
        assert_eq!(
            target.domains().await.unwrap(),
            vec!["a.example.com".to_string(), "b.example.com".to_string()]
        );
    }
}
