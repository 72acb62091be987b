use async_trait::async_trait;

use super::{path_arg, resolve_wordlist};
use crate::artifact::well_known::{AMASS, SUBFINDER, SUBLIST3R};
use crate::config::{AmassSettings, SubfinderSettings, Sublist3rSettings};
use crate::process::Invocation;
use crate::stage::{StageContext, ToolSpec};
use crate::target::Target;

/// Passive subdomain enumeration.
#[derive(Debug, Clone)]
pub struct Subfinder {
    settings: SubfinderSettings,
}

impl Subfinder {
    /// Builds the command with `settings`.
    pub fn new(settings: SubfinderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Subfinder {
    fn program(&self) -> &str {
        "subfinder"
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let mut argv = vec!["subfinder".to_string()];
        match &ctx.scan.target {
            Target::Domain(domain) => argv.extend(["-d".to_string(), domain.clone()]),
            Target::DomainList(path) => argv.extend(["-dL".to_string(), path_arg(path)]),
        }
        argv.extend(["-all".to_string(), "-silent".to_string()]);
        if matches!(ctx.scan.target, Target::DomainList(_)) && self.settings.recursive_for_lists {
            argv.push("-recursive".to_string());
        }
        Ok(vec![
            Invocation::new("subfinder", argv).stdout_to(ctx.artifact_path(&SUBFINDER)),
        ])
    }
}

/// amass writes its own output file.
#[derive(Debug, Clone)]
pub struct Amass {
    settings: AmassSettings,
}

impl Amass {
    /// Builds the command with `settings`.
    pub fn new(settings: AmassSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Amass {
    fn program(&self) -> &str {
        "amass"
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let settings = &self.settings;
        let mut argv = vec!["amass".to_string(), "enum".to_string()];
        if let Some(config) = &settings.config_file
            && tokio::fs::try_exists(config).await.unwrap_or(false)
        {
            argv.extend(["-config".to_string(), path_arg(config)]);
        }
        match &ctx.scan.target {
            Target::Domain(domain) => argv.extend(["-d".to_string(), domain.clone()]),
            Target::DomainList(path) => argv.extend(["-df".to_string(), path_arg(path)]),
        }
        if settings.passive {
            argv.push("-passive".to_string());
        } else if settings.active {
            argv.push("-active".to_string());
        }
        if settings.bruteforce {
            argv.push("-brute".to_string());
            if let Some(wordlist) =
                resolve_wordlist(settings.wordlist.as_deref(), &settings.wordlist_candidates).await
            {
                argv.extend(["-w".to_string(), path_arg(&wordlist)]);
            }
        }
        argv.extend(["-o".to_string(), path_arg(&ctx.artifact_path(&AMASS))]);
        Ok(vec![Invocation::new("amass", argv)])
    }
}

/// One sublist3r run per domain, each into its own file under `sublist3r/`.
#[derive(Debug, Clone)]
pub struct Sublist3r {
    settings: Sublist3rSettings,
}

impl Sublist3r {
    /// Builds the command with `settings`.
    pub fn new(settings: Sublist3rSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Sublist3r {
    fn program(&self) -> &str {
        "sublist3r"
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let dir = ctx.artifact_path(&SUBLIST3R);
        ctx.scan.store.ensure_dir(&dir).await?;

        let settings = &self.settings;
        let domains = ctx.scan.target.domains().await?;
        Ok(domains
            .into_iter()
            .map(|domain| {
                let output = dir.join(format!("sublist3r_{}.txt", domain.replace('.', "_")));
                let mut argv = vec![
                    "sublist3r".to_string(),
                    "-d".to_string(),
                    domain.clone(),
                    "-n".to_string(),
                    "-o".to_string(),
                    path_arg(&output),
                ];
                if settings.bruteforce {
                    argv.push("-b".to_string());
                }
                if settings.verbose {
                    argv.push("-v".to_string());
                }
                if let Some(threads) = settings.threads {
                    argv.extend(["-t".to_string(), threads.to_string()]);
                }
                if let Some(engines) = &settings.engines {
                    argv.extend(["-e".to_string(), engines.clone()]);
                }
                Invocation::new(format!("sublist3r:{domain}"), argv)
            })
            .collect())
    }
}
