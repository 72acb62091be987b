use std::collections::HashSet;

use async_trait::async_trait;

use super::{path_arg, resolve_wordlist, root_domains};
use crate::artifact::well_known::{
    ALIVE_HOSTS, ALIVE_URLS, ARJUN, DIRSEARCH, FFUF, KATANA, URLFINDER, WAYBACKURLS, WAYMORE,
};
use crate::config::{
    ArjunSettings, DirsearchSettings, FfufSettings, KatanaSettings, UrlfinderSettings,
    WaybackurlsSettings, WaymoreSettings,
};
use crate::process::Invocation;
use crate::stage::{StageContext, ToolSpec};
use crate::target::sanitize;

/// Directory brute force against every alive URL.
#[derive(Debug, Clone)]
pub struct Dirsearch {
    settings: DirsearchSettings,
}

impl Dirsearch {
    /// Builds the command with `settings`.
    pub fn new(settings: DirsearchSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Dirsearch {
    fn program(&self) -> &str {
        "dirsearch"
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let settings = &self.settings;
        let mut argv = vec![
            "dirsearch".to_string(),
            "-l".to_string(),
            path_arg(&ctx.artifact_path(&ALIVE_URLS)),
            "-e".to_string(),
            settings.extensions.clone(),
            "-t".to_string(),
            settings.threads.to_string(),
            "-i".to_string(),
            settings.match_codes.clone(),
            "-o".to_string(),
            path_arg(&ctx.artifact_path(&DIRSEARCH)),
        ];
        if let Some(rate) = settings.max_rate {
            argv.extend(["--max-rate".to_string(), rate.to_string()]);
        }
        if let Some(wordlist) = resolve_wordlist(settings.wordlist.as_deref(), &[]).await {
            argv.extend(["-w".to_string(), path_arg(&wordlist)]);
        }
        Ok(vec![Invocation::new("dirsearch", argv)])
    }
}

/// Crawler run over the alive URL list.
#[derive(Debug, Clone)]
pub struct Katana {
    settings: KatanaSettings,
}

impl Katana {
    /// Builds the command with `settings`.
    pub fn new(settings: KatanaSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Katana {
    fn program(&self) -> &str {
        "katana"
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let mut argv = vec![
            "katana".to_string(),
            "-list".to_string(),
            path_arg(&ctx.artifact_path(&ALIVE_URLS)),
            "-d".to_string(),
            self.settings.depth.to_string(),
            "-rl".to_string(),
            self.settings.rate_limit.to_string(),
        ];
        if self.settings.js_crawl {
            argv.push("-jc".to_string());
        }
        argv.extend(["-o".to_string(), path_arg(&ctx.artifact_path(&KATANA))]);
        Ok(vec![Invocation::new("katana", argv)])
    }
}

/// Passive URL discovery per alive host.
#[derive(Debug, Clone)]
pub struct Urlfinder {
    settings: UrlfinderSettings,
}

impl Urlfinder {
    /// Builds the command with `settings`.
    pub fn new(settings: UrlfinderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Urlfinder {
    fn program(&self) -> &str {
        "urlfinder"
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let argv = vec![
            "urlfinder".to_string(),
            "-list".to_string(),
            path_arg(&ctx.artifact_path(&ALIVE_HOSTS)),
            "-all".to_string(),
            "-rl".to_string(),
            self.settings.rate_limit.to_string(),
        ];
        Ok(vec![
            Invocation::new("urlfinder", argv).stdout_to(ctx.artifact_path(&URLFINDER)),
        ])
    }
}

/// waybackurls reads domains on stdin.
#[derive(Debug, Clone)]
pub struct Waybackurls {
    settings: WaybackurlsSettings,
}

impl Waybackurls {
    /// Builds the command with `settings`.
    pub fn new(settings: WaybackurlsSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Waybackurls {
    fn program(&self) -> &str {
        "waybackurls"
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let mut seen = HashSet::new();
        let mut hosts: Vec<String> = ctx
            .read_lines(&ALIVE_HOSTS)
            .await?
            .into_iter()
            .map(|host| host.split(':').next().unwrap_or_default().to_string())
            .filter(|host| !host.is_empty() && seen.insert(host.clone()))
            .collect();
        if self.settings.max_domains > 0 {
            hosts.truncate(self.settings.max_domains);
        }
        if hosts.is_empty() {
            return Ok(Vec::new());
        }

        let input = ctx
            .scan
            .target_dir
            .join(format!(".waybackurls_input_{}.txt", ctx.scan.base_name));
        ctx.scan.store.write_lines(&input, &hosts).await?;
        Ok(vec![
            Invocation::new("waybackurls", ["waybackurls"])
                .stdin_from(input)
                .stdout_to(ctx.artifact_path(&WAYBACKURLS)),
        ])
    }
}

/// One waymore run per root domain.
#[derive(Debug, Clone)]
pub struct Waymore {
    settings: WaymoreSettings,
}

impl Waymore {
    /// Builds the command with `settings`.
    pub fn new(settings: WaymoreSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Waymore {
    fn program(&self) -> &str {
        "waymore"
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let hosts = ctx.read_lines(&ALIVE_HOSTS).await?;
        let roots = root_domains(&hosts, self.settings.max_domains);
        let dir = ctx.artifact_path(&WAYMORE);
        ctx.scan.store.ensure_dir(&dir).await?;

        Ok(roots
            .into_iter()
            .map(|root| {
                let output = dir.join(format!("waymore_{}.txt", root.replace('.', "_")));
                Invocation::new(
                    format!("waymore:{root}"),
                    [
                        "waymore".to_string(),
                        "-i".to_string(),
                        root.clone(),
                        "-mode".to_string(),
                        self.settings.mode.clone(),
                        "-l".to_string(),
                        self.settings.limit.to_string(),
                        "-oU".to_string(),
                        path_arg(&output),
                    ],
                )
            })
            .collect())
    }
}

/// One ffuf run per alive URL. Without a wordlist there is nothing to run.
#[derive(Debug, Clone)]
pub struct Ffuf {
    settings: FfufSettings,
}

impl Ffuf {
    /// Builds the command with `settings`.
    pub fn new(settings: FfufSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Ffuf {
    fn program(&self) -> &str {
        "ffuf"
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let settings = &self.settings;
        let Some(wordlist) =
            resolve_wordlist(settings.wordlist.as_deref(), &settings.wordlist_candidates).await
        else {
            ctx.scan.note("[ffuf] no wordlist available").await;
            return Ok(Vec::new());
        };

        let mut urls = ctx.read_lines(&ALIVE_URLS).await?;
        if settings.max_urls > 0 {
            urls.truncate(settings.max_urls);
        }
        let dir = ctx.artifact_path(&FFUF);
        ctx.scan.store.ensure_dir(&dir).await?;

        Ok(urls
            .iter()
            .enumerate()
            .map(|(idx, url)| {
                let url = url.trim_end_matches('/');
                let slug = sanitize(url.split("://").nth(1).unwrap_or(url));
                let output = dir.join(format!(
                    "ffuf_{}_{:03}_{slug}.json",
                    ctx.scan.base_name,
                    idx + 1
                ));
                let mut argv = vec![
                    "ffuf".to_string(),
                    "-w".to_string(),
                    path_arg(&wordlist),
                    "-u".to_string(),
                    format!("{url}/FUZZ"),
                    "-t".to_string(),
                    settings.threads.to_string(),
                    "-mc".to_string(),
                    settings.match_codes.clone(),
                    "-timeout".to_string(),
                    settings.timeout_secs.to_string(),
                    "-o".to_string(),
                    path_arg(&output),
                    "-of".to_string(),
                    "json".to_string(),
                    "-s".to_string(),
                ];
                if let Some(rate) = settings.rate {
                    argv.extend(["-rate".to_string(), rate.to_string()]);
                }
                if let Some(extensions) = &settings.extensions {
                    argv.extend(["-e".to_string(), extensions.clone()]);
                }
                if settings.recursion {
                    argv.extend([
                        "-recursion".to_string(),
                        "-recursion-depth".to_string(),
                        settings.recursion_depth.to_string(),
                    ]);
                }
                Invocation::new(format!("ffuf:{}", idx + 1), argv)
            })
            .collect())
    }
}

/// HTTP parameter discovery.
#[derive(Debug, Clone)]
pub struct Arjun {
    settings: ArjunSettings,
}

impl Arjun {
    /// Builds the command with `settings`.
    pub fn new(settings: ArjunSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Arjun {
    fn program(&self) -> &str {
        "arjun"
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let settings = &self.settings;
        let dir = ctx.artifact_path(&ARJUN);
        ctx.scan.store.ensure_dir(&dir).await?;

        let mut argv = vec![
            "arjun".to_string(),
            "-i".to_string(),
            path_arg(&ctx.artifact_path(&ALIVE_URLS)),
            "-oJ".to_string(),
            path_arg(&dir.join(format!("arjun_{}.json", ctx.scan.base_name))),
            "-m".to_string(),
            settings.method.clone(),
            "-t".to_string(),
            settings.threads.to_string(),
            "-T".to_string(),
            settings.timeout_secs.to_string(),
        ];
        if let Some(wordlist) = resolve_wordlist(settings.wordlist.as_deref(), &[]).await {
            argv.extend(["-w".to_string(), path_arg(&wordlist)]);
        }
        if let Some(include) = &settings.include {
            argv.extend(["--include".to_string(), include.clone()]);
        }
        if let Some(exclude) = &settings.exclude {
            argv.extend(["--exclude".to_string(), exclude.clone()]);
        }
        Ok(vec![Invocation::new("arjun", argv)])
    }
}
