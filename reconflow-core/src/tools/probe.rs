use async_trait::async_trait;

use super::path_arg;
use crate::artifact::well_known::{ALIVE_HOSTS, HTTPX_ALIVE, NAABU, SUBDOMAINS_MERGED};
use crate::config::{HttpxSettings, NaabuSettings};
use crate::process::Invocation;
use crate::stage::{StageContext, ToolSpec};

/// Alive check over the merged subdomain list.
#[derive(Debug, Clone)]
pub struct Httpx {
    settings: HttpxSettings,
}

impl Httpx {
    /// Builds the command with `settings`.
    pub fn new(settings: HttpxSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Httpx {
    fn program(&self) -> &str {
        &self.settings.binary
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let mut argv = vec![
            self.settings.binary.clone(),
            "-l".to_string(),
            path_arg(&ctx.artifact_path(&SUBDOMAINS_MERGED)),
            "-silent".to_string(),
        ];
        argv.extend(self.settings.extra_args.iter().cloned());
        Ok(vec![
            Invocation::new("httpx", argv).stdout_to(ctx.artifact_path(&HTTPX_ALIVE)),
        ])
    }
}

/// Port scan of the alive hosts.
#[derive(Debug, Clone)]
pub struct Naabu {
    settings: NaabuSettings,
}

impl Naabu {
    /// Builds the command with `settings`.
    pub fn new(settings: NaabuSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Naabu {
    fn program(&self) -> &str {
        "naabu"
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let settings = &self.settings;
        let dir = ctx.artifact_path(&NAABU);
        ctx.scan.store.ensure_dir(&dir).await?;
        let output = dir.join(format!("naabu_{}.txt", ctx.scan.base_name));

        let mut argv = vec![
            "naabu".to_string(),
            "-l".to_string(),
            path_arg(&ctx.artifact_path(&ALIVE_HOSTS)),
            "-o".to_string(),
            path_arg(&output),
            "-rate".to_string(),
            settings.rate.to_string(),
            "-retries".to_string(),
            settings.retries.to_string(),
        ];
        if let Some(top) = settings.top_ports {
            argv.extend(["-top-ports".to_string(), top.to_string()]);
        } else if let Some(ports) = &settings.ports {
            argv.extend(["-p".to_string(), ports.clone()]);
        }
        if let Some(exclude) = &settings.exclude_ports {
            argv.extend(["-exclude-ports".to_string(), exclude.clone()]);
        }
        if settings.verify {
            argv.push("-verify".to_string());
        }
        argv.push("-silent".to_string());
        Ok(vec![Invocation::new("naabu", argv)])
    }
}
