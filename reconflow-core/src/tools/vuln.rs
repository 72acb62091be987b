use async_trait::async_trait;

use super::{path_arg, root_domains};
use crate::artifact::well_known::{ALIVE_HOSTS, ALIVE_URLS, CLOUDENUM, NUCLEI};
use crate::config::{CloudenumSettings, NucleiSettings};
use crate::process::Invocation;
use crate::stage::{StageContext, ToolSpec};

/// One cloud_enum run per keyword, the keyword being the first label of
/// each root domain. Output is concatenated.
#[derive(Debug, Clone)]
pub struct Cloudenum {
    settings: CloudenumSettings,
}

impl Cloudenum {
    /// Builds the command with `settings`.
    pub fn new(settings: CloudenumSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Cloudenum {
    fn program(&self) -> &str {
        &self.settings.binary
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let hosts = ctx.read_lines(&ALIVE_HOSTS).await?;
        let mut keywords: Vec<String> = Vec::new();
        for root in root_domains(&hosts, 0) {
            let keyword = root.split('.').next().unwrap_or_default().to_string();
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
        if self.settings.max_keywords > 0 {
            keywords.truncate(self.settings.max_keywords);
        }

        let output = ctx.artifact_path(&CLOUDENUM);
        Ok(keywords
            .into_iter()
            .enumerate()
            .map(|(idx, keyword)| {
                let invocation = Invocation::new(
                    format!("cloudenum:{keyword}"),
                    [self.settings.binary.clone(), "-k".to_string(), keyword.clone()],
                );
                if idx == 0 {
                    invocation.stdout_to(&output)
                } else {
                    invocation.stdout_append(&output)
                }
            })
            .collect())
    }
}

/// Template scan of alive hosts, then exposure templates over alive URLs,
/// then an optional extra target list.
#[derive(Debug, Clone)]
pub struct Nuclei {
    settings: NucleiSettings,
}

impl Nuclei {
    /// Builds the command with `settings`.
    pub fn new(settings: NucleiSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ToolSpec for Nuclei {
    fn program(&self) -> &str {
        "nuclei"
    }

    async fn plan(&self, ctx: &StageContext<'_>) -> crate::Result<Vec<Invocation>> {
        let settings = &self.settings;
        let dir = ctx.artifact_path(&NUCLEI);
        ctx.scan.store.ensure_dir(&dir).await?;
        let base = &ctx.scan.base_name;
        let mut plan = Vec::new();

        if ctx.is_populated(&ALIVE_HOSTS).await {
            plan.push(Invocation::new(
                "nuclei:hosts",
                [
                    "nuclei".to_string(),
                    "-l".to_string(),
                    path_arg(&ctx.artifact_path(&ALIVE_HOSTS)),
                    "-c".to_string(),
                    settings.concurrency.to_string(),
                    "-rl".to_string(),
                    settings.rate_limit.to_string(),
                    "-o".to_string(),
                    path_arg(&dir.join(format!("nuclei_subdomains_{base}.txt"))),
                ],
            ));
        }

        if settings.exposures && ctx.is_populated(&ALIVE_URLS).await {
            plan.push(Invocation::new(
                "nuclei:exposures",
                [
                    "nuclei".to_string(),
                    "-l".to_string(),
                    path_arg(&ctx.artifact_path(&ALIVE_URLS)),
                    "-c".to_string(),
                    settings.concurrency.to_string(),
                    "-t".to_string(),
                    settings.exposure_templates.clone(),
                    "-o".to_string(),
                    path_arg(&dir.join(format!("nuclei_exposures_{base}.txt"))),
                ],
            ));
        }

        if let Some(extra) = &settings.extra_targets
            && ctx.scan.store.is_populated(extra).await
        {
            plan.push(Invocation::new(
                "nuclei:extra",
                [
                    "nuclei".to_string(),
                    "-l".to_string(),
                    path_arg(extra),
                    "-c".to_string(),
                    settings.concurrency.to_string(),
                    "-rl".to_string(),
                    settings.rate_limit.to_string(),
                    "-o".to_string(),
                    path_arg(&dir.join(format!("nuclei_extra_{base}.txt"))),
                ],
            ));
        }

        Ok(plan)
    }
}
