use std::path::Path;
use std::sync::Arc;

use reconflow_core::artifact::well_known::{ALIVE_HOSTS, ALIVE_URLS, NUCLEI};
use reconflow_core::artifact::LocalArtifactStore;
use reconflow_core::config::{
    CloudenumSettings, FfufSettings, HttpxSettings, NucleiSettings, SubfinderSettings,
    WaybackurlsSettings,
};
use reconflow_core::process::{Invocation, NoopHooks, ProcessRunner, ScanLog, StdoutSink};
use reconflow_core::stage::{
    InputPolicy, ScanContext, StageContext, StageDescriptor, StageKind, ToolSpec,
};
use reconflow_core::tools::{Cloudenum, Ffuf, Httpx, Nuclei, Subfinder, Waybackurls};
use reconflow_core::{ScanId, Target};
use tokio_util::sync::CancellationToken;

fn scan_context(target: Target, output_root: &Path) -> ScanContext {
    ScanContext {
        scan_id: ScanId::new(),
        base_name: target.base_name(),
        target_dir: target.target_dir(output_root),
        target,
        store: Arc::new(LocalArtifactStore::new()),
        runner: ProcessRunner::default(),
        cancel: CancellationToken::new(),
        log: Arc::new(ScanLog::in_memory(64, 16 * 1024)),
    }
}

async fn plan(spec: &dyn ToolSpec, scan: &ScanContext) -> Vec<Invocation> {
    let descriptor = StageDescriptor::new(spec.program(), StageKind::Auxiliary);
    let ctx = StageContext {
        scan,
        descriptor: &descriptor,
        hooks: &NoopHooks,
    };
    spec.plan(&ctx).await.unwrap()
}

async fn seed(scan: &ScanContext, artifact: &reconflow_core::Artifact, lines: &[&str]) {
    let lines: Vec<String> = lines.iter().map(|line| line.to_string()).collect();
    scan.store
        .write_lines(&scan.artifact_path(artifact), &lines)
        .await
        .unwrap();
}

#[tokio::test]
async fn subfinder_switches_flags_for_lists() {
    let dir = tempfile::tempdir().unwrap();
    let single = scan_context(Target::domain("example.com").unwrap(), dir.path());
    let spec = Subfinder::new(SubfinderSettings::default());

    let invocations = plan(&spec, &single).await;
    assert_eq!(invocations.len(), 1);
    assert_eq!(
        invocations[0].argv,
        vec!["subfinder", "-d", "example.com", "-all", "-silent"]
    );
    assert_eq!(
        invocations[0].stdout,
        StdoutSink::Artifact {
            path: single.target_dir.join("subfinder_example_com.txt"),
            append: false,
        }
    );

    let list_path = dir.path().join("scope.txt");
    std::fs::write(&list_path, "example.com\n").unwrap();
    let list = scan_context(Target::domain_list(&list_path).unwrap(), dir.path());
    let invocations = plan(&spec, &list).await;
    assert_eq!(invocations[0].argv[1], "-dL");
    assert_eq!(invocations[0].argv.last().map(String::as_str), Some("-recursive"));
}

#[tokio::test]
async fn httpx_uses_configured_binary_and_extra_args() {
    let dir = tempfile::tempdir().unwrap();
    let scan = scan_context(Target::domain("example.com").unwrap(), dir.path());
    let spec = Httpx::new(HttpxSettings {
        binary: "httpx-toolkit".to_string(),
        extra_args: vec!["-status-code".to_string()],
        ..HttpxSettings::default()
    });

    let invocations = plan(&spec, &scan).await;
    let argv = &invocations[0].argv;
    assert_eq!(argv[0], "httpx-toolkit");
    assert_eq!(argv[1], "-l");
    assert!(argv[2].ends_with("subdomains_merged_example_com.txt"));
    assert_eq!(&argv[3..], ["-silent", "-status-code"]);
}

#[tokio::test]
async fn waybackurls_feeds_capped_hosts_on_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let scan = scan_context(Target::domain("example.com").unwrap(), dir.path());
    seed(&scan, &ALIVE_HOSTS, &["a.example.com:443", "b.example.com", "c.example.com"]).await;
    let spec = Waybackurls::new(WaybackurlsSettings {
        max_domains: 2,
        ..WaybackurlsSettings::default()
    });

    let invocations = plan(&spec, &scan).await;
    assert_eq!(invocations.len(), 1);
    let stdin = invocations[0].stdin.clone().unwrap();
    let fed = std::fs::read_to_string(stdin).unwrap();
    assert_eq!(fed, "a.example.com\nb.example.com\n");
}

#[tokio::test]
async fn waybackurls_drops_hosts_repeated_across_ports() {
    let dir = tempfile::tempdir().unwrap();
    let scan = scan_context(Target::domain("example.com").unwrap(), dir.path());
    seed(
        &scan,
        &ALIVE_HOSTS,
        &["a.example.com", "a.example.com.cdn.net", "a.example.com:8080"],
    )
    .await;
    let spec = Waybackurls::new(WaybackurlsSettings::default());

    let invocations = plan(&spec, &scan).await;
    let stdin = invocations[0].stdin.clone().unwrap();
    let fed = std::fs::read_to_string(stdin).unwrap();
    assert_eq!(fed, "a.example.com\na.example.com.cdn.net\n");
}

#[tokio::test]
async fn ffuf_without_wordlist_plans_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let scan = scan_context(Target::domain("example.com").unwrap(), dir.path());
    seed(&scan, &ALIVE_URLS, &["https://a.example.com"]).await;
    let spec = Ffuf::new(FfufSettings {
        wordlist: None,
        wordlist_candidates: Vec::new(),
        ..FfufSettings::default()
    });

    assert!(plan(&spec, &scan).await.is_empty());
}

#[tokio::test]
async fn ffuf_runs_once_per_url_up_to_the_cap() {
    let dir = tempfile::tempdir().unwrap();
    let wordlist = dir.path().join("words.txt");
    std::fs::write(&wordlist, "admin\n").unwrap();
    let scan = scan_context(Target::domain("example.com").unwrap(), dir.path());
    seed(
        &scan,
        &ALIVE_URLS,
        &["https://a.example.com/", "https://b.example.com", "https://c.example.com"],
    )
    .await;
    let spec = Ffuf::new(FfufSettings {
        wordlist: Some(wordlist),
        max_urls: 2,
        ..FfufSettings::default()
    });

    let invocations = plan(&spec, &scan).await;
    assert_eq!(invocations.len(), 2);
    assert!(invocations[0].argv.contains(&"https://a.example.com/FUZZ".to_string()));
    assert!(invocations[1].argv.contains(&"https://b.example.com/FUZZ".to_string()));
}

#[tokio::test]
async fn cloudenum_appends_after_the_first_keyword() {
    let dir = tempfile::tempdir().unwrap();
    let scan = scan_context(Target::domain("example.com").unwrap(), dir.path());
    seed(
        &scan,
        &ALIVE_HOSTS,
        &["www.example.com", "api.example.com", "shop.other.co.uk"],
    )
    .await;
    let spec = Cloudenum::new(CloudenumSettings::default());

    let invocations = plan(&spec, &scan).await;
    let keywords: Vec<&str> = invocations.iter().map(|inv| inv.argv[2].as_str()).collect();
    assert_eq!(keywords, vec!["example", "other"]);
    assert!(matches!(invocations[0].stdout, StdoutSink::Artifact { append: false, .. }));
    assert!(matches!(invocations[1].stdout, StdoutSink::Artifact { append: true, .. }));
}

#[tokio::test]
async fn nuclei_only_scans_populated_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let scan = scan_context(Target::domain("example.com").unwrap(), dir.path());
    seed(&scan, &ALIVE_URLS, &["https://a.example.com"]).await;
    let spec = Nuclei::new(NucleiSettings::default());

    let invocations = plan(&spec, &scan).await;
    let labels: Vec<&str> = invocations.iter().map(|inv| inv.label.as_str()).collect();
    assert_eq!(labels, vec!["nuclei:exposures"]);
    assert!(scan.artifact_path(&NUCLEI).is_dir());

    let descriptor = StageDescriptor::new("nuclei", StageKind::VulnScan)
        .requires([ALIVE_HOSTS, ALIVE_URLS])
        .input_policy(InputPolicy::AnyNonEmpty);
    let ctx = StageContext {
        scan: &scan,
        descriptor: &descriptor,
        hooks: &NoopHooks,
    };
    assert!(ctx.unmet_inputs().await.is_none());
}
