mod support;

use std::time::Duration;

use reconflow_core::artifact::Artifact;
use reconflow_core::pipeline::{AliveHostExtractor, Pipeline, SubdomainNormalizer};
use reconflow_core::stage::{RetryPolicy, StageKind};
use reconflow_core::{ScanControlError, ScanStatus, StageState, Target};

use support::{filter, harness, poll_until, shell, wait_terminal};

const SUBS: Artifact = Artifact::file("subs");
const MERGED: Artifact = Artifact::file("merged");
const PROBED: Artifact = Artifact::file("probed");
const HOSTS: Artifact = Artifact::file("hosts");
const CONTENT: Artifact = Artifact::file("content");
const REPORT: Artifact = Artifact::file("report");

/// discover -> merge -> probe -> alive filter -> content-discovery -> report
fn recon_like(discover_script: &'static str, content_script: &'static str) -> Pipeline {
    Pipeline::builder()
        .max_parallel(2)
        .stage(shell("discover", StageKind::Discovery, &[], &[SUBS], discover_script))
        .stage(
            filter("merge", StageKind::Transform, SUBS, MERGED, SubdomainNormalizer)
                .with_descriptor(|descriptor| descriptor.blocking(true)),
        )
        .stage(shell("probe", StageKind::AliveCheck, &[MERGED], &[PROBED], "cat \"$1\""))
        .stage(filter("alive", StageKind::AliveFilter, PROBED, HOSTS, AliveHostExtractor))
        .stage(shell(
            "content-discovery",
            StageKind::ContentDiscovery,
            &[HOSTS],
            &[CONTENT],
            content_script,
        ))
        .stage(shell("report", StageKind::Auxiliary, &[CONTENT], &[REPORT], "cat \"$1\""))
        .build()
        .unwrap()
}

fn rank(status: ScanStatus) -> u8 {
    match status {
        ScanStatus::Queued => 0,
        ScanStatus::Running => 1,
        ScanStatus::Stopped | ScanStatus::Completed | ScanStatus::Error => 2,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_discovery_completes_with_downstream_skipped() {
    let harness = harness(|| Ok(recon_like("true", "cat \"$1\"")));
    let scan_id = harness.submit("example.com").await;

    let done = wait_terminal(&harness.registry, scan_id).await;
    assert_eq!(done.status, ScanStatus::Completed);
    assert_eq!(done.stage("discover").unwrap().state, StageState::Completed);
    assert_eq!(done.stage("merge").unwrap().state, StageState::Completed);
    assert_eq!(done.stage("probe").unwrap().state, StageState::Skipped);
    assert_eq!(done.stage("content-discovery").unwrap().state, StageState::Skipped);
    assert_eq!(done.stage("report").unwrap().state, StageState::Skipped);
    assert!(done.ended_at.is_some());
    assert!(done.current_stage.is_none());
    assert_eq!(done.live_processes, 0);

    let merged = harness
        .output_root()
        .join("recon_example_com")
        .join("merged_example_com.txt");
    assert!(merged.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn full_flow_derives_inputs_between_stages() {
    let harness = harness(|| {
        Ok(recon_like(
            "printf 'API.example.com\\n*.example.com\\nbad\\napi.example.com\\n'",
            "sed 's/$/ found/' \"$1\"",
        ))
    });
    let scan_id = harness.submit("example.com").await;

    let done = wait_terminal(&harness.registry, scan_id).await;
    assert_eq!(done.status, ScanStatus::Completed);
    assert_eq!(done.stage("report").unwrap().state, StageState::Completed);

    let dir = harness.output_root().join("recon_example_com");
    let merged = std::fs::read_to_string(dir.join("merged_example_com.txt")).unwrap();
    assert_eq!(merged, "api.example.com\nexample.com\n");
    let report = std::fs::read_to_string(dir.join("report_example_com.txt")).unwrap();
    assert!(report.contains("api.example.com found"));

    let result = done.result.unwrap();
    assert_eq!(result.return_code, Some(0));
    assert_eq!(result.last_stage.as_deref(), Some("report"));
    assert!(result.error.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_during_content_discovery_stops_the_scan() {
    let harness = harness(|| Ok(recon_like("echo a.example.com", "sleep 30")));
    let registry = &harness.registry;
    let scan_id = harness.submit("example.com").await;

    poll_until(registry, scan_id, Duration::from_secs(10), |snapshot| {
        snapshot.current_stage.as_deref() == Some("content-discovery")
            && snapshot.live_processes > 0
    })
    .await;

    assert_eq!(registry.cancel(Some(scan_id)).await, 1);
    let requested = registry.get_status(scan_id).await.unwrap();
    assert!(requested.cancel_requested);
    assert!(!requested.status.is_terminal() || requested.status == ScanStatus::Stopped);

    let done = wait_terminal(registry, scan_id).await;
    assert_eq!(done.status, ScanStatus::Stopped);
    assert_eq!(
        done.stage("content-discovery").unwrap().state,
        StageState::Cancelled
    );
    assert_eq!(done.stage("report").unwrap().state, StageState::Pending);
    assert_eq!(done.live_processes, 0);
    assert!(registry.list_running().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn process_ignoring_sigterm_is_killed() {
    let harness = harness(|| {
        Pipeline::builder()
            .stage(shell(
                "stubborn",
                StageKind::Discovery,
                &[],
                &[SUBS],
                "trap '' TERM; sleep 30",
            ))
            .build()
    });
    let registry = &harness.registry;
    let scan_id = harness.submit("example.com").await;

    poll_until(registry, scan_id, Duration::from_secs(10), |snapshot| {
        snapshot.live_processes > 0
    })
    .await;
    assert_eq!(registry.cancel(Some(scan_id)).await, 1);

    let done = tokio::time::timeout(Duration::from_secs(5), registry.wait(scan_id))
        .await
        .expect("forced kill did not end the scan")
        .unwrap();
    assert_eq!(done.status, ScanStatus::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_scans_are_listed_and_stopped_together() {
    let harness = harness(|| {
        Pipeline::builder()
            .stage(shell("discover", StageKind::Discovery, &[], &[SUBS], "sleep 30"))
            .build()
    });
    let registry = &harness.registry;
    let first = harness.submit("one.example.com").await;
    let second = harness.submit("two.example.com").await;
    assert_ne!(first, second);

    for scan_id in [first, second] {
        poll_until(registry, scan_id, Duration::from_secs(10), |snapshot| {
            snapshot.status == ScanStatus::Running
        })
        .await;
    }

    let running = registry.list_running().await;
    let ids: Vec<_> = running.iter().map(|scan| scan.scan_id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first) && ids.contains(&second));

    assert_eq!(registry.cancel(None).await, 2);
    assert_eq!(registry.cancel(None).await, 0);
    for scan_id in [first, second] {
        assert_eq!(wait_terminal(registry, scan_id).await.status, ScanStatus::Stopped);
    }
    assert!(registry.list_running().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn double_cancel_counts_once() {
    let harness = harness(|| {
        Pipeline::builder()
            .stage(shell("discover", StageKind::Discovery, &[], &[SUBS], "sleep 30"))
            .build()
    });
    let registry = &harness.registry;
    let scan_id = harness.submit("example.com").await;

    assert_eq!(registry.cancel(Some(scan_id)).await, 1);
    assert_eq!(registry.cancel(Some(scan_id)).await, 0);
    let done = wait_terminal(registry, scan_id).await;
    assert_eq!(done.status, ScanStatus::Stopped);
    assert!(done.cancel_requested);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_finished_or_unknown_scans_is_a_no_op() {
    let harness = harness(|| Ok(recon_like("true", "true")));
    let registry = &harness.registry;
    let scan_id = harness.submit("example.com").await;
    let done = wait_terminal(registry, scan_id).await;
    assert_eq!(done.status, ScanStatus::Completed);

    assert_eq!(registry.cancel(Some(scan_id)).await, 0);
    assert_eq!(registry.cancel(Some(reconflow_core::ScanId::new())).await, 0);
    assert_eq!(registry.cancel(None).await, 0);

    let after = registry.get_status(scan_id).await.unwrap();
    assert_eq!(after.status, ScanStatus::Completed);
    assert!(!after.cancel_requested);
    assert_eq!(after.ended_at, done.ended_at);
}

#[tokio::test(flavor = "multi_thread")]
async fn status_never_moves_backwards_under_polling() {
    let harness = harness(|| {
        Ok(recon_like(
            "sleep 0.2; echo a.example.com",
            "sleep 0.2; cat \"$1\"",
        ))
    });
    let registry = &harness.registry;
    let scan_id = harness.submit("example.com").await;

    let mut seen = Vec::new();
    loop {
        let snapshot = registry.get_status(scan_id).await.unwrap();
        seen.push(snapshot.status);
        if snapshot.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    for _ in 0..5 {
        seen.push(registry.get_status(scan_id).await.unwrap().status);
    }

    assert!(seen.windows(2).all(|pair| rank(pair[0]) <= rank(pair[1])));
    let terminal: Vec<_> = seen.iter().filter(|status| status.is_terminal()).collect();
    assert!(terminal.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(*terminal[0], ScanStatus::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn blocking_failure_ends_in_error_with_stderr() {
    let harness = harness(|| {
        Pipeline::builder()
            .stage(
                shell(
                    "discover",
                    StageKind::Discovery,
                    &[],
                    &[SUBS],
                    "echo 'resolver exploded' >&2; exit 3",
                )
                .with_descriptor(|descriptor| descriptor.blocking(true)),
            )
            .stage(shell("probe", StageKind::AliveCheck, &[SUBS], &[PROBED], "cat \"$1\""))
            .build()
    });
    let registry = &harness.registry;
    let scan_id = harness.submit("example.com").await;

    let done = wait_terminal(registry, scan_id).await;
    assert_eq!(done.status, ScanStatus::Error);
    let discover = done.stage("discover").unwrap();
    assert_eq!(discover.state, StageState::Failed);
    assert_eq!(discover.exit_code, Some(3));
    let probe = done.stage("probe").unwrap();
    assert_eq!(probe.state, StageState::Skipped);
    assert_eq!(probe.detail.as_deref(), Some("blocked by discover"));

    let error = done.result.unwrap().error.unwrap();
    assert_eq!(error.stage.as_deref(), Some("discover"));
    assert!(error.stderr_tail.unwrap().contains("resolver exploded"));
}

#[tokio::test(flavor = "multi_thread")]
async fn non_blocking_failure_is_recorded_only() {
    let harness = harness(|| {
        Pipeline::builder()
            .stage(shell("flaky", StageKind::Discovery, &[], &[SUBS], "exit 1"))
            .stage(shell(
                "steady",
                StageKind::Discovery,
                &[],
                &[MERGED],
                "echo a.example.com",
            ))
            .build()
    });
    let scan_id = harness.submit("example.com").await;

    let done = wait_terminal(&harness.registry, scan_id).await;
    assert_eq!(done.status, ScanStatus::Completed);
    assert_eq!(done.stage("flaky").unwrap().state, StageState::Failed);
    assert_eq!(done.stage("steady").unwrap().state, StageState::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_active_target_is_rejected() {
    let harness = harness(|| {
        Pipeline::builder()
            .stage(shell("discover", StageKind::Discovery, &[], &[SUBS], "sleep 30"))
            .build()
    });
    let registry = &harness.registry;
    let first = harness.submit("example.com").await;

    let err = registry
        .submit(Target::domain("Example.com").unwrap(), harness.output_root())
        .await
        .unwrap_err();
    match err {
        ScanControlError::DuplicateActiveScan { scan_id, target_dir } => {
            assert_eq!(scan_id, first);
            assert!(target_dir.ends_with("recon_example_com"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    registry.cancel(Some(first)).await;
    wait_terminal(registry, first).await;
    let second = harness.submit("example.com").await;
    registry.cancel(Some(second)).await;
    wait_terminal(registry, second).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_targets_are_rejected_before_queueing() {
    let harness = harness(|| Ok(recon_like("true", "true")));
    let registry = &harness.registry;

    let missing = Target::domain_list(harness.output_root().join("missing.txt")).unwrap();
    assert!(matches!(
        registry.submit(missing, harness.output_root()).await,
        Err(ScanControlError::InvalidTarget(_))
    ));

    let empty_path = harness.output_root().join("empty.txt");
    std::fs::write(&empty_path, "").unwrap();
    let empty = Target::domain_list(&empty_path).unwrap();
    assert!(matches!(
        registry.submit(empty, harness.output_root()).await,
        Err(ScanControlError::InvalidTarget(_))
    ));

    assert!(registry.list().await.is_empty());
    assert!(matches!(
        registry.get_status(reconflow_core::ScanId::new()).await,
        Err(ScanControlError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn logs_carry_header_and_footer() {
    let harness = harness(|| Ok(recon_like("echo a.example.com", "cat \"$1\"")));
    let registry = &harness.registry;
    let scan_id = harness.submit("example.com").await;
    wait_terminal(registry, scan_id).await;

    let lines = registry.logs(scan_id, None).await.unwrap();
    assert_eq!(lines[0], format!("=== Scan {scan_id} ==="));
    assert!(lines.iter().any(|line| line == "Target: example.com"));
    assert!(lines.iter().any(|line| line == "=== Stage discover ==="));
    assert!(lines.iter().any(|line| line.starts_with("[discover] $ sh -c")));

    let tail = registry.logs(scan_id, Some(1)).await.unwrap();
    assert_eq!(tail, vec!["=== Scan Completed === Return Code: 0".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn only_finished_scans_are_evicted() {
    let harness = harness(|| {
        Pipeline::builder()
            .stage(shell("discover", StageKind::Discovery, &[], &[SUBS], "sleep 30"))
            .build()
    });
    let registry = &harness.registry;
    let scan_id = harness.submit("example.com").await;

    assert!(!registry.evict(scan_id).await.unwrap());
    registry.cancel(Some(scan_id)).await;
    wait_terminal(registry, scan_id).await;

    assert_eq!(
        registry
            .evict_finished_before(chrono::Utc::now() - chrono::Duration::hours(1))
            .await,
        0
    );
    assert!(registry.evict(scan_id).await.unwrap());
    assert!(matches!(
        registry.get_status(scan_id).await,
        Err(ScanControlError::NotFound(_))
    ));
}

fn retrying(script: &str, max_attempts: u32, backoff: Duration) -> Pipeline {
    Pipeline::builder()
        .stage(
            shell("discover", StageKind::Discovery, &[], &[SUBS], script).with_descriptor(
                |descriptor| {
                    descriptor.blocking(true).retry(RetryPolicy {
                        max_attempts,
                        backoff,
                    })
                },
            ),
        )
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_stage_is_retried_until_it_succeeds() {
    let harness = harness(|| {
        Ok(retrying(
            "if [ -f tried ]; then echo a.example.com; else touch tried; exit 1; fi",
            3,
            Duration::from_millis(50),
        ))
    });
    let registry = &harness.registry;
    let scan_id = harness.submit("example.com").await;

    let done = wait_terminal(registry, scan_id).await;
    assert_eq!(done.status, ScanStatus::Completed);
    let discover = done.stage("discover").unwrap();
    assert_eq!(discover.state, StageState::Completed);
    assert_eq!(discover.attempts, 2);

    let lines = registry.logs(scan_id, None).await.unwrap();
    assert!(
        lines
            .iter()
            .any(|line| line.starts_with("[discover] attempt 1 failed, retrying"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn retries_stop_after_max_attempts() {
    let harness = harness(|| {
        Ok(retrying(
            "echo attempt >> attempts; exit 2",
            3,
            Duration::from_millis(20),
        ))
    });
    let registry = &harness.registry;
    let scan_id = harness.submit("example.com").await;

    let done = wait_terminal(registry, scan_id).await;
    assert_eq!(done.status, ScanStatus::Error);
    let discover = done.stage("discover").unwrap();
    assert_eq!(discover.state, StageState::Failed);
    assert_eq!(discover.attempts, 3);
    assert_eq!(discover.exit_code, Some(2));

    let attempts = std::fs::read_to_string(done.target_dir.join("attempts")).unwrap();
    assert_eq!(attempts.lines().count(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_during_backoff_stops_the_scan() {
    let harness = harness(|| Ok(retrying("exit 1", 3, Duration::from_secs(30))));
    let registry = &harness.registry;
    let scan_id = harness.submit("example.com").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let lines = registry.logs(scan_id, None).await.unwrap();
        if lines.iter().any(|line| line.contains("attempt 1 failed")) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "no retry scheduled: {lines:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(registry.cancel(Some(scan_id)).await, 1);

    let done = tokio::time::timeout(Duration::from_secs(5), registry.wait(scan_id))
        .await
        .expect("backoff was not interrupted")
        .unwrap();
    assert_eq!(done.status, ScanStatus::Stopped);
    let discover = done.stage("discover").unwrap();
    assert_eq!(discover.state, StageState::Cancelled);
    assert_eq!(discover.attempts, 1);
}

/// Descriptors currently open on files under `dir`.
#[cfg(target_os = "linux")]
fn open_files_under(dir: &std::path::Path) -> usize {
    std::fs::read_dir("/proc/self/fd")
        .unwrap()
        .filter_map(|entry| std::fs::read_link(entry.ok()?.path()).ok())
        .filter(|target| target.starts_with(dir))
        .count()
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread")]
async fn finished_scans_release_their_log_files() {
    use std::sync::Arc;

    use reconflow_core::{LocalArtifactStore, ScanRegistry};
    use support::{FixedPlanner, engine_config};

    let output = tempfile::tempdir().unwrap();
    let logs = tempfile::tempdir().unwrap();
    let log_dir = logs.path().canonicalize().unwrap();
    let registry = ScanRegistry::new(
        reconflow_core::EngineConfig {
            log_dir: Some(log_dir.clone()),
            ..engine_config(output.path())
        },
        Arc::new(FixedPlanner::new(|| {
            Pipeline::builder()
                .stage(shell("discover", StageKind::Discovery, &[], &[SUBS], "echo a.example.com"))
                .build()
        })),
        Arc::new(LocalArtifactStore::new()),
    );

    let mut finished = Vec::new();
    for idx in 0..10 {
        let target = Target::domain(&format!("host{idx}.example.com")).unwrap();
        let scan_id = registry.submit(target, output.path()).await.unwrap();
        assert_eq!(wait_terminal(&registry, scan_id).await.status, ScanStatus::Completed);
        finished.push(scan_id);
    }

    assert_eq!(open_files_under(&log_dir), 0);
    for scan_id in finished {
        let on_disk = std::fs::read_to_string(log_dir.join(format!("{scan_id}.log"))).unwrap();
        assert!(on_disk.ends_with("=== Scan Completed === Return Code: 0\n"));
        assert!(registry.get_status(scan_id).await.is_ok());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_waits_for_process_groups_to_stop() {
    let harness = harness(|| {
        Pipeline::builder()
            .stage(shell(
                "discover",
                StageKind::Discovery,
                &[],
                &[SUBS],
                "sleep 300 & echo $! > child.pid; wait",
            ))
            .build()
    });
    let registry = &harness.registry;
    let scan_id = harness.submit("example.com").await;
    let running = poll_until(registry, scan_id, Duration::from_secs(10), |snapshot| {
        snapshot.live_processes > 0
    })
    .await;

    let pid_file = running.target_dir.join("child.pid");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let child = loop {
        if let Ok(pid) = std::fs::read_to_string(&pid_file)
            && !pid.trim().is_empty()
        {
            break pid.trim().to_string();
        }
        assert!(tokio::time::Instant::now() < deadline, "background child never started");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert!(registry.shutdown(Duration::from_secs(5)).await.is_empty());
    let done = registry.get_status(scan_id).await.unwrap();
    assert_eq!(done.status, ScanStatus::Stopped);
    let footer = registry.logs(scan_id, Some(1)).await.unwrap();
    assert!(footer[0].starts_with("=== Scan Stopped ==="));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let alive = std::process::Command::new("kill")
            .args(["-0", &child])
            .stderr(std::process::Stdio::null())
            .status()
            .unwrap()
            .success();
        if !alive {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "background child {child} survived");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(registry.shutdown(Duration::from_secs(1)).await.is_empty());
}
