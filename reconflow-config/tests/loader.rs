use std::fs;
use std::path::PathBuf;

use reconflow_config::{Config, ConfigLoadError, ConfigLoader, EnvConfig, FileConfig};
use reconflow_core::{ReconError, ScanMode, ToolKind};
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("reconflow.toml");
    fs::write(&path, contents).unwrap();
    path
}

const SAMPLE: &str = r#"
[server]
host = "0.0.0.0"
port = 9090

[engine]
output_root = "/srv/recon"
max_parallel_stages = 4
termination_grace_ms = 2000

[pipeline]
mode = "fast"

[pipeline.tools_enabled]
katana = true

[pipeline.tools.httpx]
binary = "httpx-toolkit"
blocking = false
"#;

#[test]
fn defaults_apply_without_a_file() {
    let load = ConfigLoader::new()
        .load_from_env(EnvConfig::default())
        .unwrap();
    let defaults = Config::default();

    assert_eq!(load.config.server, defaults.server);
    assert_eq!(load.config.engine, defaults.engine);
    assert_eq!(load.config.pipeline, defaults.pipeline);
    assert!(load.config.metadata.config_path.is_none());
    assert!(load.warnings.iter().any(|w| w.contains("no reconflow.toml")));
}

#[test]
fn file_sections_are_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, SAMPLE);

    let config = ConfigLoader::new()
        .with_config_path(&path)
        .load_from_env(EnvConfig::default())
        .unwrap()
        .config;

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.engine.output_root, PathBuf::from("/srv/recon"));
    assert_eq!(config.engine.max_parallel_stages, 4);
    assert_eq!(config.engine.log_tail_lines, 2_000);
    assert_eq!(config.pipeline.mode, ScanMode::Fast);
    assert_eq!(config.pipeline.tools.httpx.binary, "httpx-toolkit");
    assert_eq!(config.pipeline.tools.httpx.policy.blocking, Some(false));
    assert!(config.pipeline.resolve().is_enabled(ToolKind::Katana));
    assert_eq!(config.metadata.config_path, Some(path));
}

#[test]
fn explicit_path_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigLoader::new()
        .with_config_path(dir.path().join("absent.toml"))
        .load_from_env(EnvConfig::default())
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn env_config_path_is_used_when_no_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[server]\nport = 7000\n");

    let config = ConfigLoader::new()
        .load_from_env(EnvConfig {
            config_path: Some(path),
            ..EnvConfig::default()
        })
        .unwrap()
        .config;
    assert_eq!(config.server.port, 7000);
}

#[test]
fn environment_overrides_beat_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, SAMPLE);

    let config = ConfigLoader::new()
        .with_config_path(path)
        .load_from_env(EnvConfig {
            host: Some("10.0.0.5".to_string()),
            port: Some("8443".to_string()),
            output_root: Some(PathBuf::from("/tmp/out")),
            log_dir: Some(PathBuf::from("/tmp/logs")),
            mode: Some("3".to_string()),
            max_parallel_stages: Some("1".to_string()),
            ..EnvConfig::default()
        })
        .unwrap()
        .config;

    assert_eq!(config.server.host, "10.0.0.5");
    assert_eq!(config.server.port, 8443);
    assert_eq!(config.engine.output_root, PathBuf::from("/tmp/out"));
    assert_eq!(config.engine.log_dir, Some(PathBuf::from("/tmp/logs")));
    assert_eq!(config.pipeline.mode, ScanMode::Full);
    assert_eq!(config.engine.max_parallel_stages, 1);
    assert_eq!(config.server.socket_addr().unwrap().port(), 8443);
}

#[test]
fn inline_pipeline_json_replaces_the_file_section() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, SAMPLE);

    let load = ConfigLoader::new()
        .with_config_path(path)
        .load_from_env(EnvConfig {
            pipeline_json: Some(r#"{"mode":"standard","tools_enabled":{"nuclei":false}}"#.into()),
            ..EnvConfig::default()
        })
        .unwrap();

    let pipeline = &load.config.pipeline;
    assert_eq!(pipeline.mode, ScanMode::Standard);
    assert_eq!(pipeline.tools.httpx.binary, "httpx");
    assert!(!pipeline.resolve().is_enabled(ToolKind::Nuclei));
    assert!(load.config.metadata.pipeline_from_env);
    assert!(load.warnings.iter().any(|w| w.contains("RECONFLOW_PIPELINE_JSON")));
    // server and engine still come from the file
    assert_eq!(load.config.server.port, 9090);
}

#[test]
fn malformed_inputs_name_their_source() {
    let port = ConfigLoader::new()
        .load_from_env(EnvConfig {
            port: Some("eighty".to_string()),
            ..EnvConfig::default()
        })
        .unwrap_err();
    assert!(matches!(port, ConfigLoadError::Env { var: "RECONFLOW_PORT", .. }));

    let mode = ConfigLoader::new()
        .load_from_env(EnvConfig {
            mode: Some("turbo".to_string()),
            ..EnvConfig::default()
        })
        .unwrap_err();
    assert!(matches!(mode, ConfigLoadError::Env { var: "RECONFLOW_MODE", .. }));

    let json = ConfigLoader::new()
        .load_from_env(EnvConfig {
            pipeline_json: Some("{not json".to_string()),
            ..EnvConfig::default()
        })
        .unwrap_err();
    assert!(matches!(json, ConfigLoadError::Json { .. }));
}

#[test]
fn unknown_tool_names_fail_to_parse() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[pipeline.tools_enabled]\nmasscan = true\n");

    let err = ConfigLoader::new()
        .with_config_path(path)
        .load_from_env(EnvConfig::default())
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
}

#[test]
fn validation_runs_after_overrides() {
    let err = ConfigLoader::new()
        .load_from_env(EnvConfig {
            max_parallel_stages: Some("0".to_string()),
            ..EnvConfig::default()
        })
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::Invalid(ReconError::InvalidConfig(_))
    ));

    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        "[pipeline.tools_enabled]\nsubfinder = false\namass = false\nsublist3r = false\n",
    );
    let err = ConfigLoader::new()
        .with_config_path(path)
        .load_from_env(EnvConfig::default())
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Invalid(_)));
}

#[test]
fn env_file_is_reported_when_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, "");
    let env_file = dir.path().join("test.env");
    fs::write(&env_file, "RECONFLOW_LOADER_TEST_MARKER=1\n").unwrap();

    let load = ConfigLoader::new()
        .with_config_path(&config_path)
        .with_env_file(&env_file)
        .load()
        .unwrap();
    assert!(load.config.metadata.env_file_loaded);

    let load = ConfigLoader::new()
        .with_config_path(&config_path)
        .with_env_file(dir.path().join("missing.env"))
        .load()
        .unwrap();
    assert!(!load.config.metadata.env_file_loaded);
}

#[test]
fn rendered_defaults_parse_back() {
    let rendered = Config::default().to_toml_string().unwrap();
    assert!(rendered.contains("[server]"));

    let parsed: FileConfig = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed.server, Config::default().server);
    assert_eq!(parsed.engine, Config::default().engine);
    assert_eq!(parsed.pipeline, Config::default().pipeline);
}
