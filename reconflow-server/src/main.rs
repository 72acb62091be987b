//! # Reconflow Server
//!
//! Runs the HTTP API by default. `scan` runs one scan in the foreground,
//! `tools` reports which recon tools are installed and `config` prints the
//! effective configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use reconflow_config::{Config, ConfigLoad, ConfigLoader};
use reconflow_core::tools::availability;
use reconflow_core::{
    LocalArtifactStore, ReconPipelinePlanner, ScanMode, ScanRegistry, ScanSnapshot, ScanStatus,
    Target,
};
use reconflow_server::{AppState, create_api_router, infra::telemetry};
use tracing::{info, warn};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "reconflow-server")]
#[command(about = "Recon scan orchestration server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone, Default)]
struct ConfigArgs {
    /// Path to reconflow.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a .env file loaded before the environment is read
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone, Default)]
struct ServeArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
struct ScanArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Single domain to scan
    #[arg(short, long, conflicts_with = "list", required_unless_present = "list")]
    domain: Option<String>,

    /// File with one domain per line
    #[arg(short, long)]
    list: Option<PathBuf>,

    /// Output root (overrides config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Scan mode: fast, standard or full (1, 2, 3)
    #[arg(long)]
    mode: Option<ScanMode>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve(ServeArgs),
    /// Run one scan in the foreground; Ctrl+C stops it
    Scan(ScanArgs),
    /// Show which recon tools are enabled and installed
    Tools(ConfigArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing();

    match cli.command {
        Some(Command::Serve(args)) => run_server(args).await,
        Some(Command::Scan(args)) => run_scan(args).await,
        Some(Command::Tools(args)) => print_tools(&args),
        Some(Command::Config(args)) => print_config(&args),
        None => run_server(cli.serve).await,
    }
}

fn load_config(args: &ConfigArgs) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }

    let ConfigLoad { config, warnings } = loader.load().context("failed to load configuration")?;
    for warning in &warnings {
        warn!("{warning}");
    }
    if config.metadata.env_file_loaded {
        info!("loaded environment from .env");
    }
    Ok(config)
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let bind = (config.server.host.clone(), config.server.port);
    let drain_limit = config.engine.termination_grace() * 2;
    let state = AppState::from_config(config).context("invalid pipeline configuration")?;
    let registry = state.registry.clone();
    let router = create_api_router(state);

    let listener = tokio::net::TcpListener::bind((bind.0.as_str(), bind.1))
        .await
        .with_context(|| format!("failed to bind {}:{}", bind.0, bind.1))?;
    info!(addr = %listener.local_addr()?, "reconflow server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(registry.clone()))
        .await?;

    // Live scans have to be terminal before the runtime drops their tasks.
    let remaining = registry.shutdown(drain_limit).await;
    if !remaining.is_empty() {
        warn!(scans = remaining.len(), "exiting with scans still stopping");
    }
    Ok(())
}

/// Waits for Ctrl+C and asks every live scan to stop.
async fn shutdown_signal(registry: ScanRegistry) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    let stopped = registry.cancel(None).await;
    info!(stopped, "shutting down");
}

async fn run_scan(args: ScanArgs) -> anyhow::Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(mode) = args.mode {
        config.pipeline.mode = mode;
    }
    if let Some(output) = args.output {
        config.engine.output_root = output;
    }

    let target = match (args.domain, args.list) {
        (Some(domain), _) => Target::domain(&domain)?,
        (None, Some(list)) => Target::domain_list(list)?,
        (None, None) => bail!("either --domain or --list is required"),
    };

    let planner = ReconPipelinePlanner::new(&config.pipeline, &config.engine)?;
    let registry = ScanRegistry::new(
        config.engine.clone(),
        Arc::new(planner),
        Arc::new(LocalArtifactStore::new()),
    );
    let scan_id = registry.submit(target, &config.engine.output_root).await?;
    info!(scan_id = %scan_id, mode = %config.pipeline.mode, "scan started");

    let wait = registry.wait(scan_id);
    tokio::pin!(wait);
    let snapshot = loop {
        tokio::select! {
            finished = &mut wait => break finished?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                if registry.cancel(Some(scan_id)).await > 0 {
                    warn!(scan_id = %scan_id, "stop requested, waiting for tools to exit");
                }
            }
        }
    };

    print_summary(&snapshot);
    match snapshot.status {
        ScanStatus::Completed => Ok(()),
        status => bail!("scan {scan_id} ended with status {}", status.as_str()),
    }
}

fn print_summary(snapshot: &ScanSnapshot) {
    println!("scan {} {}", snapshot.scan_id, snapshot.status.as_str());
    println!("output: {}", snapshot.target_dir.display());
    for stage in &snapshot.stages {
        let exit = stage
            .exit_code
            .map(|code| format!(" (exit {code})"))
            .unwrap_or_default();
        println!("  {:<20} {:?}{exit}", stage.name, stage.state);
    }
    if let Some(failure) = snapshot.result.as_ref().and_then(|r| r.error.as_ref()) {
        println!("error: {}", failure.message);
    }
}

fn print_tools(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args)?;
    for tool in availability(&config.pipeline.resolve()) {
        let location = tool
            .path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "missing".to_string());
        let enabled = if tool.enabled { "enabled" } else { "disabled" };
        println!("{:<12} {:<8} {:<12} {location}", tool.tool.as_str(), enabled, tool.program);
    }
    Ok(())
}

fn print_config(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}
