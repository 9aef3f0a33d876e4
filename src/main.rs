use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use ringdrain::config::{AppConfig, DEFAULT_CONFIG_PATH};
use ringdrain::context::AppContext;
use ringdrain::core::orchestrator::{IntervalTicker, Orchestrator, shutdown_signal};
use ringdrain::core::state::load_state;
use ringdrain::core::{HotswapMachine, Mover, SingleInstanceLock};
use ringdrain::logging::{self, LogConfig};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "ringdrain")]
#[command(about = "Capture ring drain and export-drive hotswap service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Read simulated volume attach/detach commands from stdin
    #[arg(long, global = true)]
    simulation: bool,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[derive(Subcommand)]
enum Commands {
    /// Move the oldest closed capture out of the ring (one shot)
    Mover,
    /// Watch for the export drive and drain the backlog on arrival
    Hotswap,
    /// Print the hotswap daemon's persisted state
    Status,
    /// Show which export drive, if any, currently qualifies
    Detect,
}

#[derive(Args, Serialize)]
struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    ring_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    backlog_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    buffer_threshold: Option<u32>,

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Args, Serialize)]
struct LogArgs {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, global = true)]
    verbose: bool,

    #[serde(rename = "json", skip_serializing_if = "std::ops::Not::not")]
    #[arg(long = "json-logs", global = true)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, warnings) = match AppConfig::load(&cli.config, Some(&cli.overrides)) {
        Ok(loaded) => loaded,
        Err(e) => {
            let skipped = format!("{}; ignoring the file", e);
            match AppConfig::load_without_file(Some(&cli.overrides)) {
                Ok((config, mut warnings)) => {
                    warnings.insert(0, skipped);
                    (config, warnings)
                }
                Err(e) => (
                    AppConfig::default(),
                    vec![skipped, format!("{}; using built-in defaults", e)],
                ),
            }
        }
    };

    logging::init(LogConfig::from(&config.log));
    for warning in &warnings {
        warn!(config = %cli.config.display(), "{}", warning);
    }

    let ctx = AppContext::new(config, cli.simulation);

    match cli.command {
        Commands::Mover => run_mover(&ctx),
        Commands::Hotswap => run_hotswap(ctx).await.context("Hotswap service failed")?,
        Commands::Status => run_status(&ctx).context("Failed to read hotswap state")?,
        Commands::Detect => run_detect(&ctx),
    }

    Ok(())
}

fn run_mover(ctx: &AppContext) {
    let mover = Mover::new(&ctx.config, ctx.detector(), ctx.engine.clone());
    mover.run_once(Local::now());
}

async fn run_hotswap(ctx: AppContext) -> Result<()> {
    let shutdown = shutdown_signal().context("Failed to install signal handlers")?;

    let _lock = SingleInstanceLock::acquire(&ctx.config.hotswap.lock_file).inspect_err(|e| {
        error!(error = %e, "Refusing to start");
    })?;

    let machine = HotswapMachine::new(
        &ctx.config,
        ctx.hostname.clone(),
        ctx.detector(),
        ctx.engine.clone(),
    );
    let mut ticker = IntervalTicker::new(ctx.config.poll_interval());

    Orchestrator::new(machine)
        .start(&mut ticker, shutdown)
        .await
}

fn run_status(ctx: &AppContext) -> Result<()> {
    let path = &ctx.config.hotswap.state_file;
    if !path.exists() {
        println!("No hotswap state recorded at {}", path.display());
        return Ok(());
    }

    let state = load_state(path)?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn run_detect(ctx: &AppContext) {
    match ctx.detector().detect(Local::now().date_naive()) {
        Some(target) => println!(
            "{} ({:.1}% free, {} MB) -> {}",
            target.mount_point.display(),
            target.free_pct,
            target.free_bytes / (1024 * 1024),
            target.pcap_dir.display()
        ),
        None => println!(
            "No qualifying export drive among {} candidate(s); captures stage to {}",
            ctx.config.export.mount_candidates.len(),
            ctx.config.backlog_dir.display()
        ),
    }
}
