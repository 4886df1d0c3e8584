//! # Hover Stabilizer
//!
//! Runs the stabilizer core at its configured rate against simulated
//! collaborators.
//!
//! Loads an optional TOML configuration, applies command-line overrides,
//! starts the control thread and waits for Ctrl-C or the requested number of
//! cycles. Fatal errors exit with status 1.

use clap::Parser;
use hover_common::config::{ConfigError, LogLevel};
use hover_common::consts::DEFAULT_CONFIG_PATH;
use hover_common::registry::{MemoryRegistry, VarRegistry};
use hover_common::types::EstimatorKind;
use hover_stabilizer::collab::StartGate;
use hover_stabilizer::config::{StabilizerConfig, load_config};
use hover_stabilizer::sim::{self, PowerCounters};
use hover_stabilizer::Stabilizer;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

/// Hover Stabilizer: fixed-rate flight stabilization core
#[derive(Parser, Debug)]
#[command(name = "hover_stabilizer")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Fixed-rate stabilizer core running against simulated collaborators")]
struct Args {
    /// Path to the stabilizer configuration TOML.
    /// Defaults are used when the default path does not exist.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stop after this many cycles (default: run until Ctrl-C).
    #[arg(long)]
    cycles: Option<u64>,

    /// Estimator selection (default: from config).
    #[arg(long, value_parser = parse_estimator)]
    estimator: Option<EstimatorKind>,

    /// CPU core to pin the control thread to (overrides config).
    #[arg(long)]
    cpu_core: Option<usize>,

    /// SCHED_FIFO priority (overrides config).
    #[arg(long)]
    rt_priority: Option<i32>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn parse_estimator(s: &str) -> Result<EstimatorKind, String> {
    match s {
        "any" => Ok(EstimatorKind::Any),
        "complementary" => Ok(EstimatorKind::Complementary),
        "kalman" => Ok(EstimatorKind::Kalman),
        other => Err(format!(
            "unknown estimator '{other}' (expected any, complementary or kalman)"
        )),
    }
}

fn main() {
    let args = Args::parse();
    let resolved = resolve_config(&args);
    let log_level = resolved
        .as_ref()
        .map(|(config, _)| config.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, log_level);

    info!("Hover Stabilizer v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = resolved
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
        .and_then(|(config, source)| run(&args, config, source));
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("Hover Stabilizer shutdown complete");
}

fn run(
    args: &Args,
    mut config: StabilizerConfig,
    source: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    match source {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => info!("No config at {DEFAULT_CONFIG_PATH}, using defaults"),
    }
    if let Some(core) = args.cpu_core {
        config.schedule.cpu_core = core;
    }
    if let Some(prio) = args.rt_priority {
        config.schedule.rt_priority = prio;
    }
    config.validate()?;
    let estimator = args.estimator.unwrap_or(config.control.estimator);

    info!(
        "Config OK: rate={}Hz, mode={:?}, attitude={:?}, wire_format={:?}",
        config.schedule.rate_hz,
        config.control.mode,
        config.telemetry.attitude,
        config.telemetry.wire_format,
    );

    let registry = Arc::new(MemoryRegistry::new());
    let gate = Arc::new(StartGate::new());
    let power = Arc::new(PowerCounters::default());
    let registry_dyn: Arc<dyn VarRegistry> = registry.clone();

    let mut stabilizer = Stabilizer::new(
        config,
        sim::collaborators_with(Arc::clone(&power)),
        registry_dyn,
        gate.clone(),
    )
    .with_cycle_limit(args.cycles);

    stabilizer.init(estimator)?;
    if !stabilizer.self_test() {
        warn!("self test failed");
    }

    // Setup signal handler for graceful shutdown.
    let shutdown = stabilizer.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        shutdown.store(true, Ordering::Release);
    })?;

    gate.release();
    let summary = stabilizer.join()?;

    info!(
        "Loop finished: cycles={}, last_tick={}, missed={}, overruns={}, avg={}ns, stddev={:.0}ns, peak={:.1}% of budget",
        summary.cycles,
        stabilizer.last_tick(),
        summary.missed,
        summary.stats.overruns,
        summary.stats.avg_cycle_ns(),
        summary.stats.stddev_cycle_ns(),
        summary.stats.peak_utilization() * 100.0,
    );
    info!(
        "Actuation: distributed={}, safe_stops={}",
        power.distributed.load(Ordering::Relaxed),
        power.safe_stops.load(Ordering::Relaxed),
    );
    for path in registry.paths() {
        if let Ok(value) = registry.read(&path) {
            info!("{path} = {value:?}");
        }
    }
    Ok(())
}

/// Explicit `--config` must exist; the default path is optional.
///
/// Returns the configuration and the file it came from.
fn resolve_config(args: &Args) -> Result<(StabilizerConfig, Option<PathBuf>), ConfigError> {
    let (path, required) = match &args.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };
    match load_config(&path) {
        Ok(config) => Ok((config, Some(path))),
        Err(ConfigError::FileNotFound) if !required => Ok((StabilizerConfig::default(), None)),
        Err(e) => Err(e),
    }
}

/// Setup tracing subscriber based on CLI arguments.
///
/// `--verbose` overrides the configured level; `RUST_LOG` refines it.
fn setup_tracing(args: &Args, log_level: LogLevel) {
    let directive: Directive = if args.verbose {
        Level::DEBUG.into()
    } else {
        log_level
            .as_directive()
            .parse()
            .unwrap_or_else(|_| Level::INFO.into())
    };

    let filter = EnvFilter::from_default_env().add_directive(directive);

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
