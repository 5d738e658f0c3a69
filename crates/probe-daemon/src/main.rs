//! CPU probe daemon entry point.
//!
//! Opens the publish FIFO, waits for a reader, then samples CPU
//! utilization on a fixed interval until SIGINT or SIGTERM.
//!
//! Exit status is 0 after a clean shutdown and 1 when configuration,
//! the channel, or the baseline sample cannot be set up.

mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use probe_common::config::ProbeConfig;
use probe_runtime::channel::Channel;
use probe_runtime::sampler::{platform_sampler, CounterSampler, SimulatedSampler};
use probe_runtime::sampling_loop::SamplingLoop;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

use crate::signals::SignalHandler;

/// Probe command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "shinobi-probe",
    about = "Publishes aggregate CPU utilization to a named pipe",
    version,
    long_about = None
)]
struct Args {
    /// Path to a probe configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path of the publish FIFO (overrides config file).
    #[arg(long, short = 'p', value_name = "PATH")]
    pipe: Option<PathBuf>,

    /// Sampling interval, e.g. "1s" or "250ms" (overrides config file).
    #[arg(long, short = 'i', value_name = "DURATION")]
    interval: Option<humantime::Duration>,

    /// Maximum cycles to run (0 = until stopped).
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Reopen the pipe and wait for a new reader after a failed write.
    #[arg(long)]
    reconnect: bool,

    /// Publish a synthetic steady load (percent) instead of host counters.
    #[arg(long, value_name = "PERCENT", value_parser = clap::value_parser!(u8).range(0..=100))]
    simulated: Option<u8>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting CPU probe");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "shinobi_probe={level},probe_runtime={level},probe_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `SHINOBI_PROBE_CONFIG` environment variable
/// 3. `/etc/shinobi/probe.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<ProbeConfig> {
    // 1. Command-line argument (highest priority)
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return ProbeConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    // 2. Environment variable
    if let Ok(env_path) = std::env::var("SHINOBI_PROBE_CONFIG") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from SHINOBI_PROBE_CONFIG");
            return ProbeConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from SHINOBI_PROBE_CONFIG={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "SHINOBI_PROBE_CONFIG set but file does not exist, checking other locations"
        );
    }

    // 3. System path
    let system_path = PathBuf::from("/etc/shinobi/probe.toml");
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return ProbeConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {system_path:?}"));
    }

    // 4. Local development path
    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return ProbeConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    // 5. Built-in defaults
    info!("No config file found, using built-in defaults");
    Ok(ProbeConfig::default())
}

/// Apply command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut ProbeConfig, args: &Args) {
    if let Some(pipe) = &args.pipe {
        config.pipe_path.clone_from(pipe);
    }
    if let Some(interval) = &args.interval {
        config.sample_interval = **interval;
    }
    if let Some(max_cycles) = args.max_cycles {
        config.max_cycles = max_cycles;
    }
    if args.reconnect {
        config.reconnect_on_failure = true;
    }
}

/// Set up the channel and sampler, run the loop, and tear down.
fn run(args: &Args) -> Result<()> {
    let mut config = load_config(args)?;
    apply_overrides(&mut config, args);
    config.validate().context("Invalid configuration")?;

    info!(
        pipe = %config.pipe_path.display(),
        interval = %humantime::format_duration(config.sample_interval),
        reconnect = config.reconnect_on_failure,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    let sampler: Box<dyn CounterSampler + Send> = match args.simulated {
        Some(load) => {
            info!(load, "Using simulated tick counters");
            Box::new(SimulatedSampler::with_load(load))
        }
        None => platform_sampler().context("No CPU counter source for this platform")?,
    };

    info!(pipe = %config.pipe_path.display(), "Waiting for a reader to attach");
    let channel = match Channel::open(&config.pipe_path, config.pipe_mode) {
        Ok(channel) => channel,
        Err(e) if signal_handler.shutdown_requested() => {
            info!(reason = %e, "Shutdown requested before a reader attached");
            return Ok(());
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to open pipe at {}", config.pipe_path.display())
            })
        }
    };

    // The channel is dropped (and its entry removed) if the baseline fails.
    let mut probe = SamplingLoop::start(sampler, channel, &config)
        .context("Failed to get initial CPU sample")?;

    let result = probe.run(|| signal_handler.shutdown_requested());

    // Graceful shutdown
    info!("Shutting down...");
    let metrics = probe.metrics().clone();
    let (_sampler, mut channel) = probe.into_parts();
    channel.close();

    info!(
        cycles = metrics.cycles(),
        published = metrics.published(),
        sample_failures = metrics.sample_failures(),
        publish_failures = metrics.publish_failures(),
        reconnects = metrics.reconnects(),
        regressions = metrics.regressions(),
        last_percent = metrics.last_percent().unwrap_or_default(),
        signals = signal_handler.signal_count(),
        last_signal = ?signal_handler.last_signal(),
        "Probe shutdown complete"
    );

    let reason = result.context("Sampling loop aborted")?;
    info!(?reason, "Sampling loop stopped");
    Ok(())
}
