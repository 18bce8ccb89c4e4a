//! cwkeyer CLI - key Morse code received over UDP.

use anyhow::{Context, Result};
use clap::Parser;
use cwkeyer::{
    Backend, Config, Daemon, Diagnostics, KeyerMode, KeyerStats, Listener, LocalInput,
    RigctlKeyer, SerialKeyer, metrics::start_metrics_server,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// cwkeyer - a cwdaemon-compatible Morse keyer relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial keyer device (serial mode)
    #[arg(env = "CWKEYER_DEVICE")]
    device: Option<PathBuf>,

    /// Keying driver
    #[arg(short, long, value_enum, env = "CWKEYER_MODE")]
    mode: Option<KeyerMode>,

    /// Address to listen on
    #[arg(long, env = "CWKEYER_BIND")]
    bind: Option<IpAddr>,

    /// UDP port to listen on
    #[arg(short, long, env = "CWKEYER_PORT")]
    port: Option<u16>,

    /// Delay after each Morse unit in milliseconds (serial mode)
    #[arg(short = 'd', long)]
    unit_delay_ms: Option<u64>,

    /// Also read messages from standard input
    #[arg(long)]
    local_input: bool,

    /// Rig-control program (rigctl mode)
    #[arg(long)]
    rigctl_program: Option<String>,

    /// Log statistics every N seconds (0 = never)
    #[arg(short, long)]
    stats_interval: Option<u64>,

    /// Serve Prometheus metrics on this port
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Configuration file (default: platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Apply command-line overrides on top of the file configuration.
    fn apply(self, mut config: Config) -> Config {
        if let Some(device) = self.device {
            config.device = Some(device);
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(delay) = self.unit_delay_ms {
            config.unit_delay_ms = delay;
        }
        if self.local_input {
            config.local_input = true;
        }
        if let Some(program) = self.rigctl_program {
            config.rigctl.program = program;
        }
        if let Some(interval) = self.stats_interval {
            config.stats_interval = interval;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_enabled = true;
            config.metrics_port = port;
        }
        config
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the keyer echo
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let config = args.apply(config);
    config.validate()?;

    info!("cwkeyer starting...");
    info!("Mode: {:?}", config.mode);

    let backend = match config.mode {
        KeyerMode::Serial => {
            let device = config
                .device
                .as_deref()
                .context("Serial mode needs a keyer device")?;
            Backend::Serial(SerialKeyer::open(device, config.unit_delay())?)
        }
        KeyerMode::Rigctl => Backend::Rigctl(RigctlKeyer::new(
            config.rigctl.program.clone(),
            config.rigctl.args.clone(),
        )),
    };

    let listener = Listener::bind(config.listen_addr()).await?;
    let stats = Arc::new(KeyerStats::new());

    if config.metrics_enabled {
        let port = config.metrics_port;
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(port, stats).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    let mut daemon = Daemon::new(listener, backend, Diagnostics::stdout())
        .with_stats(Arc::clone(&stats))
        .with_stats_interval(Duration::from_secs(config.stats_interval));
    if config.local_input {
        info!("Reading messages from standard input");
        daemon = daemon.with_local_input(LocalInput::stdin()?);
    }

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle Ctrl+C
    tokio::spawn(forward_shutdown(signal::ctrl_c(), shutdown_tx));

    let result = daemon.run(shutdown_rx).await;

    // Print final statistics
    eprintln!("\n{}", stats.summary());

    result.context("Keyer stopped")
}

/// Turn the first shutdown signal into a `true` on the watch channel.
///
/// If the signal handler cannot be installed the sender is held forever, so
/// the daemon keeps running instead of reading the closed channel as a
/// shutdown request.
async fn forward_shutdown(
    signal: impl Future<Output = std::io::Result<()>>,
    shutdown_tx: watch::Sender<bool>,
) {
    match signal.await {
        Ok(()) => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
        Err(e) => {
            error!("Cannot listen for Ctrl+C, stop the keyer another way: {}", e);
            std::future::pending::<()>().await;
            drop(shutdown_tx);
        }
    }
}
