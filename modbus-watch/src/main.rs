//! Modbus TCP monitor.
//!
//! Polls one controller and redraws its identifier, position and force
//! readings until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use modbus_watch::clock::SystemClock;
use modbus_watch::config::{DisplayFormat, MonitorConfig};
use modbus_watch::display::build_display;
use modbus_watch::poller::Poller;
use modbus_watch::supervisor::ConnectionSupervisor;
use modbus_watch::transport::TcpConnector;
use modbus_watch_common::LoggingConfig;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;

/// Modbus TCP register monitor.
#[derive(Parser, Debug)]
#[command(name = "modbus-watch")]
#[command(about = "Polls a Modbus TCP controller and displays decoded readings")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Controller IP address (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Controller TCP port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Number of input registers to read (overrides config)
    #[arg(long)]
    count: Option<u16>,

    /// Delay between reads in milliseconds (overrides config)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Output format (overrides config)
    #[arg(long, value_enum)]
    format: Option<DisplayFormat>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut MonitorConfig) {
        if let Some(host) = &self.host {
            config.target.host = host.clone();
        }
        if let Some(port) = self.port {
            config.target.port = port;
        }
        if let Some(count) = self.count {
            config.poll.register_count = count;
        }
        if let Some(interval_ms) = self.interval_ms {
            config.poll.interval_ms = interval_ms;
        }
        if let Some(format) = self.format {
            config.display.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => MonitorConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => MonitorConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    modbus_watch_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting modbus-watch");
    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let target = config.target.socket_addr()?;
    let connector = TcpConnector::new(
        config.target.unit_id,
        config.target.connect_timeout(),
        config.poll.read_timeout(),
    );
    let supervisor =
        ConnectionSupervisor::new(connector, target, SystemClock, config.retry.policy());
    let mut poller = Poller::new(
        supervisor,
        config.decoder.decoder(),
        build_display(&config.display),
        config.poll_settings(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut task = tokio::spawn(async move { poller.run(shutdown_rx).await });

    let outcome = tokio::select! {
        result = &mut task => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            task.await
        }
    };

    match outcome.context("Poller task panicked")? {
        Ok(()) => {
            info!("modbus-watch stopped");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Polling {} failed", target)),
    }
}
