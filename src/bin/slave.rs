use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use clocksync::config::{load_config, Config};
use clocksync::observer::LoggingObserver;
use clocksync::software_clock::SoftwareClock;
use clocksync::sync_client::{SyncClient, UdpClientTransport};
use clocksync::sync_controller::SyncController;
use clocksync::sync_monitor::SyncMonitor;

/// Disciplines a software clock against a Master's reference timescale.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON config file; missing or unparseable falls back to
    /// built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Master address to sync against. Overrides the config file.
    #[arg(long)]
    master_addr: Option<SocketAddr>,

    /// Seconds between sync bursts. Overrides the config file.
    #[arg(long)]
    sync_interval: Option<f64>,

    /// Request/reply rounds per burst. Overrides the config file.
    #[arg(long)]
    rounds_per_sync: Option<u32>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let mut config = args
        .config
        .as_deref()
        .map(load_config)
        .unwrap_or_else(Config::default);

    if let Some(addr) = args.master_addr {
        config.master_addr = addr;
    }
    if let Some(interval) = args.sync_interval {
        config.wire.sync_interval_s = interval;
    }
    if let Some(rounds) = args.rounds_per_sync {
        config.wire.rounds_per_sync = rounds;
    }

    let Config {
        master_addr,
        wire,
        pid,
        monitor: monitor_config,
    } = config;

    let step_threshold_s = pid.step_threshold_s;
    let transport = UdpClientTransport::bind(Duration::from_secs_f64(wire.sync_timeout_s))
        .context("failed to bind client socket")?;
    let client = SyncClient::new(transport, master_addr, wire.max_sequence);
    let clock = Arc::new(SoftwareClock::new(pid));
    let monitor = Arc::new(SyncMonitor::new(monitor_config, vec![Box::new(LoggingObserver)]));

    info!("slave syncing against {master_addr}");
    let mut controller =
        SyncController::spawn(client, clock, monitor, wire, step_threshold_s);

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("failed to install Ctrl-C handler")?;

    while !stop.load(Ordering::SeqCst) && controller.is_running() {
        std::thread::sleep(Duration::from_millis(500));
    }

    info!("shutting down");
    controller.stop();
    Ok(())
}
