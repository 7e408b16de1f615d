use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use clocksync::config::{load_config, Config};
use clocksync::reference_clock::ReferenceTimescale;
use clocksync::reply_engine::{ReplyEngine, UdpReplyTransport};

/// Publishes a reference timescale and answers Slave sync requests over UDP.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON config file; missing or unparseable falls back to
    /// built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the reply socket to. Overrides the config file.
    #[arg(long)]
    bind_addr: Option<SocketAddr>,

    /// UDP port to listen on. Overrides both the config file and the port
    /// embedded in `--bind-addr`.
    #[arg(long)]
    sync_port: Option<u16>,

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

    if let Some(port) = args.sync_port {
        config.wire.sync_port = port;
    }

    let bind_addr = args
        .bind_addr
        .unwrap_or_else(|| SocketAddr::new("0.0.0.0".parse().unwrap(), config.wire.sync_port));

    let timescale = Arc::new(ReferenceTimescale::new());
    let transport = UdpReplyTransport::bind(bind_addr)
        .with_context(|| format!("failed to bind reply socket on {bind_addr}"))?;
    let mut engine = ReplyEngine::spawn(transport, timescale);

    info!("master listening on {bind_addr}");

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("failed to install Ctrl-C handler")?;

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(500));
    }

    info!("shutting down");
    engine.stop();
    Ok(())
}
