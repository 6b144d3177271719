//! `aloha-channel`: the shared medium process.
//!
//! Runs slots until end-of-input on stdin or Ctrl-C, then prints per-station
//! statistics.

use anyhow::Context;
use clap::Parser;
use slotted_aloha::channel::{ChannelConfig, ChannelEngine, ShutdownHandle};
use slotted_aloha::metrics::{start_metrics_server, MetricsConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Slotted ALOHA channel emulator.
#[derive(Parser, Debug)]
#[command(name = "aloha-channel", version, about)]
struct Cli {
    /// TCP port to accept stations on.
    chan_port: u16,

    /// Slot duration in milliseconds.
    slot_time_ms: u64,

    /// Maximum number of simultaneously attached stations.
    #[arg(long, default_value_t = slotted_aloha::channel::types::DEFAULT_MAX_STATIONS)]
    max_stations: usize,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// Print the final report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("aloha-channel: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(addr) = cli.metrics_addr {
        start_metrics_server(MetricsConfig::with_addr(addr))
            .context("starting metrics exporter")?;
    }

    let config = ChannelConfig {
        bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, cli.chan_port)),
        slot_time: Duration::from_millis(cli.slot_time_ms),
        max_stations: cli.max_stations,
        ..Default::default()
    };
    let engine = ChannelEngine::bind(config)
        .await
        .context("starting channel")?;

    let shutdown = ShutdownHandle::new();
    spawn_stdin_watch(shutdown.clone());
    spawn_ctrl_c_watch(shutdown.clone());

    let report = engine.run(shutdown).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        eprintln!("{report}");
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// End-of-input on the console stops the channel.
fn spawn_stdin_watch(shutdown: ShutdownHandle) {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 256];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => {
                    info!("End of input on console");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "Console read failed; use Ctrl-C to stop");
                    return;
                }
            }
        }
        shutdown.trigger();
    });
}

fn spawn_ctrl_c_watch(shutdown: ShutdownHandle) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted");
                shutdown.trigger();
            }
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
        }
    });
}
