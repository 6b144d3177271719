//! `aloha-sender`: transmit one file through a running channel.
//!
//! Exits 0 only if every frame of the file was acknowledged.

use anyhow::Context;
use clap::Parser;
use slotted_aloha::metrics::{start_metrics_server, MetricsConfig};
use slotted_aloha::sender::{AckPolicy, FrameSender, SenderConfig, SenderError, DEFAULT_MAX_RETRIES};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Send a file over a slotted ALOHA channel.
#[derive(Parser, Debug)]
#[command(name = "aloha-sender", version, about)]
struct Cli {
    /// Channel IP address.
    chan_ip: IpAddr,

    /// Channel TCP port.
    chan_port: u16,

    /// File to transmit.
    file_name: PathBuf,

    /// Frame size in bytes, including the 4-byte header.
    frame_size: usize,

    /// Slot duration in milliseconds.
    slot_time: u64,

    /// Seed for the backoff random source.
    seed: u64,

    /// Seconds to wait for each acknowledgment.
    timeout: u64,

    /// Attempts per frame before giving up.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Only accept a byte-for-byte echo of the frame as its acknowledgment.
    #[arg(long)]
    strict_ack: bool,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// Print the report as JSON on stdout.
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
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("aloha-sender: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// Returns whether the whole file was delivered.
async fn run(cli: Cli) -> anyhow::Result<bool> {
    if let Some(addr) = cli.metrics_addr {
        start_metrics_server(MetricsConfig::with_addr(addr))
            .context("starting metrics exporter")?;
    }

    let mut config = SenderConfig::new(
        SocketAddr::new(cli.chan_ip, cli.chan_port),
        cli.frame_size,
        Duration::from_millis(cli.slot_time),
        cli.seed,
        Duration::from_secs(cli.timeout),
    );
    config.max_retries = cli.max_retries;
    if cli.strict_ack {
        config.ack_policy = AckPolicy::FullFrame;
    }
    config.validate()?;

    let file = tokio::fs::File::open(&cli.file_name)
        .await
        .map_err(|source| SenderError::Source {
            path: cli.file_name.clone(),
            source,
        })?;
    info!(file = %cli.file_name.display(), frame_size = config.frame_size, "Opened input");

    let mut sender = FrameSender::connect(config).await?;
    let label = cli.file_name.display().to_string();
    let report = sender.transfer(file, &label).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        eprintln!("{report}");
    }
    Ok(report.is_success())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
