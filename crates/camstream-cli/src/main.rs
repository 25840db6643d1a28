//! camstream - watch an MJPEG network camera from the terminal
//!
//! Connects to `http://<address>:<port>/stream`, decodes frames as they
//! arrive, and reports frame rate until Ctrl-C, `--duration`, or the camera
//! ends the stream.

mod listener;

use anyhow::{bail, Context, Result};
use camstream_core::{StreamConfig, StreamController};
use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use listener::ConsoleListener;

#[derive(Parser, Debug)]
#[command(name = "camstream", version)]
#[command(about = "Stream and decode frames from an MJPEG network camera", long_about = None)]
struct Args {
    /// Camera IPv4 address
    #[arg(value_parser = parse_address)]
    address: Ipv4Addr,

    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stream port, overriding the config
    #[arg(short, long)]
    port: Option<u16>,

    /// Stop after this many seconds (0 runs until Ctrl-C)
    #[arg(short, long, default_value_t = 0)]
    duration: u64,

    /// Also rescale every frame to WIDTHxHEIGHT, as for model input
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    infer_size: Option<(u32, u32)>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

fn parse_address(value: &str) -> Result<Ipv4Addr, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a valid IPv4 address", value))
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let width: u32 = width.trim().parse().map_err(|_| format!("bad width in '{}'", value))?;
    let height: u32 = height.trim().parse().map_err(|_| format!("bad height in '{}'", value))?;
    if width == 0 || height == 0 {
        return Err("size must be non-zero".to_string());
    }
    Ok((width, height))
}

fn init_tracing(args: &Args) {
    // RUST_LOG wins over the command line
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::from_default_env()
    } else {
        let level = if args.verbose { "debug" } else { args.log_level.as_str() };
        tracing_subscriber::EnvFilter::new(format!(
            "camstream={level},camstream_core={level},reqwest=warn,hyper=warn"
        ))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let mut config =
        StreamConfig::load_or_default(args.config.as_deref()).context("Failed to load config")?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let controller = Arc::new(
        StreamController::from_config(config).context("Failed to create stream controller")?,
    );
    let listener = Arc::new(ConsoleListener::new(args.infer_size));
    let address = args.address.to_string();
    controller
        .start(&address, listener.clone())
        .with_context(|| format!("Failed to start stream from {}", address))?;

    let deadline = async {
        if args.duration > 0 {
            tokio::time::sleep(Duration::from_secs(args.duration)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping stream"),
        _ = listener.stopped() => info!("Stream ended"),
        _ = deadline => info!("Ran for {}s, stopping stream", args.duration),
    }

    // stop() joins the stream thread
    let stopper = Arc::clone(&controller);
    tokio::task::spawn_blocking(move || stopper.stop())
        .await
        .context("Stop task failed")?;

    if let Some(stats) = controller.stats() {
        info!(
            "{} bytes read, {} frames extracted, {} rejected, {} decoded, {} decode failures, {} skipped while busy",
            stats.bytes_read,
            stats.frames_extracted,
            stats.frames_rejected,
            stats.frames_decoded,
            stats.decode_failures,
            stats.frames_dropped_busy
        );
    }
    if let Some(last) = controller.last_frame() {
        info!(
            "Last frame #{}: {}x{} ({} bytes, decoded {:?} ago)",
            last.sequence,
            last.width,
            last.height,
            last.encoded_len,
            last.decoded_at.elapsed()
        );
    }

    if let Some(message) = listener.error() {
        bail!("Stream from {} failed: {}", address, message);
    }
    Ok(())
}
