//! CLI entry point for scope-link
//!
//! # Usage
//!
//! List attached devices:
//! ```bash
//! scope-link ports
//! ```
//!
//! Watch the live feed for a minute with auto-reconnect:
//! ```bash
//! scope-link --mode serial monitor --seconds 60
//! ```
//!
//! Take a photo after a 3 s countdown, or a burst of five:
//! ```bash
//! scope-link capture --session s1 --patient p1 --eye left --delay 3
//! scope-link batch --session s1 --patient p1 --eye right --count 5
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scope_client::{BatchObserver, ClientEvent, ReconnectStatus};
use scope_core::records::{save_capture, CapturedImage, Eye};
use scope_core::{ScopeError, TransportMode};
use scope_link::{config::ScopeConfig, logging, AppContext};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "scope-link")]
#[command(about = "Link, stream and capture from a serial/USB imaging scope", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = scope_link::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Transport to use (serial, usb, simulated); overrides the config
    #[arg(long, global = true)]
    mode: Option<TransportMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports and USB devices
    Ports,

    /// Connect, stream and log telemetry
    Monitor {
        /// How long to watch
        #[arg(long, default_value = "30")]
        seconds: u64,
    },

    /// Take one photo
    Capture {
        #[arg(long)]
        session: String,
        #[arg(long)]
        patient: String,
        /// left/right (also l, r, os, od)
        #[arg(long)]
        eye: Eye,
        /// Countdown before the shot, in seconds
        #[arg(long, default_value = "0")]
        delay: u64,
    },

    /// Take a paced burst of photos
    Batch {
        #[arg(long)]
        session: String,
        #[arg(long)]
        patient: String,
        #[arg(long)]
        eye: Eye,
        /// Shots to take; defaults to the configured batch count
        #[arg(long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ScopeConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    config.validate().context("invalid configuration")?;
    logging::init_from_config(&config)?;

    let mode = cli.mode.unwrap_or(config.connection.default_mode);
    let ctx = AppContext::new(config);

    let result = match cli.command {
        Commands::Ports => list_ports(),
        Commands::Monitor { seconds } => monitor(&ctx, mode, seconds).await,
        Commands::Capture {
            session,
            patient,
            eye,
            delay,
        } => capture_once(&ctx, mode, &session, &patient, eye, delay).await,
        Commands::Batch {
            session,
            patient,
            eye,
            count,
        } => {
            let count = count.unwrap_or(ctx.config().capture.batch_count);
            capture_batch(&ctx, mode, &session, &patient, eye, count).await
        }
    };

    ctx.shutdown().await;
    result
}

fn list_ports() -> Result<()> {
    let serial = scope_hardware::list_serial_ports().context("enumerating serial ports")?;
    println!("Serial ports ({}):", serial.len());
    for port in &serial {
        println!("  {:<24} {}", port.name, port.description);
    }
    if !scope_hardware::serial_supported() {
        println!("  (serial support not compiled in)");
    }

    let usb = scope_hardware::list_usb_devices().context("enumerating USB devices")?;
    println!("USB devices ({}):", usb.len());
    for device in &usb {
        println!("  {:<24} {}", device.name, device.description);
    }
    if !scope_hardware::usb_supported() {
        println!("  (USB support not compiled in)");
    }
    Ok(())
}

async fn connect(ctx: &AppContext, mode: TransportMode) -> Result<()> {
    ctx.connect(mode)
        .await
        .with_context(|| format!("connecting over {}", mode))
}

async fn monitor(ctx: &AppContext, mode: TransportMode, seconds: u64) -> Result<()> {
    let client = ctx.client();
    let mut events = client.subscribe();
    let mut statuses = ctx.reconnect().subscribe_status();

    connect(ctx, mode).await?;
    ctx.start_supervision();
    client.start_stream().await.context("starting stream")?;

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut report = tokio::time::interval(Duration::from_secs(1));
    let mut frames = 0u32;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            _ = report.tick() => {
                info!(frames_per_sec = frames, state = %client.state(), "Feed");
                frames = 0;
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Frame(_)) => frames += 1,
                Ok(ClientEvent::Telemetry(t)) => {
                    info!(fps = t.fps, battery = t.battery, status = %t.connection_status, "Telemetry");
                }
                Ok(ClientEvent::StateChanged(state)) => info!("State: {}", state),
                Ok(ClientEvent::DeviceError(message)) => warn!("Device error: {}", message),
                Err(RecvError::Lagged(skipped)) => debug!("Monitor skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
            status = statuses.recv() => match status {
                Ok(ReconnectStatus::Reconnected) => {
                    if let Err(e) = client.start_stream().await {
                        warn!("Could not resume stream: {}", e);
                    }
                }
                Ok(ReconnectStatus::MaxAttemptsReached) => {
                    error!("Giving up on the link");
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Err(e) = client.stop_stream().await {
        debug!("Stop stream: {}", e);
    }
    Ok(())
}

async fn persist(ctx: &AppContext, image: &CapturedImage) -> Result<()> {
    save_capture(ctx.store(), image)
        .await
        .with_context(|| format!("saving {}", image.metadata.id))?;
    println!(
        "{}  {}",
        image.metadata.id,
        ctx.store().image_path(&image.metadata.id).display()
    );
    Ok(())
}

async fn capture_once(
    ctx: &AppContext,
    mode: TransportMode,
    session: &str,
    patient: &str,
    eye: Eye,
    delay: u64,
) -> Result<()> {
    connect(ctx, mode).await?;
    if delay > 0 {
        info!("Capturing in {}s", delay);
    }
    let image = ctx
        .capture()
        .capture_with_timer(session, patient, eye, delay)
        .await
        .context("capture failed")?;
    persist(ctx, &image).await
}

struct ProgressPrinter;

impl BatchObserver for ProgressPrinter {
    fn on_progress(&self, current: usize, total: usize) {
        info!("Shot {}/{}", current, total);
    }

    fn on_complete(&self, captures: &[CapturedImage]) {
        info!("Batch finished with {} capture(s)", captures.len());
    }

    fn on_error(&self, error: &ScopeError) {
        warn!("Batch stopped: {}", error);
    }
}

async fn capture_batch(
    ctx: &AppContext,
    mode: TransportMode,
    session: &str,
    patient: &str,
    eye: Eye,
    count: usize,
) -> Result<()> {
    connect(ctx, mode).await?;
    let batch = ctx.batch().with_observer(std::sync::Arc::new(ProgressPrinter));
    let cancel = batch.cancel_handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let outcome = batch.start(session, patient, eye, count).await;
    watcher.abort();

    let captures = outcome.context("batch capture failed")?;
    for image in &captures {
        persist(ctx, image).await?;
    }
    Ok(())
}
