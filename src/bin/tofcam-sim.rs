//! Drive a camera node against the simulated camera.
//!
//! # Usage
//!
//! ```bash
//! # Stream the default schema for ten seconds
//! tofcam-sim --duration 10
//!
//! # Read parameters from a file and stall the camera after 3 s
//! tofcam-sim --params-file camera.yaml --stall-after 3
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tofcam::devices::{SimulatedCamera, SimulatedConfig};
use tofcam::messages::{Message, Topic};
use tofcam::params::{Parameter, load_parameter_file};
use tofcam::transport::ChannelTransport;
use tofcam::{CameraNode, State};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "tofcam-sim")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a time-of-flight camera node against a simulated camera")]
struct Cli {
    /// Node name, also the parameter file section and frame id prefix
    #[arg(short, long, default_value = "camera")]
    name: String,

    /// ROS 2 style parameter file
    #[arg(short, long)]
    params_file: Option<PathBuf>,

    /// Schema mask override
    #[arg(short, long)]
    mask: Option<u16>,

    /// Seconds to stream before shutting down
    #[arg(short, long, default_value = "5")]
    duration: u64,

    /// Stall the simulated camera after this many seconds
    #[arg(long)]
    stall_after: Option<u64>,

    /// Simulated frame rate in Hz
    #[arg(long, default_value = "20")]
    fps: u32,

    /// Simulate a color imager
    #[arg(long)]
    color: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "tofcam=debug" } else { "tofcam=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).with_target(false).init();

    let mut overrides = match &cli.params_file {
        Some(path) => load_parameter_file(path, &cli.name)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => Vec::new(),
    };
    if let Some(mask) = cli.mask {
        overrides.push(Parameter::new("schema_mask", mask as i64));
    }

    let camera = SimulatedCamera::new(SimulatedConfig {
        frame_interval: Duration::from_secs_f64(1.0 / cli.fps.max(1) as f64),
        has_color: cli.color,
        ..SimulatedConfig::default()
    });
    let transport = Arc::new(ChannelTransport::default());
    let node = CameraNode::new(&cli.name, &overrides, Arc::new(camera.clone()), transport.clone())
        .context("Invalid parameters")?;

    let mut clouds = Box::pin(transport.subscribe_throttled(Topic::Cloud, Duration::from_secs(1)));
    tokio::spawn(async move {
        while let Some(message) = clouds.next().await {
            if let Message::Cloud(cloud) = message.as_ref() {
                info!(
                    frame_id = %cloud.header.frame_id,
                    points = cloud.width * cloud.height,
                    "Point cloud"
                );
            }
        }
    });

    let mut states = node.watch_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            if state == State::ErrorProcessing {
                warn!("Node entered error processing");
            }
        }
    });

    node.configure().await.context("Configure failed")?;
    node.activate().await.context("Activate failed")?;
    info!(duration_secs = cli.duration, "Streaming");

    if let Some(after) = cli.stall_after.filter(|after| *after < cli.duration) {
        tokio::time::sleep(Duration::from_secs(after)).await;
        warn!("Stalling simulated camera");
        camera.set_stalled(true);
        tokio::time::sleep(Duration::from_secs(cli.duration - after)).await;
    } else {
        tokio::time::sleep(Duration::from_secs(cli.duration)).await;
    }

    let stats = node.stats();
    info!(
        frames = stats.frames(),
        messages = stats.messages(),
        timeouts = stats.timeouts(),
        stale = stats.stale_frames(),
        state = %node.state(),
        "Shutting down"
    );
    node.shutdown().await.context("Shutdown failed")?;
    Ok(())
}
