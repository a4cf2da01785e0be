//! uvc-capture binary: list capture modes and run the acquisition loop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use clap::Parser;
use tracing::{info, warn};

use uvc_capture::logging::init_logging;
use uvc_capture::{enumerate, select_mode, CaptureSession, Config, Result};

/// Set by the Ctrl-C handler; checked between frames.
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Substring of the device name to capture from
    #[arg(short, long)]
    device_name: Option<String>,

    /// Capture width
    #[arg(long)]
    width: Option<u32>,

    /// Capture height
    #[arg(long)]
    height: Option<u32>,

    /// Pixel format tag (YUYV or Y8I)
    #[arg(short, long)]
    format: Option<String>,

    /// Frame wait timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Conversion threads per frame
    #[arg(short, long)]
    workers: Option<usize>,

    /// Stop after this many frames
    #[arg(short = 'n', long)]
    frames: Option<u64>,

    /// List available modes and exit
    #[arg(short, long)]
    list: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    /// Apply command line overrides on top of the file configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(name) = &self.device_name {
            config.request.device_name.clone_from(name);
        }
        if let Some(width) = self.width {
            config.request.width = width;
        }
        if let Some(height) = self.height {
            config.request.height = height;
        }
        if let Some(format) = &self.format {
            config.request.format.clone_from(format);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.session.timeout_ms = timeout_ms;
        }
        if let Some(workers) = self.workers {
            config.session.workers = workers;
        }
        if self.debug {
            "debug".clone_into(&mut config.logging.level);
        }
    }
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(&args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    init_logging(&config.logging);

    let request = config.to_request()?;
    let discovery = enumerate(config.session.max_modes);
    for mode in &discovery.modes {
        println!("{mode}");
    }
    if discovery.truncated {
        warn!(max_modes = config.session.max_modes, "Mode list truncated");
    }
    if args.list {
        return Ok(());
    }

    let mode = select_mode(&discovery.modes, &request)?;
    info!(%mode, "Using video mode");

    if let Err(err) = ctrlc::set_handler(|| STOP_REQUESTED.store(true, Ordering::SeqCst)) {
        warn!(%err, "Failed to install Ctrl-C handler");
    }

    let mut session = CaptureSession::open_path(mode)?;
    session.start_streaming()?;

    let mut rgb = vec![0u8; session.mode().rgb_len()?];
    let timeout = config.session.timeout();
    let mut captured = 0u64;

    while !STOP_REQUESTED.load(Ordering::SeqCst) && args.frames.map_or(true, |limit| captured < limit) {
        let started = Instant::now();
        let metadata = session.capture_rgb(timeout, &mut rgb, config.session.workers)?;
        let delta_us = u64::try_from(started.elapsed().as_micros())
            .unwrap_or(u64::MAX)
            .max(1);

        #[allow(clippy::cast_precision_loss)]
        let fps = 1_000_000.0 / delta_us as f64;
        info!(
            sequence = metadata.sequence,
            bytes = metadata.bytes_used,
            delta_us,
            fps = %format!("{fps:.1}"),
            "Frame converted"
        );
        captured += 1;
    }

    info!(frames = captured, "Capture finished");
    session.stop_streaming()?;
    session.close()
}
