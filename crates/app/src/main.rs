use anyhow::{bail, Context};
use clap::Parser;
use omnicam_capture::{
    CaptureBackend, CaptureConfig, CaptureManager, DeviceClass, DeviceDiscovery, DisplaySink,
    FixedListDiscovery, ProbeDiscovery, RunMode, SyntheticBackend, SysfsDiscovery, VideoFrame,
};
use omnicam_foundation::{install_shutdown_handler, real_clock, CaptureError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

#[derive(Parser, Debug)]
#[command(name = "omnicam", about = "Multi-camera capture orchestrator")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Network stream source; repeatable. Implies the fixed-list device
    /// class.
    #[arg(long = "url", value_name = "URI")]
    urls: Vec<String>,

    /// Probe indices 0..N when looking for local devices.
    #[arg(long)]
    max_devices: Option<u32>,

    /// Trust the video4linux enumeration files instead of probe-opening
    /// each candidate.
    #[arg(long)]
    sysfs: bool,

    /// Create a display surface per device.
    #[arg(long)]
    display: bool,

    /// Cycle through devices one at a time instead of one worker each.
    #[arg(long)]
    sequential: bool,

    /// Camera count exposed by the built-in synthetic backend.
    #[arg(long, default_value_t = 2, env = "OMNICAM_SYNTHETIC_DEVICES")]
    synthetic_devices: u32,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    fps: Option<u32>,
}

fn init_logging() -> anyhow::Result<()> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "omnicam.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    std::mem::forget(guard);
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<CaptureConfig> {
    let mut cfg = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => CaptureConfig::default(),
    };

    if !cli.urls.is_empty() {
        cfg.device_class = DeviceClass::FixedList;
        cfg.device_list = cli.urls.clone();
    }
    if let Some(n) = cli.max_devices {
        cfg.max_devices = n;
    }
    if cli.display {
        cfg.show_display = true;
    }
    if cli.sequential {
        cfg.run_mode = RunMode::Sequential;
    }
    if let Some(w) = cli.width {
        cfg.frame_width = w;
    }
    if let Some(h) = cli.height {
        cfg.frame_height = h;
    }
    if let Some(fps) = cli.fps {
        cfg.target_fps = fps;
    }
    Ok(cfg)
}

/// Display collaborator that narrates surface lifecycle into the log. A GUI
/// integration would put its windowing calls behind the same trait.
struct LogDisplay;

impl DisplaySink for LogDisplay {
    fn create_surface(&mut self, title: &str) -> Result<(), CaptureError> {
        tracing::info!("Surface created: {}", title);
        Ok(())
    }

    fn show(&mut self, title: &str, frame: &VideoFrame) -> Result<(), CaptureError> {
        tracing::trace!("{}: {}x{} frame", title, frame.width, frame.height);
        Ok(())
    }

    fn destroy_surface(&mut self, title: &str) {
        tracing::info!("Surface destroyed: {}", title);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;
    tracing::info!("Starting omnicam");

    let cfg = load_config(&cli)?;
    let shutdown = install_shutdown_handler().await;

    let clock = real_clock();
    let backend: Arc<dyn CaptureBackend> =
        Arc::new(SyntheticBackend::new(cli.synthetic_devices, clock.clone()));
    let discovery: Box<dyn DeviceDiscovery> = match cfg.device_class {
        DeviceClass::FixedList => {
            Box::new(FixedListDiscovery::from_uris(cfg.device_list.clone()))
        }
        DeviceClass::Probed if cli.sysfs => Box::new(SysfsDiscovery::new(cfg.max_devices)),
        DeviceClass::Probed => Box::new(ProbeDiscovery::new(
            Arc::clone(&backend),
            cfg.max_devices,
        )),
    };

    let show_display = cfg.show_display;
    let mut manager = CaptureManager::new(cfg, backend, discovery)
        .with_clock(clock)
        .with_frame_callback(Arc::new(|id, frame| {
            tracing::debug!("Frame from camera {}: {}x{}", id, frame.width, frame.height);
        }));
    if show_display {
        manager = manager.with_display(Box::new(LogDisplay));
    }

    let stop = manager.stop_handle();
    let metrics = manager.metrics();
    let mut events = manager.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!("Device event: {:?}", event);
        }
    });

    let runner = std::thread::Builder::new()
        .name("capture-main".to_string())
        .spawn(move || manager.run())?;

    let mut stats_interval = tokio::time::interval(Duration::from_secs(30));
    let mut liveness = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                tracing::info!("Shutdown signal received");
                stop.request_stop();
                break;
            }
            _ = stats_interval.tick() => {
                tracing::info!("Pipeline stats: {:?}", metrics.snapshot());
            }
            _ = liveness.tick() => {
                if shutdown.is_shutdown_requested() {
                    stop.request_stop();
                    break;
                }
                if runner.is_finished() {
                    break;
                }
            }
        }
    }

    match runner.join() {
        Ok(result) => result?,
        Err(_) => bail!("capture runner panicked"),
    }
    tracing::info!("Omnicam stopped");
    Ok(())
}
