//! streamview entry point.
//!
//! ```text
//! streamview                        Run with streamview.toml (or defaults)
//! streamview --config <path>        Load a custom config TOML
//! streamview --gen-config           Write default config to stdout
//! streamview --stream-url <url>     Capture from an explicit URL
//! streamview --debug                Force debug logging
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use streamview::config::ViewerConfig;
use streamview::service::ViewerService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "streamview", about = "RTMP stream viewer with live stream metrics")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "streamview.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Address the handshake listener binds to.
    #[arg(long)]
    ip: Option<String>,

    /// RTMP port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Stream path, e.g. /live/stream.
    #[arg(long)]
    stream_path: Option<String>,

    /// Full stream URL to capture from.
    #[arg(long)]
    stream_url: Option<String>,

    /// Host shown in the stream URL instead of the detected address.
    #[arg(long)]
    local_ip: Option<String>,

    /// Frames in the FPS moving average.
    #[arg(long)]
    fps_history_length: Option<usize>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn apply(&self, config: &mut ViewerConfig) {
        if let Some(ip) = &self.ip {
            config.network.bind_address = ip.clone();
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(path) = &self.stream_path {
            config.network.stream_path = path.clone();
        }
        if let Some(url) = &self.stream_url {
            config.network.stream_url = Some(url.clone());
        }
        if let Some(ip) = &self.local_ip {
            config.network.local_ip = Some(ip.clone());
        }
        if let Some(n) = self.fps_history_length {
            config.capture.fps_history_length = n;
        }
        if self.debug {
            config.logging.level = "debug".into();
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // tracing is not up yet: the load outcome is logged below
    let (mut config, load_status) = ViewerConfig::load_with_status(&cli.config);
    cli.apply(&mut config);

    // --debug wins over RUST_LOG
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("streamview v{}", env!("CARGO_PKG_VERSION"));
    load_status.log(&cli.config);
    info!("RTMP port: {}", config.network.port);
    info!("FPS history: {} frames", config.capture.fps_history_length);
    info!("window {}, video area {}", config.window_size(), config.display_size());

    let service = ViewerService::new(config);
    let stop = CancellationToken::new();

    let stop_clone = stop.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop_clone.cancel();
    });

    service.run(stop).await;
    Ok(())
}
