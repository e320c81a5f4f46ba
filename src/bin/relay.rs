//! Camera Relay Client
//!
//! Captures the local camera and microphone, relays encoded chunks to the
//! ingest endpoint and opens the generated playlist once it is ready.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camera_relay::{
    capture::{device, FfmpegEngine, MediaEngine, SyntheticEngine},
    config::AppConfig,
    network::{fetch_csrf_token, ConnectionState},
    playback::player_from_config,
    session::SessionDriver,
    ui::WebServer,
};

#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "Relay a live camera feed to an ingest endpoint")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// WebSocket endpoint, e.g. ws://localhost:4000/socket
    #[arg(short, long)]
    endpoint: Option<String>,

    /// CSRF token appended to the connection URL
    #[arg(long)]
    token: Option<String>,

    /// Page to scrape the csrf-token meta tag from when no token is configured
    #[arg(long)]
    token_page: Option<String>,

    /// Use the synthetic engine instead of ffmpeg
    #[arg(long)]
    synthetic: bool,

    /// List capture devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Start recording as soon as the channel is open
    #[arg(long)]
    record: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        print_devices();
        return Ok(());
    }

    tracing::info!("Starting camera relay");

    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(endpoint) = cli.endpoint {
        config.channel.endpoint = endpoint;
    }
    if let Some(token) = cli.token {
        config.channel.csrf_token = Some(token);
    }
    if config.channel.csrf_token.is_none() {
        if let Some(page) = cli.token_page.as_deref() {
            let token = fetch_csrf_token(page)
                .await
                .with_context(|| format!("fetching csrf token from {}", page))?;
            config.channel.csrf_token = Some(token);
        }
    }
    if config.channel.csrf_token.is_none() {
        tracing::warn!("No csrf token configured; connecting without one");
    }

    let engine: Box<dyn MediaEngine> = if cli.synthetic {
        Box::new(SyntheticEngine::new())
    } else {
        Box::new(FfmpegEngine::new(&config.capture))
    };
    tracing::info!("Capture engine: {}", engine.name());

    let player = player_from_config(&config.playback);
    let (handle, task) = SessionDriver::launch(&config, engine.as_ref(), player)
        .await
        .context("starting relay session")?;

    let status = handle.status();
    tracing::info!(
        session = %status.session_id,
        mimetype = %status.mimetype,
        manifest = %status.manifest_url,
        "session ready"
    );

    if config.ui.enabled {
        let server = WebServer::new(config.ui.clone(), handle.clone());
        let _web_handle = server.start_background();
        tracing::info!(
            "Control API available at http://{}:{}",
            config.ui.bind_address,
            config.ui.http_port
        );
    }

    match handle.wait_for_connection().await {
        ConnectionState::Open => tracing::info!("Connected to {}", config.channel.endpoint),
        state => {
            let reason = handle.status().last_error.unwrap_or_else(|| format!("{:?}", state));
            let _ = handle.stop().await;
            let _ = task.await;
            bail!("could not connect to {}: {}", config.channel.endpoint, reason);
        }
    }

    if cli.record {
        handle.record().await.context("arming recording")?;
        tracing::info!("Recording - press Ctrl+C to stop");
    } else {
        tracing::info!("Waiting for record trigger - press Ctrl+C to quit");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Stopping");
            if let Err(e) = handle.stop().await {
                tracing::warn!("Stop failed: {}", e);
            }
        }
        status = handle.wait_for(|s| s.stopped_at.is_some()) => {
            if status.is_some() {
                tracing::info!("Session stopped");
            }
        }
    }

    task.await.context("session task")?;

    let counters = handle.status().counters;
    tracing::info!(
        "Relayed {} chunks ({:.1} KB), dropped {}",
        counters.relayed,
        counters.relayed_bytes as f64 / 1024.0,
        counters.dropped_gate + counters.dropped_not_open + counters.dropped_empty
    );

    Ok(())
}

fn print_devices() {
    println!("\n=== Video Devices ===");
    let videos = device::list_video_devices();
    if videos.is_empty() {
        println!("  (none)");
    }
    for info in &videos {
        println!("  {} - {}", info.path.display(), info.name);
    }

    println!("\n=== Audio Inputs ===");
    let inputs = device::list_audio_inputs();
    if inputs.is_empty() {
        println!("  (none)");
    }
    for input in &inputs {
        let default_marker = if input.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}", input.name, default_marker);
    }
    println!();
}
