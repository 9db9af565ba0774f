//! widgetd - desktop widget engine daemon.
//!
//! Serves the widget API on the main port and the same router on the two
//! layer preview ports (requests arriving there are implicitly scoped to
//! that layer). Background tasks poll layer manifests for changes and
//! broadcast time and audio state.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser as ClapParser;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use widgetd::{
    api,
    audio::{AudioService, NullAudioSource},
    clock::TimeService,
    config::{ConfigError, EngineConfig},
    layer::LayerResolver,
    store::ManifestStore,
    watcher::ChangeWatcher,
};

/// widgetd - desktop widget engine
///
/// Hosts HTML/CSS/JS widgets behind an HTTP API with per-layer manifest
/// state for the desktop background and the overlay.
#[derive(ClapParser, Debug)]
#[command(name = "widgetd", version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "widgetd.toml")]
    config: PathBuf,

    /// Base directory for the widget roots
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Main API port (overrides config)
    #[arg(long, env = "WIDGETD_API_PORT")]
    api_port: Option<u16>,

    /// Background preview port (overrides config)
    #[arg(long)]
    background_port: Option<u16>,

    /// Overlay preview port (overrides config)
    #[arg(long)]
    overlay_port: Option<u16>,
}

#[derive(Error, Debug)]
pub enum WidgetdError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), WidgetdError> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = EngineConfig::load(&cli.config)?.unwrap_or_default();
    if let Some(port) = cli.api_port {
        config.api_port = port;
    }
    if let Some(port) = cli.background_port {
        config.background_port = port;
    }
    if let Some(port) = cli.overlay_port {
        config.overlay_port = port;
    }
    let config = config.rooted(&cli.root);

    run_server(config).await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "widgetd=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_server(config: EngineConfig) -> Result<(), WidgetdError> {
    tracing::info!("widgetd starting");

    let store = ManifestStore::new(&config.widgets_root);
    let resolver = Arc::new(LayerResolver::from_config(&config));
    let clock = Arc::new(TimeService::new());
    let audio = Arc::new(AudioService::new(Arc::new(NullAudioSource)));
    let watcher = Arc::new(ChangeWatcher::new(store.clone(), (*resolver).clone()));

    let state = api::AppState {
        store,
        resolver,
        clock: clock.clone(),
        audio: audio.clone(),
        listen_port: None,
    };

    // One shutdown signal fanned out to every listener.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());

    let mut serve_handles = Vec::new();
    for port in config.ports() {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        tracing::info!(port, "listening");
        // Each listener gets a router that knows which port it serves, so
        // preview-port layer inference reflects the actual socket.
        let app = api::router(api::AppState {
            listen_port: Some(port),
            ..state.clone()
        });
        let mut shutdown = shutdown_rx.clone();
        serve_handles.push(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(port, error = %e, "listener exited with error");
            }
        }));
    }

    let watcher_handle = watcher.spawn();
    let clock_handles = clock.spawn();
    let audio_handle = audio.spawn();

    tracing::info!("widgetd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl+C");

    let _ = shutdown_tx.send(());
    for handle in serve_handles {
        if let Err(e) = handle.await {
            tracing::warn!(?e, "listener task panicked");
        }
    }

    watcher_handle.abort();
    audio_handle.abort();
    for handle in clock_handles {
        handle.abort();
    }

    tracing::info!("widgetd exiting");
    Ok(())
}
