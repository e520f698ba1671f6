//! KillTally Server
//!
//! Counts kills in memory and writes them back to PostgreSQL or SQLite on a
//! fixed cadence, with one final flush on shutdown.

mod handlers;
mod settings;
mod storage;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use killtally_core::KillTracker;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use settings::{LogFormat, LoggingSettings, Settings};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<KillTracker>,
}

#[tokio::main]
async fn main() {
    // Set up panic hook to log crashes
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()));
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        eprintln!("[PANIC] at {:?}: {}", location, payload);
        tracing::error!("PANIC at {:?}: {}", location, payload);
    }));

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("[FATAL] {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_tracing(&settings.logging) {
        eprintln!("[FATAL] Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!("Starting KillTally Server v{}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    if let Err(e) = run_server(settings).await {
        error!("Server failed: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(logging: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match logging.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!(e))
}

async fn run_server(settings: Settings) -> Result<()> {
    info!(
        "Config loaded: bind={}, data_dir={}, storage={}",
        settings.server.bind_address,
        settings.server.data_dir.display(),
        settings.storage.kind
    );

    info!("Connecting to storage...");
    let store = storage::connect(&settings.storage, &settings.server.data_dir)
        .await
        .context("Failed to open storage")?;

    info!("Starting kill tracker...");
    let tracker = Arc::new(
        KillTracker::start(store, settings.flush.clone())
            .await
            .context("Failed to initialize kill tracker")?,
    );
    info!(
        "Kill tracker ready (flush every {}s)",
        settings.flush.interval_secs
    );

    let state = AppState {
        tracker: tracker.clone(),
    };

    let addr: SocketAddr = settings
        .server
        .bind_address
        .parse()
        .context("Failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Server listening on {}", addr);

    let served = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    // Flush whatever is still pending even if serving failed
    let flushed = tracker.shutdown().await;
    served?;
    flushed.context("Final flush failed")?;

    info!("Server stopped");
    Ok(())
}

pub(crate) fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_routes())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/kills", post(handlers::kills::record))
        .route(
            "/actors/:id",
            get(handlers::actors::exists).put(handlers::actors::register),
        )
        .route("/actors/:id/kills", get(handlers::actors::kills))
        .route("/actors/:id/records", get(handlers::actors::records))
        .route(
            "/actors/by-name/:name/kills",
            get(handlers::actors::kills_by_name),
        )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
