//! Barangay API server
//!
//! Serves the REST API over the Sled store at `DATABASE_URL`.
//!
//! Usage:
//!   cargo run --bin seed_data       # sample barangay, admin and resident
//!   cargo run --bin barangay-api    # start server
//!   cargo run --bin barangay-cli -- --help

use axum::http::{header, Method};
use tokio::net::TcpListener;
use tokio::signal::{self, ctrl_c};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use barangay_api::config::Config;
use barangay_api::rest::{create_router, AppState};
use barangay_api::storage::Storage;
use barangay_api::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;
    let _log_guard = telemetry::init(&config);
    config.log_summary();

    info!(path = %config.database_url, "opening store");
    let storage = Storage::open(&config.database_url)?;
    let state = AppState::new(storage.clone(), &config)?;

    let mut app = create_router(state).layer(TraceLayer::new_for_http());
    if let Some(origin) = config.cors_origin.clone() {
        info!(?origin, "CORS enabled");
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_credentials(true)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                ])
                .allow_headers([header::CONTENT_TYPE]),
        );
    }

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "barangay API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down, flushing store");
    if let Err(e) = storage.flush() {
        error!(error = %e, "failed to flush store on shutdown");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("received terminate signal");
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
