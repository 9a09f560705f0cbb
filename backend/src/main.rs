//! RESQ Backend - Personal-Safety SOS Session Service
//!
//! Serves the local API of the RESQ companion app:
//! - Holds the active profile, its trusted contacts and alert history
//! - Drives the SOS countdown and long-press timers
//! - Requests a position and notifies best friends when an alert triggers
//!
//! # Privacy Properties
//!
//! - Names, phone numbers, PINs and coordinates are never logged
//! - Records live in memory, or as JSON files under `RESQ_DATA_DIR`
//! - Logout removes every stored record

use resq_backend::{build_router, open_session, AppState, Config, Session};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Initialize structured logging
    init_tracing();

    // Load configuration
    let config = Config::from_env();
    log_startup_info(&config);

    let session = match open_session(&config).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to open session");
            std::process::exit(1);
        }
    };

    // Build and serve the application
    let app = build_router(AppState::new(session.clone()));
    serve(app, &config, session).await;
}

/// Initialize tracing with environment-based log levels.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("resq_backend=debug,tower_http=info")),
        )
        .init();
}

/// Log startup configuration (no personal data).
fn log_startup_info(config: &Config) {
    info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        storage = config.storage_kind(),
        location = config.fixed_location.is_some(),
        location_timeout_secs = config.location_timeout.as_secs(),
        arming_seconds = config.arming_seconds,
        long_press_ms = config.long_press.as_millis() as u64,
        audit_cancelled_arming = config.audit_cancelled_arming,
        "Starting RESQ backend"
    );
}

/// Bind to address and serve until Ctrl-C, then flush pending saves.
async fn serve(app: axum::Router, config: &Config, session: Session) {
    let bind_addr = format!("{}:{}", config.bind_addr, config.port);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %bind_addr, error = %e, "Failed to bind to address");
            std::process::exit(1);
        }
    };

    info!(addr = %bind_addr, "Server listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %e, "Server error");
    }

    if let Err(e) = session.flush().await {
        error!(error = %e, "Failed to flush pending saves");
    }
}
