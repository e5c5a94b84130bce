//! # tourbook-api — Binary Entry Point
//!
//! Starts the Axum HTTP server. Binds to `PORT` (default 3000) and exits
//! with status 1 when a supervised background task fails.

use std::net::SocketAddr;

use tourbook_api::boundary::{self, FatalFaults, ShutdownCause};
use tourbook_api::config::{AppConfig, Environment};
use tourbook_api::{db, tasks, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is normal outside development.
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env();
    init_tracing(
        config
            .as_ref()
            .map(|c| c.environment)
            .unwrap_or_default(),
    );
    let config = config.map_err(|e| {
        tracing::error!("Configuration failed: {e}");
        e
    })?;

    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "UNCAUGHT EXCEPTION");
    }));

    // No DATABASE_URL: in-memory only.
    let db_pool = db::init_pool(config.database_url.as_deref())
        .await
        .map_err(|e| {
            tracing::error!("Database initialization failed: {e}");
            e
        })?;

    let port = config.port;
    let environment = config.environment;
    let state = AppState::new(config).with_db_pool(db_pool);

    // Hydrate in-memory stores from database (if connected).
    state.hydrate_from_db().await.map_err(|e| {
        tracing::error!("Database hydration failed: {e}");
        e
    })?;

    let (faults, fault_rx) = FatalFaults::channel();
    faults.spawn_supervised(
        "reset-sweeper",
        tasks::sweep_reset_tokens(state.clone(), tasks::RESET_SWEEP_PERIOD),
    );

    let app = tourbook_api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%environment, "tourbook API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let (cause_tx, cause_rx) = tokio::sync::oneshot::channel();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let cause = boundary::shutdown_signal(fault_rx).await;
        tracing::info!(?cause, "shutting down, draining connections");
        let _ = cause_tx.send(cause);
    })
    .await?;

    let cause = cause_rx.await.unwrap_or(ShutdownCause::Interrupt);
    let code = cause.exit_code();
    if code != 0 {
        tracing::error!(code, "exiting after fatal fault");
        std::process::exit(code);
    }
    Ok(())
}

/// Structured logs: JSON in production, human-readable text otherwise.
fn init_tracing(environment: Environment) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if environment.is_production() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
