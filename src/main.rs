//! Health Analytics - dashboard API
//!
//! Serves the age-group analytics published by the pipeline, and rebuilds
//! them on demand.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use health_analytics::api::{self, AppState};
use health_analytics::store::PgDestination;
use health_analytics::{init_tracing, Config, ConnectionResolver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let destination = ConnectionResolver::resolve_destination(&config.values)?;

    tracing::info!("Starting health analytics dashboard");
    tracing::info!(target_db = %destination.connection(), "Using analytics database");

    // Lazy pool: the dashboard starts (and degrades gracefully) even while
    // the analytics database is down
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect_lazy_with(destination.connection().connect_options());

    let store = Arc::new(PgDestination::new(pool.clone(), config.replica_namespace.clone()));
    let app = api::build_router(AppState::new(store, config.aggregate.clone()));

    tracing::info!("Dashboard: http://{}", addr);
    tracing::info!("Pulse rate data: http://{}/api/vitals-by-age-group", addr);
    tracing::info!("Refresh data: http://{}/api/refresh", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
