//! Activity Sync daemon
//!
//! Keeps a local activity replica in step with the central store and
//! exposes a small control API for local tools.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use activity_sync::config::Config;
use activity_sync::db::{CentralStore, LocalStore, MigrationOutcome, SchemaMigrator};
use activity_sync::routes;
use activity_sync::state::AppState;
use activity_sync::sync::SyncService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "activity_sync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Starting Activity Sync v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Local store: {}", config.local.url);
    tracing::info!("Sync user: {}", config.sync.user);

    let local = LocalStore::open(&config.local.url)
        .await
        .context("Failed to open local store")?;

    match SchemaMigrator::new(local.pool())
        .run()
        .await
        .context("Local schema migration failed")?
    {
        MigrationOutcome::UpToDate { version } => {
            tracing::info!(version, "Local schema up to date")
        }
        MigrationOutcome::Migrated { from, to } => {
            tracing::info!(from, to, "Local schema migrated")
        }
        MigrationOutcome::DowngradeSkipped { local, target } => {
            tracing::warn!(local, target, "Local schema is newer than this build")
        }
    }

    let central = CentralStore::open(&config.central.url)
        .await
        .context("Failed to open central store")?;
    tracing::info!("Central store connected");

    let sync = SyncService::new(local, central, config.sync.clone());
    spawn_periodic_sync(&sync);

    let state = AppState::new(config.clone(), sync);

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    tracing::info!("Activity Sync listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Run sync cycles for the configured projects on a fixed interval
fn spawn_periodic_sync(sync: &SyncService) {
    let Some(period) = sync.settings().interval() else {
        tracing::info!("Periodic sync disabled");
        return;
    };
    if sync.settings().projects.is_empty() {
        tracing::warn!("Periodic sync enabled but no projects configured");
        return;
    }

    let sync = sync.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let projects = sync.settings().projects.clone();
            match sync.run_cycle(&projects).await {
                Ok(report) if !report.conflicts.is_empty() => {
                    tracing::warn!(
                        projects = report.conflicts.len(),
                        "Split ownership needs resolution"
                    );
                }
                Ok(_) => {}
                Err(e) if e.is_unavailable() => {
                    tracing::info!("Skipping sync cycle, store unreachable: {}", e);
                }
                Err(e) => {
                    tracing::error!("Sync cycle failed: {}", e);
                }
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
