use active_labeler::{api, config::Config, db::Database, import, learning::LearningService};
use anyhow::Result;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "active_labeler=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting active labeler");

    let config = Config::from_env()?;
    info!("Configuration loaded");

    let db = Database::new(&config.database.url).await?;
    info!("Database initialized");

    let interrupted = db.interrupt_stale_runs().await?;
    if interrupted > 0 {
        warn!("Marked {} unfinished mining runs as interrupted", interrupted);
    }

    db.sync_categories(&config.labeling.categories).await?;

    for path in &config.import.paths {
        if !path.exists() {
            warn!("Skipping missing import path: {}", path.display());
            continue;
        }
        info!("Importing detections from {}", path.display());
        match import::import_path(&db, path).await {
            Ok(stats) => info!(
                "Import of {} finished: {} files, {} detections, {} errors",
                path.display(),
                stats.files_read,
                stats.detections_imported,
                stats.errors
            ),
            Err(e) => warn!("Failed to import {}: {}", path.display(), e),
        }
    }

    let learning = LearningService::new(db.clone(), config.mining.clone());
    let app = api::create_app(db, learning);

    let ip: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::from((ip, config.server.port));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
