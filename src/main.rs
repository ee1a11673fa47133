use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wheelhouse::api::{self, AppState};
use wheelhouse::clock::SystemClock;
use wheelhouse::engine::Engine;
use wheelhouse::reaper;
use wheelhouse::settings::Settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env();
    wheelhouse::observability::init(settings.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&settings.data_dir)?;

    let clock = Arc::new(SystemClock::from_offset_minutes(settings.utc_offset_minutes));
    let engine = Arc::new(Engine::new(settings.wal_path(), clock, settings.lock_timeout)?);

    tokio::spawn(reaper::run_sweeper(engine.clone(), settings.sweep_interval));
    tokio::spawn(reaper::run_compactor(engine.clone(), settings.compact_threshold));

    let addr = settings.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("wheelhouse listening on {addr}");
    info!("  data_dir: {}", settings.data_dir.display());
    info!("  utc_offset_minutes: {}", settings.utc_offset_minutes);
    info!(
        "  metrics: {}",
        settings
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let app = api::router(AppState { engine });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("wheelhouse stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM; axum then drains in-flight requests.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        let sigterm = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!("failed to register SIGTERM handler: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm => {}
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
    info!("shutdown signal received, draining requests");
}
