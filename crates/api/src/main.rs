use std::sync::Arc;

use chronos_api::app::services::build_services;
use chronos_infra::config::ChronosConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chronos_observability::init();

    let config = ChronosConfig::from_env()?;

    let services = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || build_services(&config)).await??
    };
    let services = Arc::new(services);

    tracing::info!(
        backend = services.backend_name(),
        workers = config.workers,
        queue_capacity = config.queue_capacity,
        "pipeline ready"
    );

    let app = chronos_api::app::build_app(Arc::clone(&services));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(services) {
        Ok(services) => {
            let report = tokio::task::spawn_blocking(move || services.shutdown()).await?;
            tracing::info!(
                processed = report.pool.records_processed,
                outcomes_written = report.outcomes_written,
                "pipeline stopped"
            );
        }
        Err(_) => tracing::warn!("pipeline still in use at exit; skipping drain"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
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

    tracing::info!("shutdown requested");
}
