use std::net::SocketAddr;
use std::sync::Arc;

use edge_guard::api::{create_metrics_router, create_router};
use edge_guard::config::Settings;
use edge_guard::service::ProtectionService;
use edge_guard::utils::{init_logging, ProtectionResult};

#[tokio::main]
async fn main() -> ProtectionResult<()> {
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
    let settings = Settings::load(&config_path)?;

    init_logging(&settings.logging)?;
    tracing::info!(config = %config_path, "starting protection layer");

    let service = ProtectionService::new(settings.clone()).await?;
    service.start_background_tasks();

    // Metrics exposition runs on its own listener so operators can keep the
    // port internal.
    if settings.metrics.enabled {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], settings.metrics.port));
        let metrics_router = create_metrics_router(service.clone(), &settings.metrics.path);
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(metrics_addr).await {
                Ok(listener) => {
                    tracing::info!(addr = %metrics_addr, "metrics listener started");
                    if let Err(err) = axum::serve(listener, metrics_router).await {
                        tracing::error!(error = %err, "metrics server error");
                    }
                }
                Err(err) => tracing::error!(error = %err, "failed to bind metrics listener"),
            }
        });
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
    let router = create_router(service.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(service.clone()))
    .await?;

    tracing::info!("server exited");
    Ok(())
}

async fn shutdown_signal(service: Arc<ProtectionService>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutting down");
    service.shutdown();
}
