use std::sync::Arc;

use anyhow::Context;

use bilee_infra::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bilee_observability::init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    let bind_addr = config.bind_addr.clone();

    let services = Arc::new(
        bilee_api::app::services::build_services(config)
            .await
            .context("failed to initialize services")?,
    );
    let app = bilee_api::app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down background jobs");
    services.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
