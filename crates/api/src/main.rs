use std::sync::Arc;

use anyhow::Context;

use evalhub_api::app::{self, services};
use evalhub_infra::config::EvaluatorConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    evalhub_observability::init();

    let config = EvaluatorConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(
        services::build_services(&config)
            .await
            .context("failed to wire backends")?,
    );

    let consumer = match services::build_pipeline(&config) {
        Some(pipeline) => Some(services.consumer(pipeline, config.consumer()).spawn()),
        None => {
            tracing::warn!("EVALUATION_URL not set; queue consumer not started");
            None
        }
    };

    let app = app::build_app(services);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await
        .context("server error")?;

    if let Some(handle) = consumer {
        tracing::info!(stats = ?handle.stats(), "draining queue consumer");
        handle.shutdown().await;
    }

    Ok(())
}
