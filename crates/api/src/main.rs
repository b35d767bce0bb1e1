use std::sync::Arc;

use anyhow::Context;

use newsdesk_api::app::{build_app, AppServices};
use newsdesk_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    newsdesk_observability::init();

    let config = AppConfig::from_env()?;
    let bind_addr = config.bind_addr;

    let services = Arc::new(AppServices::build(config)?);
    let workers = services
        .spawn_default_email_workers()
        .context("failed to start email workers")?;

    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down email workers");
    tokio::task::spawn_blocking(move || workers.shutdown())
        .await
        .context("email worker shutdown panicked")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
