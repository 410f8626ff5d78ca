use std::sync::Arc;

use anyhow::Context;

use scout_api::app::{build_app, AppServices};
use scout_infra::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scout_observability::init();

    let settings = Settings::from_env().context("invalid configuration")?;
    let bind_addr = settings.bind_addr.clone();

    let services = Arc::new(
        AppServices::build(settings)
            .await
            .context("failed to wire services")?,
    );
    let app = build_app(Arc::clone(&services));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    services.shutdown().await;
    Ok(())
}
