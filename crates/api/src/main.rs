use anyhow::Context;
use tokio::net::TcpListener;

use keel_infra::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    keel_observability::init(&settings.log.filter, settings.log.format);

    let (app, services) = keel_api::app::build_app(&settings)
        .await
        .context("starting services")?;

    let listener = TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("binding {}", settings.server.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    services.shutdown();
    tracing::info!("stopped");
    served.context("serving http")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "ctrl-c handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
