//! Trust core server entry point.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use trustcore_server::{ServerConfig, TrustCore, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env_or_yaml()?;
    let core = Arc::new(TrustCore::init(&config).await.context("start trust core")?);
    let app = build_router(Arc::clone(&core));

    let addr = config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "trust core listening");

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await;

    core.close().await;
    served.context("serve http")
}
