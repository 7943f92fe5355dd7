mod conversation_api;
mod error;
mod guard;
mod handlers;
mod mdx_api;
mod models;
mod router;
mod system;

use crate::handlers::AppState;
use anyhow::Context;
use launch_sdk_rs::config::AppConfig;
use launch_sdk_rs::llm::LLM;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    system::mark_start();

    let config = AppConfig::from_env();
    launch_sdk_rs::logger::init_logging(config.default_log_level());

    info!(
        provider = %config.model.provider,
        model = %config.model.model_name(),
        "Starting Launch AI Generator"
    );
    if config.model.api_key().is_none() {
        warn!(
            "No API key configured for provider {}; model calls will fail",
            config.model.provider
        );
    }
    info!(
        enabled = config.tracing.enabled && config.tracing.langsmith_api_key.is_some(),
        project = %config.tracing.project,
        "Tracing"
    );
    info!(
        requests = config.server.rate_limit_requests,
        window_secs = config.server.rate_limit_window_secs,
        api_keys = config.server.api_keys.len(),
        "Rate limiting"
    );

    let llm = Arc::new(LLM::new(config.model.llm_config()));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::build(config, llm)
        .await
        .context("failed to initialize application state")?;
    let app = router::build_router(Arc::new(state));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await?;

    Ok(())
}
