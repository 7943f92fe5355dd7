use crate::handlers::{self, AppState};
use crate::{conversation_api, guard, mdx_api};
use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/generate", post(handlers::generate))
        .route("/stream-generate", post(handlers::stream_generate))
        .route("/versions", get(handlers::list_versions))
        .route("/versions/restore", post(handlers::restore_version))
        .route("/version/{id}", get(handlers::get_version))
        .route("/feedback", post(handlers::submit_feedback))
        // Agent routes
        .route("/agent/chat", post(conversation_api::chat))
        .route("/agent/clear-memory", post(conversation_api::clear_memory))
        .route("/agent/ws/{client_id}", get(conversation_api::agent_ws))
        // MDX routes
        .route("/mdx/process", post(mdx_api::process))
        .route("/mdx/component/generate", post(mdx_api::generate_component))
        .route("/mdx/component/preview", post(mdx_api::preview_component))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guard::api_guard,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/debug", get(handlers::debug_info))
        .nest("/api", api)
        .layer(cors_layer(&state.config.server.cors_origins))
        .with_state(state)
}
