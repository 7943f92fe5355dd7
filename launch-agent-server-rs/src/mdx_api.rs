use crate::error::ApiError;
use crate::handlers::AppState;
use crate::models::{
    ComponentGenerateRequest, ComponentGenerateResponse, ComponentPreviewRequest,
    ComponentPreviewResponse, MdxProcessRequest, MdxProcessResponse,
};
use axum::{extract::State, response::Json};
use launch_sdk_rs::mdx::extract_components;
use std::sync::Arc;
use tracing::info;

pub async fn process(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MdxProcessRequest>,
) -> Result<Json<MdxProcessResponse>, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::bad_request("Content cannot be empty"));
    }
    let processed_content = state.mdx.process(&req.content).await;
    let components = extract_components(&processed_content);
    info!(components = components.len(), "Processed MDX document");
    Ok(Json(MdxProcessResponse {
        processed_content,
        components,
    }))
}

pub async fn generate_component(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ComponentGenerateRequest>,
) -> Result<Json<ComponentGenerateResponse>, ApiError> {
    if req.description.trim().is_empty() {
        return Err(ApiError::bad_request("Description cannot be empty"));
    }
    let content = state.mdx.generate_component(&req.description, req.kind).await;
    Ok(Json(ComponentGenerateResponse {
        content,
        kind: req.kind,
    }))
}

/// Parses a component snippet without calling the model.
pub async fn preview_component(
    Json(req): Json<ComponentPreviewRequest>,
) -> Result<Json<ComponentPreviewResponse>, ApiError> {
    if req.component.trim().is_empty() {
        return Err(ApiError::bad_request("Component cannot be empty"));
    }
    let components = extract_components(&req.component);
    Ok(Json(ComponentPreviewResponse {
        preview: req.component,
        components,
    }))
}
