use crate::error::ApiError;
use crate::guard::RateLimiter;
use crate::models::{
    FeedbackRequest, GenerateResponse, RestoreRequest, StatusResponse, StreamDone, VersionDetail,
    VersionList,
};
use crate::system;
use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
};
use launch_sdk_rs::{
    config::AppConfig,
    feedback::FeedbackStore,
    generator::{CodeGenerator, Generation, GenerationRequest},
    llm::ChatModel,
    mdx::MdxProcessor,
    memory::FileMemoryStore,
    session::SessionManager,
    tools::ToolRegistry,
    versions::{NewVersion, Version, VersionStore},
};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

pub struct AppState {
    pub config: AppConfig,
    pub sessions: Arc<SessionManager>,
    pub generator: CodeGenerator,
    pub versions: VersionStore,
    pub feedback: FeedbackStore,
    pub mdx: MdxProcessor,
    pub limiter: RateLimiter,
    pub tools: ToolRegistry,
}

impl AppState {
    /// Wires every component around one model handle.
    pub async fn build(config: AppConfig, llm: Arc<dyn ChatModel>) -> anyhow::Result<Self> {
        let memory = FileMemoryStore::open(&config.memory.dir, config.memory.embedder()).await?;
        let tools =
            ToolRegistry::with_builtin_tools(llm.clone(), config.tavily_api_key.clone());
        let sessions = SessionManager::new(
            config.session_settings(),
            llm.clone(),
            Arc::new(memory),
            tools.clone(),
        );

        Ok(Self {
            generator: CodeGenerator::new(llm.clone(), config.model.provider),
            versions: VersionStore::open(config.versions_dir()).await?,
            feedback: FeedbackStore::open(config.feedback_path()).await?,
            mdx: MdxProcessor::new(llm),
            limiter: RateLimiter::new(
                config.server.rate_limit_requests,
                Duration::from_secs(config.server.rate_limit_window_secs),
            ),
            sessions: Arc::new(sessions),
            tools,
            config,
        })
    }

    async fn save_version(&self, req: &GenerationRequest, generation: &Generation) -> Option<Version> {
        let new = NewVersion {
            code: generation.generated_code.clone(),
            prompt: req.prompt.clone(),
            prompt_type: Some(generation.prompt_type.to_string()),
            template: req.template.clone(),
            model: Some(generation.model.clone()),
            run_id: Some(generation.run_id.clone()),
        };
        match self.versions.save(new).await {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(run_id = %generation.run_id, "Failed to save version: {}", e);
                None
            }
        }
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = &state.config;
    Json(json!({
        "status": "ok",
        "groq": config.model.groq_api_key.is_some(),
        "together": config.model.together_api_key.is_some(),
        "langsmith": config.tracing.langsmith_api_key.is_some(),
        "tavily": config.tavily_api_key.is_some(),
        "provider": config.model.provider,
        "model": config.model.model_name(),
        "live_sessions": state.sessions.live_sessions().len(),
    }))
}

pub async fn debug_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = &state.config;
    if config.server.is_production() {
        return Json(json!({
            "message": "Debug information not available in production"
        }));
    }

    let info = system::get_system_info().await;
    Json(json!({
        "system": info,
        "config": {
            "provider": config.model.provider,
            "model": config.model.model_name(),
            "temperature": config.model.temperature,
            "max_tokens": config.model.max_tokens,
            "streaming": config.agent.enable_streaming,
            "eviction_policy": config.agent.eviction_policy,
            "memory_dir": config.memory.dir,
            "vector_memory": config.memory.use_vector,
            "tracing_enabled": config.tracing.enabled,
            "rate_limit": {
                "requests": config.server.rate_limit_requests,
                "window_secs": config.server.rate_limit_window_secs,
            },
        },
        "keys": {
            "GROQ_API_KEY": config.model.groq_api_key.is_some(),
            "TOGETHER_API_KEY": config.model.together_api_key.is_some(),
            "LANGSMITH_API_KEY": config.tracing.langsmith_api_key.is_some(),
            "TAVILY_API_KEY": config.tavily_api_key.is_some(),
            "EMBEDDINGS_API_KEY": config.memory.embeddings_api_key.is_some(),
            "API_KEYS": !config.server.api_keys.is_empty(),
        },
        "tools": state.tools.names(),
        "live_sessions": state.sessions.live_sessions(),
    }))
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerationRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let generation = state.generator.generate(&req).await?;
    let version = state.save_version(&req, &generation).await;
    info!(run_id = %generation.run_id, "Generation finished");

    Ok(Json(GenerateResponse {
        generated: generation.generated_code,
        prompt_type: generation.prompt_type.to_string(),
        model: generation.model,
        provider: generation.provider.to_string(),
        run_id: generation.run_id,
        version,
    }))
}

enum GenerationEvent {
    Token(String),
    Done(StreamDone),
    Failed(String),
}

impl GenerationEvent {
    fn into_sse(self) -> Event {
        match self {
            GenerationEvent::Token(token) => Event::default().event("token").data(token),
            GenerationEvent::Done(done) => Event::default()
                .event("done")
                .json_data(&done)
                .unwrap_or_else(|_| Event::default().event("done")),
            GenerationEvent::Failed(message) => Event::default()
                .event("error")
                .json_data(json!({ "message": message }))
                .unwrap_or_else(|_| Event::default().event("error")),
        }
    }
}

/// Server-sent events: `token` per chunk, then `done` or `error`.
pub async fn stream_generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerationRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("Prompt cannot be empty"));
    }

    let (event_tx, event_rx) = mpsc::channel::<GenerationEvent>(64);
    tokio::spawn(async move {
        let (token_tx, mut token_rx) = mpsc::channel::<String>(64);
        let forward_tx = event_tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(token) = token_rx.recv().await {
                if forward_tx.send(GenerationEvent::Token(token)).await.is_err() {
                    break;
                }
            }
        });

        let outcome = state.generator.stream(&req, token_tx).await;
        let _ = forward.await;

        let terminal = match outcome {
            Ok(generation) => {
                let version = state.save_version(&req, &generation).await;
                GenerationEvent::Done(StreamDone {
                    run_id: generation.run_id,
                    version: version.map(|v| v.id),
                })
            }
            Err(e) => {
                warn!("Streaming generation failed: {}", e);
                GenerationEvent::Failed(e.to_string())
            }
        };
        let _ = event_tx.send(terminal).await;
    });

    let stream = ReceiverStream::new(event_rx).map(|event| Ok(event.into_sse()));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn list_versions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<VersionList>, ApiError> {
    let versions = state.versions.list().await?;
    Ok(Json(VersionList { versions }))
}

pub async fn get_version(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<VersionDetail>, ApiError> {
    let (version, code) = state.versions.get(&id).await?;
    Ok(Json(VersionDetail { version, code }))
}

pub async fn restore_version(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RestoreRequest>,
) -> Result<Json<VersionDetail>, ApiError> {
    let (version, code) = state.versions.restore(&req.version_id).await?;
    Ok(Json(VersionDetail { version, code }))
}

pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let record = state
        .feedback
        .submit(&req.run_id, req.score, req.comment)
        .await?;
    Ok(Json(StatusResponse::success(format!(
        "Feedback {} recorded",
        record.id
    ))))
}
