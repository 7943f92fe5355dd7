use crate::error::GenerationError;
use crate::llm::{ChatModel, PromptMessage, Provider};
use crate::prompts::{PromptType, compose_system_prompt};
use crate::sanitize::{sanitize_input, sanitize_output, spawn_sanitizing_relay};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub prompt_type: PromptType,
    #[serde(default)]
    pub additional_context: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub generated_code: String,
    pub prompt_type: PromptType,
    pub model: String,
    pub provider: Provider,
    pub run_id: String,
}

/// One-shot code generation, outside any session.
pub struct CodeGenerator {
    llm: Arc<dyn ChatModel>,
    provider: Provider,
}

impl CodeGenerator {
    pub fn new(llm: Arc<dyn ChatModel>, provider: Provider) -> Self {
        Self { llm, provider }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    fn messages(req: &GenerationRequest) -> Result<Vec<PromptMessage>, GenerationError> {
        let prompt = sanitize_input(&req.prompt);
        if prompt.trim().is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }
        let system = compose_system_prompt(
            req.prompt_type,
            req.template.as_deref(),
            req.additional_context.as_deref(),
        );
        Ok(vec![
            PromptMessage::System(system),
            PromptMessage::User(format!("<user_request>{}</user_request>", prompt)),
        ])
    }

    pub async fn generate(&self, req: &GenerationRequest) -> Result<Generation, GenerationError> {
        let messages = Self::messages(req)?;
        info!(
            prompt_type = %req.prompt_type,
            template = req.template.as_deref().unwrap_or("-"),
            "Generating code"
        );

        let response = self.llm.completion(&messages, &[]).await?;
        info!("Received {} characters from model", response.content.len());

        Ok(Generation {
            generated_code: sanitize_output(&response.content),
            prompt_type: req.prompt_type,
            model: self.llm.model_name().to_string(),
            provider: self.provider,
            run_id: Uuid::new_v4().to_string(),
        })
    }

    /// Streams sanitized chunks to `tokens` and returns the finished
    /// generation. Chunks concatenate to `generated_code`.
    pub async fn stream(
        &self,
        req: &GenerationRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<Generation, GenerationError> {
        let messages = Self::messages(req)?;
        let (raw_tx, relay) = spawn_sanitizing_relay(tokens);
        let outcome = self.llm.stream_completion(&messages, &[], &raw_tx).await;
        drop(raw_tx);
        if let Err(e) = relay.await {
            warn!("Generation relay ended abnormally: {}", e);
        }

        let response = outcome?;

        Ok(Generation {
            generated_code: sanitize_output(&response.content),
            prompt_type: req.prompt_type,
            model: self.llm.model_name().to_string(),
            provider: self.provider,
            run_id: Uuid::new_v4().to_string(),
        })
    }
}
