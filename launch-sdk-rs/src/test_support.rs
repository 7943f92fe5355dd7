use crate::error::AgentError;
use crate::llm::{ChatModel, LLMResponse, PromptMessage, ToolInvocation, ToolSpec};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

pub enum Reply {
    Text(&'static str),
    Tools(&'static str, Vec<ToolInvocation>),
    Fail(&'static str),
}

/// Replays a fixed script of replies, then answers "ok".
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Reply>>,
    pub calls: AtomicUsize,
    pub last_messages: Mutex<Vec<PromptMessage>>,
    pub delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolInvocation {
    ToolInvocation {
        call_id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn completion(
        &self,
        messages: &[PromptMessage],
        _tools: &[ToolSpec],
    ) -> Result<LLMResponse, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().unwrap() = messages.to_vec();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Reply::Text(text)) => Ok(LLMResponse {
                content: text.to_string(),
                tool_calls: vec![],
            }),
            Some(Reply::Tools(text, calls)) => Ok(LLMResponse {
                content: text.to_string(),
                tool_calls: calls,
            }),
            Some(Reply::Fail(message)) => Err(AgentError::Upstream(message.to_string())),
            None => Ok(LLMResponse {
                content: "ok".to_string(),
                tool_calls: vec![],
            }),
        }
    }

    async fn stream_completion(
        &self,
        messages: &[PromptMessage],
        tools: &[ToolSpec],
        tokens: &mpsc::Sender<String>,
    ) -> Result<LLMResponse, AgentError> {
        let response = self.completion(messages, tools).await?;
        let chars: Vec<char> = response.content.chars().collect();
        for chunk in chars.chunks(3) {
            tokens
                .send(chunk.iter().collect())
                .await
                .map_err(|_| AgentError::Cancelled)?;
        }
        Ok(response)
    }
}
