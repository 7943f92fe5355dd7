use crate::error::AgentError;
use async_trait::async_trait;
use futures::StreamExt;
use genai::Client;
use genai::chat::{
    ChatMessage, ChatOptions, ChatRequest, ChatRole, ChatStreamEvent, ContentPart, Tool, ToolCall,
    ToolResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;

/// Hosted model providers the generator can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Groq,
    Together,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Groq => "groq",
            Provider::Together => "together",
        }
    }

    /// Environment variable the genai adapter reads the key from.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Provider::Groq => "GROQ_API_KEY",
            Provider::Together => "TOGETHER_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Groq => "llama3-70b-8192",
            Provider::Together => "togethercomputer/llama-3-70b-instruct",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(Provider::Groq),
            "together" => Ok(Provider::Together),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct LLMConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

impl From<&ToolCall> for ToolInvocation {
    fn from(call: &ToolCall) -> Self {
        Self {
            call_id: call.call_id.clone(),
            name: call.fn_name.clone(),
            arguments: call.fn_arguments.clone(),
        }
    }
}

/// Tool description offered to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromptMessage {
    System(String),
    User(String),
    Assistant(String),
    ToolCalls {
        text: String,
        calls: Vec<ToolInvocation>,
    },
    ToolResult {
        call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LLMResponse {
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
}

/// The seam between the agent and a hosted language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn completion(
        &self,
        messages: &[PromptMessage],
        tools: &[ToolSpec],
    ) -> Result<LLMResponse, AgentError>;

    /// Like [`ChatModel::completion`], delivering text deltas to `tokens` in
    /// generation order. The returned content equals the concatenated deltas.
    ///
    /// A closed `tokens` receiver is treated as cancellation.
    async fn stream_completion(
        &self,
        messages: &[PromptMessage],
        tools: &[ToolSpec],
        tokens: &mpsc::Sender<String>,
    ) -> Result<LLMResponse, AgentError> {
        let response = self.completion(messages, tools).await?;
        if !response.content.is_empty() {
            tokens
                .send(response.content.clone())
                .await
                .map_err(|_| AgentError::Cancelled)?;
        }
        Ok(response)
    }
}

#[derive(Clone)]
pub struct LLM {
    pub config: LLMConfig,
    pub client: Client,
}

impl LLM {
    pub fn new(config: LLMConfig) -> Self {
        if let Some(key) = &config.api_key {
            let var = config.provider.api_key_var();
            if env::var(var).is_err() {
                unsafe {
                    env::set_var(var, key);
                }
            }
        }

        Self {
            config,
            client: Client::default(),
        }
    }

    /// Model name namespaced with the provider so genai picks the right adapter.
    pub fn qualified_model(&self) -> String {
        format!("{}::{}", self.config.provider.as_str(), self.config.model)
    }

    fn options(&self) -> ChatOptions {
        ChatOptions::default()
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
    }

    fn chat_request(messages: &[PromptMessage], tools: &[ToolSpec]) -> ChatRequest {
        let mut chat_req = ChatRequest::default();

        for message in messages {
            chat_req = match message {
                PromptMessage::System(text) => {
                    chat_req.append_message(ChatMessage::system(text.clone()))
                }
                PromptMessage::User(text) => {
                    chat_req.append_message(ChatMessage::user(text.clone()))
                }
                PromptMessage::Assistant(text) => {
                    chat_req.append_message(ChatMessage::assistant(text.clone()))
                }
                PromptMessage::ToolCalls { text, calls } => {
                    let mut parts = vec![];
                    if !text.is_empty() {
                        parts.push(ContentPart::Text(text.clone()));
                    }
                    for call in calls {
                        parts.push(ContentPart::ToolCall(to_genai_call(call)));
                    }
                    chat_req.append_message(ChatMessage {
                        role: ChatRole::Assistant,
                        content: parts.into(),
                        options: None,
                    })
                }
                PromptMessage::ToolResult { call_id, content } => chat_req.append_message(
                    ChatMessage::from(ToolResponse::new(call_id.clone(), content.clone())),
                ),
            };
        }

        if !tools.is_empty() {
            let genai_tools: Vec<Tool> = tools
                .iter()
                .map(|t| Tool {
                    name: t.name.clone(),
                    description: Some(t.description.clone()),
                    schema: Some(t.parameters.clone()),
                    config: None,
                })
                .collect();
            chat_req = chat_req.with_tools(genai_tools);
        }

        chat_req
    }
}

fn to_genai_call(invocation: &ToolInvocation) -> ToolCall {
    ToolCall {
        call_id: invocation.call_id.clone(),
        fn_name: invocation.name.clone(),
        fn_arguments: invocation.arguments.clone(),
    }
}

fn merge_tool_call(calls: &mut Vec<ToolInvocation>, call: ToolInvocation) {
    match calls.iter_mut().find(|c| c.call_id == call.call_id) {
        Some(existing) => {
            if !call.arguments.is_null() {
                existing.arguments = call.arguments;
            }
        }
        None => calls.push(call),
    }
}

#[async_trait]
impl ChatModel for LLM {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn completion(
        &self,
        messages: &[PromptMessage],
        tools: &[ToolSpec],
    ) -> Result<LLMResponse, AgentError> {
        let chat_req = Self::chat_request(messages, tools);
        let output = self
            .client
            .exec_chat(&self.qualified_model(), chat_req, Some(&self.options()))
            .await
            .map_err(|e| AgentError::Upstream(e.to_string()))?;

        let content: String = output.content.texts().join("");
        let tool_calls: Vec<ToolInvocation> = output
            .tool_calls()
            .into_iter()
            .map(ToolInvocation::from)
            .collect();

        Ok(LLMResponse {
            content,
            tool_calls,
        })
    }

    async fn stream_completion(
        &self,
        messages: &[PromptMessage],
        tools: &[ToolSpec],
        tokens: &mpsc::Sender<String>,
    ) -> Result<LLMResponse, AgentError> {
        let chat_req = Self::chat_request(messages, tools);
        let response = self
            .client
            .exec_chat_stream(&self.qualified_model(), chat_req, Some(&self.options()))
            .await
            .map_err(|e| AgentError::Upstream(e.to_string()))?;

        let mut stream = response.stream;
        let mut content = String::new();
        let mut tool_calls = Vec::new();

        while let Some(event) = stream.next().await {
            match event.map_err(|e| AgentError::Upstream(e.to_string()))? {
                ChatStreamEvent::Chunk(chunk) => {
                    if chunk.content.is_empty() {
                        continue;
                    }
                    content.push_str(&chunk.content);
                    tokens
                        .send(chunk.content)
                        .await
                        .map_err(|_| AgentError::Cancelled)?;
                }
                ChatStreamEvent::ToolCallChunk(chunk) => {
                    merge_tool_call(&mut tool_calls, ToolInvocation::from(&chunk.tool_call));
                }
                _ => {}
            }
        }

        Ok(LLMResponse {
            content,
            tool_calls,
        })
    }
}
