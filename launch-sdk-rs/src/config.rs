use crate::llm::{LLMConfig, Provider};
use crate::memory::embedding::{
    DEFAULT_EMBEDDINGS_ENDPOINT, EmbeddingProvider, HASHING_MODEL, HashingEmbedding,
    OpenAIEmbedding,
};
use crate::prompts::AGENT_SYSTEM_PROMPT;
use crate::session::{EvictionPolicy, SessionSettings};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub provider: Provider,
    pub groq_api_key: Option<String>,
    pub together_api_key: Option<String>,
    pub groq_model: String,
    pub together_model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl ModelSettings {
    pub fn model_name(&self) -> &str {
        match self.provider {
            Provider::Groq => &self.groq_model,
            Provider::Together => &self.together_model,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        match self.provider {
            Provider::Groq => self.groq_api_key.as_deref(),
            Provider::Together => self.together_api_key.as_deref(),
        }
    }

    pub fn llm_config(&self) -> LLMConfig {
        LLMConfig {
            provider: self.provider,
            model: self.model_name().to_string(),
            api_key: self.api_key().map(str::to_string),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub system_prompt: String,
    pub max_iterations: usize,
    pub max_active: usize,
    pub enable_streaming: bool,
    pub eviction_policy: EvictionPolicy,
}

#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub dir: PathBuf,
    pub use_vector: bool,
    pub k: usize,
    pub embeddings_model: String,
    pub embeddings_api_key: Option<String>,
    pub embeddings_endpoint: String,
}

impl MemorySettings {
    pub fn uses_local_embeddings(&self) -> bool {
        self.embeddings_model == HASHING_MODEL
    }

    /// Embedder for similarity recall. `None` when vector recall is off.
    /// Without an API key the local hashing embedder is used.
    pub fn embedder(&self) -> Option<Arc<dyn EmbeddingProvider>> {
        if !self.use_vector {
            return None;
        }
        if self.uses_local_embeddings() {
            return Some(Arc::new(HashingEmbedding::default()));
        }
        match &self.embeddings_api_key {
            Some(key) => Some(Arc::new(OpenAIEmbedding::new(
                key.clone(),
                Some(self.embeddings_model.clone()),
                Some(self.embeddings_endpoint.clone()),
            ))),
            None => {
                warn!(
                    "EMBEDDINGS_API_KEY not set, falling back to local {} embeddings",
                    HASHING_MODEL
                );
                Some(Arc::new(HashingEmbedding::default()))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TracingSettings {
    pub langsmith_api_key: Option<String>,
    pub project: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub app_env: Option<String>,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub api_keys: Vec<String>,
    pub cors_origins: Vec<String>,
}

impl ServerSettings {
    pub fn is_production(&self) -> bool {
        self.app_env.as_deref() == Some("production")
    }
}

/// Process configuration, read once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: ModelSettings,
    pub agent: AgentSettings,
    pub memory: MemorySettings,
    pub tracing: TracingSettings,
    pub server: ServerSettings,
    pub tavily_api_key: Option<String>,
    pub data_dir: PathBuf,
}

fn parse_or<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        None => default,
        Some(value) => match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Invalid value for {} ({:?}): {}. Using default.", name, value, e);
                default
            }
        },
    }
}

fn parse_bool(name: &str, raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => default,
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        Some(v) => {
            warn!("Invalid boolean for {} ({:?}). Using default.", name, v);
            default
        }
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Empty
    /// values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let groq_api_key = get("GROQ_API_KEY");
        let together_api_key = get("TOGETHER_API_KEY");
        let provider = match get("LLM_PROVIDER") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{}. Falling back to groq.", e);
                Provider::Groq
            }),
            None if groq_api_key.is_none() && together_api_key.is_some() => Provider::Together,
            None => Provider::Groq,
        };

        let model = ModelSettings {
            provider,
            groq_api_key,
            together_api_key,
            groq_model: get("GROQ_MODEL").unwrap_or_else(|| Provider::Groq.default_model().into()),
            together_model: get("TOGETHER_MODEL")
                .unwrap_or_else(|| Provider::Together.default_model().into()),
            temperature: parse_or("TEMPERATURE", get("TEMPERATURE"), 0.7),
            max_tokens: parse_or("MAX_TOKENS", get("MAX_TOKENS"), 2000),
        };

        let system_prompt = get("AGENT_PROMPT_PATH")
            .and_then(|path| match std::fs::read_to_string(&path) {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!("Could not read AGENT_PROMPT_PATH {}: {}", path, e);
                    None
                }
            })
            .or_else(|| get("AGENT_PROMPT"))
            .unwrap_or_else(|| AGENT_SYSTEM_PROMPT.to_string());

        let agent = AgentSettings {
            system_prompt,
            max_iterations: parse_or("AGENT_MAX_ITERATIONS", get("AGENT_MAX_ITERATIONS"), 5),
            max_active: parse_or("AGENT_MAX_ACTIVE", get("AGENT_MAX_ACTIVE"), 100),
            enable_streaming: parse_bool(
                "AGENT_ENABLE_STREAMING",
                get("AGENT_ENABLE_STREAMING"),
                true,
            ),
            eviction_policy: parse_or(
                "AGENT_EVICTION_POLICY",
                get("AGENT_EVICTION_POLICY"),
                EvictionPolicy::KeyOrder,
            ),
        };

        let data_dir = PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "/tmp/launch".into()));

        let memory = MemorySettings {
            dir: get("MEMORY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("memory")),
            use_vector: parse_bool("MEMORY_USE_VECTOR", get("MEMORY_USE_VECTOR"), true),
            k: parse_or("MEMORY_K", get("MEMORY_K"), 5),
            embeddings_model: get("EMBEDDINGS_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".into()),
            embeddings_api_key: get("EMBEDDINGS_API_KEY"),
            embeddings_endpoint: get("EMBEDDINGS_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_EMBEDDINGS_ENDPOINT.into()),
        };

        let tracing = TracingSettings {
            langsmith_api_key: get("LANGSMITH_API_KEY"),
            project: get("LANGSMITH_PROJECT").unwrap_or_else(|| "launch-ai-generator".into()),
            enabled: parse_bool("TRACING_ENABLED", get("TRACING_ENABLED"), true),
        };

        let server = ServerSettings {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or("PORT", get("PORT"), 8000),
            debug: parse_bool("DEBUG", get("DEBUG"), false),
            app_env: get("APP_ENV"),
            rate_limit_requests: parse_or("RATE_LIMIT_REQUESTS", get("RATE_LIMIT_REQUESTS"), 10),
            rate_limit_window_secs: parse_or("RATE_LIMIT_WINDOW", get("RATE_LIMIT_WINDOW"), 60),
            api_keys: split_list(get("API_KEYS")),
            cors_origins: split_list(get("CORS_ORIGINS")),
        };

        Self {
            model,
            agent,
            memory,
            tracing,
            server,
            tavily_api_key: get("TAVILY_API_KEY"),
            data_dir,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            system_prompt: self.agent.system_prompt.clone(),
            max_iterations: self.agent.max_iterations,
            max_active: self.agent.max_active,
            eviction_policy: self.agent.eviction_policy,
            recall_k: self.memory.use_vector.then_some(self.memory.k),
        }
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.data_dir.join("versions")
    }

    pub fn feedback_path(&self) -> PathBuf {
        self.data_dir.join("feedback.jsonl")
    }

    /// Level used when `RUST_LOG` is not set.
    pub fn default_log_level(&self) -> &'static str {
        if self.server.debug { "debug" } else { "info" }
    }
}
