mod browse;
mod generate_code;
mod search;

pub use browse::BrowseTool;
pub use generate_code::GenerateCodeTool;
pub use search::SearchTool;

use crate::error::RegistryError;
use crate::llm::{ChatModel, ToolSpec};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> String;
    fn description(&self) -> String;
    fn parameters(&self) -> Value; // JSON Schema
    async fn call(&self, args: Value) -> Result<String, String>;
}

/// Immutable set of tools bound to an agent at construction time.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Arc<[Arc<dyn Tool>]>,
}

impl ToolSet {
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name(),
                description: t.description(),
                parameters: t.parameters(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Process-wide tool catalogue. Written at startup, read on every agent
/// construction.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<RwLock<Vec<Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the built-in tools. Web search is only offered when a
    /// Tavily key is configured.
    pub fn with_builtin_tools(llm: Arc<dyn ChatModel>, tavily_api_key: Option<String>) -> Self {
        let registry = Self::new();
        let mut builtins: Vec<Arc<dyn Tool>> = vec![
            Arc::new(GenerateCodeTool::new(llm)),
            Arc::new(BrowseTool::new()),
        ];
        if let Some(key) = tavily_api_key.filter(|k| !k.is_empty()) {
            builtins.insert(0, Arc::new(SearchTool::new(key)));
        }
        for tool in builtins {
            // Built-in names are distinct.
            let _ = registry.register(tool);
        }
        registry
    }

    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name();
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.iter().any(|t| t.name() == name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        info!(tool = %name, "Registered tool");
        tools.push(tool);
        Ok(())
    }

    /// Snapshot of the current tools. Later registrations do not reach
    /// snapshots already taken.
    pub fn list(&self) -> ToolSet {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        ToolSet {
            tools: tools.iter().cloned().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.name() == name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.list().names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::llm::{LLMResponse, PromptMessage};

    struct EchoTool(&'static str);

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> String {
            self.0.to_string()
        }

        fn description(&self) -> String {
            "Echo the input".to_string()
        }

        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        async fn call(&self, args: Value) -> Result<String, String> {
            Ok(args.to_string())
        }
    }

    struct SilentModel;

    #[async_trait]
    impl ChatModel for SilentModel {
        fn model_name(&self) -> &str {
            "silent"
        }

        async fn completion(
            &self,
            _messages: &[PromptMessage],
            _tools: &[crate::llm::ToolSpec],
        ) -> Result<LLMResponse, AgentError> {
            Ok(LLMResponse::default())
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool("echo"))).unwrap();
        assert_eq!(
            registry.register(Arc::new(EchoTool("echo"))),
            Err(RegistryError::DuplicateTool("echo".into()))
        );
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn test_snapshot_ignores_later_registrations() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool("first"))).unwrap();
        let snapshot = registry.list();

        registry.register(Arc::new(EchoTool("second"))).unwrap();
        assert_eq!(snapshot.names(), vec!["first"]);
        assert!(snapshot.get("second").is_none());
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_builtin_tools() {
        let without_search = ToolRegistry::with_builtin_tools(Arc::new(SilentModel), None);
        assert_eq!(without_search.names(), vec!["generate_code", "browse_website"]);

        let with_search =
            ToolRegistry::with_builtin_tools(Arc::new(SilentModel), Some("tvly-key".into()));
        assert_eq!(
            with_search.names(),
            vec!["search", "generate_code", "browse_website"]
        );
        assert!(with_search.get("search").is_some());
    }

    #[tokio::test]
    async fn test_specs_and_call() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool("echo"))).unwrap();
        let set = registry.list();
        let specs = set.specs();
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[0].parameters, serde_json::json!({"type": "object"}));

        let tool = set.get("echo").unwrap();
        let out = tool.call(serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(out, r#"{"a":1}"#);
    }
}
