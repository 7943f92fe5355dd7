use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::Tool;
use crate::llm::{ChatModel, PromptMessage};

/// Asks the model for a standalone code snippet.
pub struct GenerateCodeTool {
    llm: Arc<dyn ChatModel>,
}

impl GenerateCodeTool {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm }
    }
}

pub(crate) fn code_prompt(description: &str, language: &str, framework: Option<&str>) -> String {
    let framework_text = framework
        .filter(|f| !f.trim().is_empty())
        .map(|f| format!(" using the {} framework", f))
        .unwrap_or_default();
    format!(
        "Generate {}code{} for: {}\n\nProvide only the code with appropriate comments. \
         Do not include any explanations outside of code comments.",
        if language.is_empty() {
            String::new()
        } else {
            format!("{} ", language)
        },
        framework_text,
        description
    )
}

#[async_trait]
impl Tool for GenerateCodeTool {
    fn name(&self) -> String {
        "generate_code".to_string()
    }

    fn description(&self) -> String {
        "Generate code based on a description, in the given language and optional framework."
            .to_string()
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Description of the code to generate"
                },
                "language": {
                    "type": "string",
                    "description": "Programming language to use"
                },
                "framework": {
                    "type": "string",
                    "description": "Framework to use (if applicable)"
                }
            },
            "required": ["description", "language"]
        })
    }

    async fn call(&self, args: Value) -> Result<String, String> {
        let description = args
            .get("description")
            .and_then(|v| v.as_str())
            .ok_or("Missing 'description' argument")?;
        let language = args.get("language").and_then(|v| v.as_str()).unwrap_or("");
        let framework = args.get("framework").and_then(|v| v.as_str());

        let messages = vec![PromptMessage::User(code_prompt(
            description,
            language,
            framework,
        ))];
        let response = self
            .llm
            .completion(&messages, &[])
            .await
            .map_err(|e| format!("Error generating code: {}", e))?;
        Ok(response.content)
    }
}
