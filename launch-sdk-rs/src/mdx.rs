use crate::llm::{ChatModel, PromptMessage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::Range;
use std::sync::Arc;
use tracing::{error, warn};

lazy_static::lazy_static! {
    static ref OPEN_TAG_RE: Regex = Regex::new(r"<([A-Za-z][A-Za-z0-9]*)([^<>]*)>").expect("valid tag regex");
    static ref PROP_RE: Regex =
        Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)=(?:"([^"]*)"|\{([^}]*)\})"#).expect("valid prop regex");
    static ref FENCE_RE: Regex =
        Regex::new(r"(?s)```([A-Za-z0-9_-]*)[^\n]*\n(.*?)```").expect("valid fence regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentType {
    React,
    Nodejs,
    Html,
    Markdown,
    Diagram,
    Math,
    Code,
    LinearFlow,
    Quiz,
}

impl ComponentType {
    /// Maps a fence language onto a block kind. Unknown languages are plain code.
    pub fn from_lang(lang: &str) -> Self {
        match lang.trim().to_ascii_lowercase().as_str() {
            "react" | "jsx" | "tsx" => ComponentType::React,
            "nodejs" | "node" => ComponentType::Nodejs,
            "html" => ComponentType::Html,
            "markdown" | "md" => ComponentType::Markdown,
            "diagram" | "mermaid" => ComponentType::Diagram,
            "math" | "latex" | "tex" => ComponentType::Math,
            "linear-flow" => ComponentType::LinearFlow,
            "quiz" => ComponentType::Quiz,
            _ => ComponentType::Code,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::React => "react",
            ComponentType::Nodejs => "nodejs",
            ComponentType::Html => "html",
            ComponentType::Markdown => "markdown",
            ComponentType::Diagram => "diagram",
            ComponentType::Math => "math",
            ComponentType::Code => "code",
            ComponentType::LinearFlow => "linear-flow",
            ComponentType::Quiz => "quiz",
        }
    }

    fn generation_prompt(&self, description: &str) -> Option<String> {
        let (task, requirements, label) = match self {
            ComponentType::React => (
                "Generate a React component based on the description",
                "- Use TypeScript and modern React patterns\n\
                 - Implement proper error handling\n\
                 - Include accessibility features",
                "Component",
            ),
            ComponentType::Diagram => (
                "Create a Mermaid diagram based on the description",
                "- Use clear flow and structure\n\
                 - Include proper labels\n\
                 - Follow Mermaid syntax rules",
                "Diagram",
            ),
            ComponentType::Math => (
                "Generate LaTeX for the mathematical expression",
                "- Use proper LaTeX syntax\n\
                 - Include all necessary symbols\n\
                 - Follow mathematical notation standards",
                "Expression",
            ),
            _ => return None,
        };
        Some(format!(
            "{}:\nDescription: {}\nRequirements:\n{}\n\n{}:",
            task, description, requirements, label
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MdxComponent {
    #[serde(rename = "type")]
    pub tag: String,
    pub props: Map<String, Value>,
    pub children: Option<String>,
    #[serde(skip)]
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeBlock {
    pub language: String,
    #[serde(rename = "type")]
    pub kind: ComponentType,
    pub content: String,
    /// Byte range of `content` within the document.
    #[serde(skip)]
    pub span: Range<usize>,
}

pub fn parse_props(props: &str) -> Map<String, Value> {
    let mut parsed = Map::new();
    for caps in PROP_RE.captures_iter(props) {
        let key = caps[1].to_string();
        let value = if let Some(text) = caps.get(2) {
            Value::String(text.as_str().to_string())
        } else {
            let raw = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
            serde_json::from_str(raw).unwrap_or_else(|_| {
                warn!("Failed to parse JSON prop value: {}", raw);
                Value::String(raw.to_string())
            })
        };
        parsed.insert(key, value);
    }
    parsed
}

pub fn extract_code_blocks(content: &str) -> Vec<CodeBlock> {
    FENCE_RE
        .captures_iter(content)
        .filter_map(|caps| {
            let body = caps.get(2)?;
            let language = caps[1].to_string();
            Some(CodeBlock {
                kind: ComponentType::from_lang(&language),
                language,
                content: body.as_str().to_string(),
                span: body.range(),
            })
        })
        .collect()
}

/// Finds `<Tag props/>` and `<Tag props>children</Tag>` outside fenced
/// blocks. An opening tag without a matching close is ignored.
pub fn extract_components(content: &str) -> Vec<MdxComponent> {
    let fences: Vec<Range<usize>> = FENCE_RE.find_iter(content).map(|m| m.range()).collect();
    let inside_fence = |pos: usize| fences.iter().any(|f| f.contains(&pos));

    let mut components = Vec::new();
    let mut cursor = 0;
    while let Some(caps) = OPEN_TAG_RE.captures_at(content, cursor) {
        let Some(whole) = caps.get(0) else { break };
        cursor = whole.end();
        if inside_fence(whole.start()) {
            continue;
        }

        let tag = caps[1].to_string();
        let attrs = caps[2].trim_end();
        if let Some(attrs) = attrs.strip_suffix('/') {
            components.push(MdxComponent {
                props: parse_props(attrs),
                tag,
                children: None,
                span: whole.range(),
            });
            continue;
        }

        let close = format!("</{}>", tag);
        if let Some(offset) = content[whole.end()..].find(&close) {
            let children_end = whole.end() + offset;
            let end = children_end + close.len();
            components.push(MdxComponent {
                props: parse_props(attrs),
                children: Some(content[whole.end()..children_end].trim().to_string()),
                tag,
                span: whole.start()..end,
            });
            cursor = end;
        }
    }
    components
}

/// Expands react, diagram and math blocks through the model.
pub struct MdxProcessor {
    llm: Arc<dyn ChatModel>,
}

impl MdxProcessor {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm }
    }

    async fn render_block(&self, block: &CodeBlock) -> Option<String> {
        let prompt = block.kind.generation_prompt(block.content.trim())?;
        let messages = vec![PromptMessage::User(prompt)];
        match self.llm.completion(&messages, &[]).await {
            Ok(response) => Some(response.content.trim().to_string()),
            Err(e) => {
                error!(kind = block.kind.as_str(), "Error processing code block: {}", e);
                Some(format!("Error: {}", e))
            }
        }
    }

    /// Returns `content` with every model-backed block body replaced by the
    /// model's output. Other text is left untouched.
    pub async fn process(&self, content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut last = 0;
        for block in extract_code_blocks(content) {
            let Some(rendered) = self.render_block(&block).await else {
                continue;
            };
            result.push_str(&content[last..block.span.start]);
            result.push_str(&rendered);
            result.push('\n');
            last = block.span.end;
        }
        result.push_str(&content[last..]);
        result
    }

    pub async fn generate_component(&self, description: &str, kind: ComponentType) -> String {
        let content = format!("```{}\n{}\n```", kind.as_str(), description.trim());
        self.process(&content).await
    }
}
