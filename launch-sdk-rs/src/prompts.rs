use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub const AGENT_SYSTEM_PROMPT: &str = r#"You are Launch, an AI-powered development assistant that helps users build applications.
You have access to various tools that can help you assist users with their development needs.
Always think step-by-step about the user's request before responding.

When generating code:
1. Focus on clean, maintainable, and production-ready code
2. Consider edge cases and error handling
3. Follow best practices for the language/framework being used
4. Provide clear comments and documentation

If you don't know something or can't complete a task with the tools available, be honest about your limitations.
Always cite your sources when providing information from search results.
"#;

/// Structured reasoning scaffold appended to every generation prompt.
pub const GENERATOR_SYSTEM_PROMPT: &str = r#"<thoughts>
Analyze user intent deeply. Consider the technical requirements, architecture, and potential challenges.
Formulate a comprehensive strategy that addresses all aspects of the request.
Think about scalability, maintainability, and best practices.
</thoughts>

<actions>
Break the problem into logical, modular components.
Design a clean, scalable architecture following industry standards.
Implement with clear, well-documented code.
Consider edge cases and error handling.
</actions>

<codebase>
Output the final polished code here.
</codebase>

<critique>
Review the generated code for:
- Potential bugs or edge cases
- Performance optimizations
- Security considerations
- Best practices and standards compliance
Fix any issues before finalizing output.
</critique>"#;

const DEFAULT_PROMPT: &str = r#"You are Launch, an AI-powered development assistant that helps users build applications.
You analyze user requirements and generate clean, production-ready code.

When generating code:
1. Focus on clean, maintainable, and production-ready code
2. Consider edge cases and error handling
3. Follow best practices for the language/framework being used
4. Provide clear comments and documentation

Think step-by-step about the user's request before responding.
"#;

const WEB_APP_PROMPT: &str = r#"You are Launch, an AI-powered web application generator.
You analyze user requirements and generate clean, production-ready web applications.

When generating code:
1. Use modern web frameworks and libraries
2. Implement responsive design principles
3. Follow security best practices
4. Structure code for maintainability and scalability
5. Include proper error handling and validation

Think step-by-step about the user's request before responding.
"#;

const API_PROMPT: &str = r#"You are Launch, an AI-powered API generator.
You analyze user requirements and generate clean, production-ready API implementations.

When generating code:
1. Follow RESTful or GraphQL best practices
2. Implement proper authentication and authorization
3. Include input validation and error handling
4. Design for scalability and performance
5. Document the API endpoints thoroughly

Think step-by-step about the user's request before responding.
"#;

const DATA_ANALYSIS_PROMPT: &str = r#"You are Launch, an AI-powered data analysis application generator.
You analyze user requirements and generate clean, production-ready data analysis applications.

When generating code:
1. Use appropriate data processing libraries
2. Implement efficient data handling techniques
3. Include data validation and cleaning steps
4. Create clear visualizations when appropriate
5. Document the analysis process thoroughly

Think step-by-step about the user's request before responding.
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    #[default]
    Default,
    WebApp,
    Api,
    DataAnalysis,
}

impl PromptType {
    /// Parses a prompt type name. Unknown names fall back to `Default`.
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "web_app" => PromptType::WebApp,
            "api" => PromptType::Api,
            "data_analysis" => PromptType::DataAnalysis,
            _ => PromptType::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::Default => "default",
            PromptType::WebApp => "web_app",
            PromptType::Api => "api",
            PromptType::DataAnalysis => "data_analysis",
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            PromptType::Default => DEFAULT_PROMPT,
            PromptType::WebApp => WEB_APP_PROMPT,
            PromptType::Api => API_PROMPT,
            PromptType::DataAnalysis => DATA_ANALYSIS_PROMPT,
        }
    }
}

impl fmt::Display for PromptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PromptType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(PromptType::parse_lenient(&name))
    }
}

pub const PROJECT_TEMPLATES: &[(&str, &str)] = &[
    (
        "landing_page",
        "Create a responsive landing page with hero section, features, and call-to-action",
    ),
    (
        "sign_up_form",
        "Build a user registration form with validation and submission handling",
    ),
    ("dashboard", "Design a data dashboard with charts and filters"),
    ("blog", "Create a blog with posts and categories"),
    (
        "calculator",
        "Build a calculator with basic arithmetic operations",
    ),
    (
        "e_commerce",
        "Build an e-commerce product page with cart functionality",
    ),
];

pub fn project_template(name: &str) -> Option<&'static str> {
    PROJECT_TEMPLATES
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, description)| *description)
}

/// Builds the system message for a generation request.
pub fn compose_system_prompt(
    prompt_type: PromptType,
    template: Option<&str>,
    additional_context: Option<&str>,
) -> String {
    let mut prompt = format!(
        "{}\n{}",
        prompt_type.system_prompt(),
        GENERATOR_SYSTEM_PROMPT
    );
    if let Some(description) = template.and_then(project_template) {
        prompt.push_str(&format!("\nTemplate: {}\n", description));
    }
    if let Some(context) = additional_context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!("\n\nAdditional context:\n{}", context));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_prompt_type_falls_back() {
        assert_eq!(PromptType::parse_lenient("web_app"), PromptType::WebApp);
        assert_eq!(PromptType::parse_lenient(" API "), PromptType::Api);
        assert_eq!(PromptType::parse_lenient("poetry"), PromptType::Default);
    }

    #[test]
    fn test_prompt_type_deserializes_leniently() {
        let parsed: PromptType = serde_json::from_str("\"data_analysis\"").unwrap();
        assert_eq!(parsed, PromptType::DataAnalysis);
        let fallback: PromptType = serde_json::from_str("\"unknown\"").unwrap();
        assert_eq!(fallback, PromptType::Default);
    }

    #[test]
    fn test_compose_includes_template_and_context() {
        let prompt = compose_system_prompt(
            PromptType::WebApp,
            Some("calculator"),
            Some("Use Tailwind"),
        );
        assert!(prompt.starts_with("You are Launch, an AI-powered web application generator."));
        assert!(prompt.contains("<critique>"));
        assert!(prompt.contains("Template: Build a calculator with basic arithmetic operations"));
        assert!(prompt.ends_with("\n\nAdditional context:\nUse Tailwind"));
    }

    #[test]
    fn test_compose_ignores_unknown_template_and_blank_context() {
        let prompt = compose_system_prompt(PromptType::Default, Some("rocket"), Some("  "));
        assert!(!prompt.contains("Template:"));
        assert!(!prompt.contains("Additional context"));
    }
}
