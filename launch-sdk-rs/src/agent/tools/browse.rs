use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::Tool;

const EXCERPT_CHARS: usize = 2000;
const USER_AGENT: &str = "Mozilla/5.0 (compatible; LaunchAgent/1.0)";

lazy_static::lazy_static! {
    static ref STRIP_BLOCK_RE: Regex =
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid block regex");
    static ref TAG_RE: Regex = Regex::new(r"<[^>]*>").expect("valid tag regex");
    static ref SPACE_RE: Regex = Regex::new(r"\s+").expect("valid whitespace regex");
}

/// Fetches a web page and returns a short plain-text excerpt.
pub struct BrowseTool {
    client: Client,
}

impl BrowseTool {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for BrowseTool {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn page_text(html: &str) -> String {
    let text = STRIP_BLOCK_RE.replace_all(html, " ");
    let text = TAG_RE.replace_all(&text, " ");
    SPACE_RE.replace_all(&text, " ").trim().to_string()
}

#[async_trait]
impl Tool for BrowseTool {
    fn name(&self) -> String {
        "browse_website".to_string()
    }

    fn description(&self) -> String {
        "Browse a website and extract its text content.".to_string()
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "URL of the website to browse"
                }
            },
            "required": ["url"]
        })
    }

    async fn call(&self, args: Value) -> Result<String, String> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or("Missing 'url' argument")?;

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("Unsupported URL: {}", url));
        }

        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| format!("Error browsing website: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Error browsing website: {}", e))?;
        if !status.is_success() {
            return Err(format!("Error browsing website: {}", status));
        }

        let text = page_text(&body);
        let excerpt: String = text.chars().take(EXCERPT_CHARS).collect();
        Ok(format!(
            "Fetched {} ({} characters).\n\n{}",
            url,
            body.chars().count(),
            excerpt
        ))
    }
}
