use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::error;

use super::Tool;

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// Web search backed by the Tavily API.
pub struct SearchTool {
    client: Client,
    api_key: String,
    endpoint: String,
    max_results: usize,
}

impl SearchTool {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            endpoint: TAVILY_ENDPOINT.to_string(),
            max_results: 5,
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results found.".to_string();
    }
    hits.iter()
        .map(|h| format!("Title: {}\nURL: {}\nContent: {}\n---", h.title, h.url, h.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> String {
        "search".to_string()
    }

    fn description(&self) -> String {
        "Search the web for information on a given query. Returns titles, URLs and content snippets."
            .to_string()
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, args: Value) -> Result<String, String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or("Missing 'query' argument")?;

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(Duration::from_secs(30))
            .json(&serde_json::json!({
                "api_key": self.api_key,
                "query": query,
                "search_depth": "advanced",
                "max_results": self.max_results,
            }))
            .send()
            .await
            .map_err(|e| {
                error!("Error in search tool: {}", e);
                format!("Error searching: {}", e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Error searching: {} - {}", status, body));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| format!("Error searching: {}", e))?;
        Ok(format_hits(&parsed.results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hits() {
        let hits = vec![SearchHit {
            title: "Rust".into(),
            url: "https://rust-lang.org".into(),
            content: "A language".into(),
        }];
        let text = format_hits(&hits);
        assert!(text.starts_with("Title: Rust\nURL: https://rust-lang.org"));
        assert!(text.ends_with("---"));
        assert_eq!(format_hits(&[]), "No results found.");
    }

    #[tokio::test]
    async fn test_missing_query() {
        let tool = SearchTool::new("key".into());
        let result = tool.call(serde_json::json!({})).await;
        assert_eq!(result, Err("Missing 'query' argument".to_string()));
    }

    #[tokio::test]
    async fn test_search_live() {
        dotenv::dotenv().ok();

        let Ok(api_key) = std::env::var("TAVILY_API_KEY") else {
            println!("Skipping test_search_live because TAVILY_API_KEY is not set");
            return;
        };

        let tool = SearchTool::new(api_key);
        match tool.call(serde_json::json!({"query": "rust axum"})).await {
            Ok(text) => assert!(!text.is_empty()),
            Err(e) => println!("Search Error: {}", e),
        }
    }
}
