use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use quill_types::{ToolResult, ToolSchema};

use crate::Tool;

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const EXA_MCP_ENDPOINT: &str = "https://mcp.exa.ai/mcp";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchEngine {
    #[default]
    Tavily,
    Exa,
}

impl SearchEngine {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchEngine::Tavily => "tavily",
            SearchEngine::Exa => "exa",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tavily" => Some(SearchEngine::Tavily),
            "exa" => Some(SearchEngine::Exa),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default)]
    pub engine: SearchEngine,
    #[serde(default)]
    pub tavily_api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    #[serde(default)]
    pub url: String,
    pub content: String,
}

/// Result of one search: a normalised hit list, or whatever payload the
/// engine returned when it has no hit structure.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Hits(Vec<SearchHit>),
    Native(Value),
}

impl SearchOutcome {
    pub fn render(&self) -> String {
        match self {
            SearchOutcome::Hits(hits) => {
                serde_json::to_string(hits).unwrap_or_else(|_| "[]".to_string())
            }
            SearchOutcome::Native(Value::String(text)) => text.clone(),
            SearchOutcome::Native(other) => other.to_string(),
        }
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn engine(&self) -> SearchEngine;
    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<SearchOutcome>;
}

pub fn build_search_provider(settings: &SearchSettings) -> Arc<dyn SearchProvider> {
    match settings.engine {
        SearchEngine::Tavily => Arc::new(TavilySearch::new(settings.tavily_api_key.clone())),
        SearchEngine::Exa => Arc::new(ExaSearch::new()),
    }
}

pub struct TavilySearch {
    api_key: Option<String>,
    client: reqwest::Client,
}

impl TavilySearch {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()).or_else(|| {
                std::env::var("TAVILY_API_KEY")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
            }),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn engine(&self) -> SearchEngine {
        SearchEngine::Tavily
    }

    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<SearchOutcome> {
        let Some(api_key) = &self.api_key else {
            anyhow::bail!("tavily search requires TAVILY_API_KEY");
        };
        let res = self
            .client
            .post(TAVILY_ENDPOINT)
            .timeout(SEARCH_TIMEOUT)
            .json(&json!({
                "api_key": api_key,
                "query": query,
                "max_results": max_results,
                "search_depth": "advanced",
                "include_raw_content": false,
            }))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let error_text = res.text().await.unwrap_or_default();
            anyhow::bail!("tavily search failed ({}): {}", status, error_text);
        }
        let value: Value = res.json().await?;
        let hits = parse_tavily_results(&value)?;
        tracing::debug!(query, count = hits.len(), "tavily search completed");
        Ok(SearchOutcome::Hits(hits))
    }
}

fn parse_tavily_results(value: &Value) -> anyhow::Result<Vec<SearchHit>> {
    let Some(results) = value.get("results").and_then(|v| v.as_array()) else {
        anyhow::bail!("tavily search returned malformed response: {}", value);
    };
    Ok(results
        .iter()
        .map(|item| SearchHit {
            title: item["title"].as_str().unwrap_or_default().to_string(),
            url: item["url"].as_str().unwrap_or_default().to_string(),
            content: item["content"].as_str().unwrap_or_default().to_string(),
        })
        .collect())
}

/// Exa search through its public MCP endpoint.
pub struct ExaSearch {
    client: reqwest::Client,
}

impl ExaSearch {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ExaSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for ExaSearch {
    fn engine(&self) -> SearchEngine {
        SearchEngine::Exa
    }

    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<SearchOutcome> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {
                "name": "web_search_exa",
                "arguments": {"query": query, "numResults": max_results.clamp(1, 10)}
            }
        });
        let res = self
            .client
            .post(EXA_MCP_ENDPOINT)
            .timeout(SEARCH_TIMEOUT)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .json(&request)
            .send()
            .await?;
        if !res.status().is_success() {
            let error_text = res.text().await.unwrap_or_default();
            anyhow::bail!("exa search error: {}", error_text);
        }
        let body = res.text().await?;
        match parse_exa_body(&body) {
            Some(text) => Ok(SearchOutcome::Native(Value::String(text))),
            None => Ok(SearchOutcome::Native(Value::String(
                "No search results found.".to_string(),
            ))),
        }
    }
}

/// Accepts either a plain JSON-RPC body or an SSE stream of `data:` frames.
fn parse_exa_body(body: &str) -> Option<String> {
    let first_text = |val: &Value| {
        val.get("result")
            .and_then(|r| r.get("content"))
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|first| first.get("text"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
    };
    if let Ok(val) = serde_json::from_str::<Value>(body.trim()) {
        return first_text(&val);
    }
    body.lines()
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<Value>(data.trim()).ok())
        .find_map(|val| first_text(&val))
}

pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>, max_results: usize) -> Self {
        Self {
            provider,
            max_results: max_results.max(1),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "web_search",
            format!(
                "Search the web for current information. Returns up to {} results.",
                self.max_results
            ),
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The search query." }
                },
                "required": ["query"]
            }),
        )
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let query = args["query"].as_str().unwrap_or("").trim();
        if query.is_empty() {
            tracing::warn!("web_search missing query. Args: {}", args);
            return Ok(ToolResult {
                output: format!("missing query. Received args: {}", args),
                metadata: json!({"count": 0}),
            });
        }
        let outcome = self.provider.search(query, self.max_results).await?;
        let count = match &outcome {
            SearchOutcome::Hits(hits) => hits.len(),
            SearchOutcome::Native(_) => 1,
        };
        Ok(ToolResult {
            output: outcome.render(),
            metadata: json!({
                "query": query,
                "engine": self.provider.engine().as_str(),
                "count": count,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSearch(SearchOutcome);

    #[async_trait]
    impl SearchProvider for FixedSearch {
        fn engine(&self) -> SearchEngine {
            SearchEngine::Tavily
        }

        async fn search(&self, _query: &str, max_results: usize) -> anyhow::Result<SearchOutcome> {
            match &self.0 {
                SearchOutcome::Hits(hits) => Ok(SearchOutcome::Hits(
                    hits.iter().take(max_results).cloned().collect(),
                )),
                other => Ok(other.clone()),
            }
        }
    }

    fn hit(title: &str) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            url: format!("https://example.com/{title}"),
            content: format!("{title} body"),
        }
    }

    #[test]
    fn tavily_results_map_to_hits() {
        let value = json!({
            "results": [
                {"title": "A", "url": "https://a", "content": "alpha", "score": 0.9},
                {"title": "B", "url": "https://b", "content": "beta"}
            ]
        });
        let hits = parse_tavily_results(&value).expect("hits");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].content, "beta");
        assert!(parse_tavily_results(&json!({"detail": "bad key"})).is_err());
    }

    #[test]
    fn exa_body_parses_sse_and_plain_json() {
        let sse = "event: message\ndata: {\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"found it\"}]}}\n\n";
        assert_eq!(parse_exa_body(sse).as_deref(), Some("found it"));
        let plain = r#"{"result":{"content":[{"type":"text","text":"plain"}]}}"#;
        assert_eq!(parse_exa_body(plain).as_deref(), Some("plain"));
        assert_eq!(parse_exa_body("data: {}"), None);
    }

    #[test]
    fn search_engine_parses_case_insensitively() {
        assert_eq!(SearchEngine::parse("Tavily"), Some(SearchEngine::Tavily));
        assert_eq!(SearchEngine::parse(" exa "), Some(SearchEngine::Exa));
        assert_eq!(SearchEngine::parse("bing"), None);
    }

    #[tokio::test]
    async fn web_search_tool_limits_and_renders_hits() {
        let tool = WebSearchTool::new(
            Arc::new(FixedSearch(SearchOutcome::Hits(vec![hit("a"), hit("b"), hit("c")]))),
            2,
        );
        let result = tool
            .execute(json!({"query": "rust"}))
            .await
            .expect("search");
        let hits: Vec<SearchHit> = serde_json::from_str(&result.output).expect("hits json");
        assert_eq!(hits.len(), 2);
        assert_eq!(result.metadata["count"], 2);
    }

    #[tokio::test]
    async fn web_search_tool_reports_missing_query() {
        let tool = WebSearchTool::new(Arc::new(FixedSearch(SearchOutcome::Hits(vec![]))), 3);
        let result = tool.execute(json!({})).await.expect("result");
        assert!(result.output.starts_with("missing query"));
    }
}
