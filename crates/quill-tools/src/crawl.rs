use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use quill_types::{ToolResult, ToolSchema};

use crate::{truncate_chars, Tool};

const MAX_CRAWL_CHARS: usize = 20_000;

/// Fetches a page and returns it as markdown.
pub struct CrawlTool {
    client: reqwest::Client,
    max_chars: usize,
}

impl Default for CrawlTool {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            max_chars: MAX_CRAWL_CHARS,
        }
    }
}

#[async_trait]
impl Tool for CrawlTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "crawl_tool",
            "Crawl a url and get readable content in markdown format.",
            json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "The url to crawl." }
                },
                "required": ["url"]
            }),
        )
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let url = args["url"].as_str().unwrap_or("").trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Ok(ToolResult {
                output: format!("Failed to crawl. Error: invalid url `{url}`"),
                metadata: json!({"url": url, "error": "invalid_url"}),
            });
        }
        let res = self
            .client
            .get(url)
            .timeout(Duration::from_secs(30))
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Ok(ToolResult {
                output: format!("Failed to crawl. Error: status {status}"),
                metadata: json!({"url": url, "status": status.as_u16()}),
            });
        }
        let markdown = html_to_markdown(&body);
        let (content, truncated) = truncate_chars(&markdown, self.max_chars);
        Ok(ToolResult {
            output: content,
            metadata: json!({"url": url, "truncated": truncated}),
        })
    }
}

fn html_to_markdown(body: &str) -> String {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        html2md::parse_html(body).trim().to_string()
    } else {
        body.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_is_converted_to_markdown() {
        let md = html_to_markdown("<html><body><h1>Title</h1><p>Hello <b>world</b></p></body></html>");
        assert!(md.contains("Title"));
        assert!(md.contains("**world**"));
        assert_eq!(html_to_markdown("  plain text "), "plain text");
    }

    #[tokio::test]
    async fn rejects_non_http_urls_without_fetching() {
        let result = CrawlTool::default()
            .execute(json!({"url": "file:///etc/passwd"}))
            .await
            .expect("result");
        assert!(result.output.starts_with("Failed to crawl"));
        assert_eq!(result.metadata["error"], "invalid_url");
    }
}
