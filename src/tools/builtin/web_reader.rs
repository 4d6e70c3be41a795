//! web_reader tool - fetch a URL and convert it to readable text

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Remote web calls share this timeout
const WEB_TIMEOUT: Duration = Duration::from_secs(20);

/// Raw response bodies past this size are rejected
const MAX_BODY_BYTES: usize = 1_000_000;

/// Converted output past this many chars is truncated
const MAX_CHARS: usize = 50_000;

pub struct WebReaderTool;

#[async_trait]
impl Tool for WebReaderTool {
    fn name(&self) -> &'static str {
        "web_reader"
    }

    fn description(&self) -> &'static str {
        "Fetch a URL. HTML is converted to markdown, JSON is pretty-printed."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "URL to fetch (http or https)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
        let url = match input["url"].as_str() {
            Some(u) => u,
            None => return ToolResult::error("url is required"),
        };

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolResult::error("URL must start with http:// or https://");
        }

        let client = reqwest::Client::builder()
            .timeout(WEB_TIMEOUT)
            .build()
            .unwrap_or_default();

        let response = match client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Failed to fetch URL: {}", e)),
        };

        if !response.status().is_success() {
            return ToolResult::error(format!("HTTP error: {}", response.status()));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("Failed to read response: {}", e)),
        };

        if body.len() > MAX_BODY_BYTES {
            return ToolResult::error("Response too large (> 1MB)");
        }

        let output = if content_type.contains("text/html") || content_type.contains("application/xhtml") {
            html2md::rewrite_html(&body, false)
        } else if content_type.contains("application/json") {
            match serde_json::from_str::<Value>(&body) {
                Ok(json) => serde_json::to_string_pretty(&json).unwrap_or(body),
                Err(_) => body,
            }
        } else {
            body
        };

        if output.chars().count() > MAX_CHARS {
            let truncated: String = output.chars().take(MAX_CHARS).collect();
            ToolResult::success(format!("{}...\n[truncated, {} chars total]", truncated, output.chars().count()))
        } else {
            ToolResult::success(output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rejects_non_http_url() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "s1", 0);

        let result = WebReaderTool
            .execute(serde_json::json!({"url": "file:///etc/passwd"}), &ctx)
            .await;

        assert!(result.is_error);
        assert!(result.content.contains("http"));
    }

    #[tokio::test]
    async fn test_requires_url() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "s1", 0);

        let result = WebReaderTool.execute(serde_json::json!({}), &ctx).await;
        assert!(result.is_error);
    }

    #[test]
    fn test_html_to_markdown_conversion() {
        let html = "<html><body><h1>Title</h1><p>Some <b>bold</b> text</p></body></html>";
        let md = html2md::rewrite_html(html, false);
        assert!(md.contains("Title"));
        assert!(md.contains("bold"));
    }
}
