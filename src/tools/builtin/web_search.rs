//! web_search tool - search the web via an env-configured provider

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Remote web calls share this timeout
const WEB_TIMEOUT: Duration = Duration::from_secs(20);

pub struct WebSearchTool;

/// Search provider configuration resolved from the environment
#[derive(Debug, Clone)]
struct SearchConfig {
    provider: &'static str,
    api_key: String,
}

impl SearchConfig {
    fn from_env() -> Option<Self> {
        if let Ok(api_key) = std::env::var("TAVILY_API_KEY") {
            return Some(Self {
                provider: "tavily",
                api_key,
            });
        }
        if let Ok(api_key) = std::env::var("BRAVE_API_KEY") {
            return Some(Self {
                provider: "brave",
                api_key,
            });
        }
        None
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search the web for information. Requires TAVILY_API_KEY or BRAVE_API_KEY."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum results to return (default: 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
        let query = match input["query"].as_str() {
            Some(q) => q,
            None => return ToolResult::error("query is required"),
        };
        let max_results = input["max_results"].as_u64().unwrap_or(5) as usize;

        let config = match SearchConfig::from_env() {
            Some(c) => c,
            None => {
                return ToolResult::error(
                    "No search API configured. Set TAVILY_API_KEY or BRAVE_API_KEY environment variable.",
                );
            }
        };

        match config.provider {
            "tavily" => search_tavily(query, max_results, &config.api_key).await,
            "brave" => search_brave(query, max_results, &config.api_key).await,
            _ => ToolResult::error(format!("Unknown search provider: {}", config.provider)),
        }
    }
}

fn web_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(WEB_TIMEOUT)
        .build()
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

async fn search_tavily(query: &str, max_results: usize, api_key: &str) -> ToolResult {
    let body = serde_json::json!({
        "api_key": api_key,
        "query": query,
        "max_results": max_results,
        "search_depth": "basic"
    });

    let response = match web_client().post("https://api.tavily.com/search").json(&body).send().await {
        Ok(r) => r,
        Err(e) => return ToolResult::error(format!("Search request failed: {}", e)),
    };

    if !response.status().is_success() {
        return ToolResult::error(format!("Search API error: {}", response.status()));
    }

    let parsed: TavilyResponse = match response.json().await {
        Ok(p) => p,
        Err(e) => return ToolResult::error(format!("Failed to parse search response: {}", e)),
    };

    format_results(
        parsed
            .results
            .into_iter()
            .map(|r| (r.title, r.url, r.content))
            .take(max_results),
    )
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

async fn search_brave(query: &str, max_results: usize, api_key: &str) -> ToolResult {
    let response = match web_client()
        .get("https://api.search.brave.com/res/v1/web/search")
        .query(&[("q", query)])
        .header("X-Subscription-Token", api_key)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => return ToolResult::error(format!("Search request failed: {}", e)),
    };

    if !response.status().is_success() {
        return ToolResult::error(format!("Search API error: {}", response.status()));
    }

    let parsed: BraveResponse = match response.json().await {
        Ok(p) => p,
        Err(e) => return ToolResult::error(format!("Failed to parse search response: {}", e)),
    };

    format_results(
        parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .map(|r| (r.title, r.url, r.description))
            .take(max_results),
    )
}

fn format_results(results: impl Iterator<Item = (String, String, String)>) -> ToolResult {
    let formatted: Vec<String> = results
        .enumerate()
        .map(|(i, (title, url, snippet))| format!("{}. {}\n   {}\n   {}", i + 1, title, url, snippet))
        .collect();

    if formatted.is_empty() {
        ToolResult::success("No results found")
    } else {
        ToolResult::success(formatted.join("\n\n"))
    }
}
