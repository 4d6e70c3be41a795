//! OpenAI-compatible chat-completions transport
//!
//! Retrying, optionally-streaming, tool-aware client. Every attempt gates
//! on the caller's rate limiter (falling back to the shared one), usage is
//! recorded into the token accountant on success, and transient failures
//! back off exponentially with jitter. Model id, base URL and API key are
//! read from the runtime configuration on every call so rotated
//! credentials are picked up transparently.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::SharedConfig;
use crate::events::{EventBus, SwarmEvent};
use crate::limits::{RateLimiter, TokenAccountant};

use super::{
    ChatClient, ChatRequest, ChatResponse, LlmError, StreamChunk, TokenUsage, ToolCallRequest,
};

/// Additional attempts after the first (4 attempts total)
const MAX_RETRIES: u32 = 3;

/// Base backoff delay
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Uniform jitter added to every backoff sleep
const JITTER_MS: u64 = 500;

/// HTTP transport over an OpenAI-compatible chat-completions endpoint
pub struct OpenAiTransport {
    http: Client,
    config: SharedConfig,
    shared_limiter: Arc<RateLimiter>,
    accountant: Arc<TokenAccountant>,
    bus: Option<Arc<EventBus>>,
}

impl OpenAiTransport {
    /// Create a transport from the shared runtime configuration
    pub fn new(
        config: SharedConfig,
        shared_limiter: Arc<RateLimiter>,
        accountant: Arc<TokenAccountant>,
    ) -> Result<Self, LlmError> {
        let timeout = Duration::from_millis(config.snapshot().llm.timeout_ms);
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            http,
            config,
            shared_limiter,
            accountant,
            bus: None,
        })
    }

    /// Report retries and rate-limit waits on the event bus
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    fn endpoint(base_url: &str) -> String {
        format!("{}/v1/chat/completions", base_url.trim_end_matches('/'))
    }

    /// Build the request body for the chat-completions API
    fn build_request_body(&self, request: &ChatRequest, model: &str, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": request.messages,
            "temperature": request.options.temperature,
            "max_tokens": request.options.max_tokens,
        });

        if !request.tools.is_empty() {
            body["tools"] =
                serde_json::json!(request.tools.iter().map(|t| t.to_openai_schema()).collect::<Vec<_>>());
            body["tool_choice"] = serde_json::json!("auto");
        }

        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        body
    }

    async fn backoff(&self, attempt: u32, reason: &str) {
        let base = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1);
        let jitter = rand::rng().random_range(0..JITTER_MS);
        let delay_ms = base + jitter;
        warn!(attempt, delay_ms, reason, "OpenAiTransport: retrying after transient error");
        if let Some(bus) = &self.bus {
            bus.emit(SwarmEvent::LlmRetry {
                attempt,
                delay_ms,
                reason: reason.to_string(),
            });
        }
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    async fn attempt_chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let settings = self.config.snapshot();
        let api_key = settings.llm.get_api_key().map_err(|e| LlmError::MissingApiKey(e.to_string()))?;
        let url = Self::endpoint(&settings.llm.base_url);
        let body = self.build_request_body(request, &settings.llm.model, false);

        debug!(model = %settings.llm.model, messages = request.messages.len(), "attempt_chat: sending");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(LlmError::Network)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(status, "attempt_chat: API error");
            return Err(LlmError::ApiError { status, message });
        }

        let api_response: OpenAiResponse = response.json().await.map_err(LlmError::Network)?;
        parse_response(api_response)
    }

    async fn attempt_stream(
        &self,
        request: &ChatRequest,
        chunk_tx: &mpsc::Sender<StreamChunk>,
    ) -> Result<ChatResponse, LlmError> {
        let settings = self.config.snapshot();
        let api_key = settings.llm.get_api_key().map_err(|e| LlmError::MissingApiKey(e.to_string()))?;
        let url = Self::endpoint(&settings.llm.base_url);
        let body = self.build_request_body(request, &settings.llm.model, true);

        debug!(model = %settings.llm.model, "attempt_stream: sending");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(LlmError::Network)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status, message });
        }

        let mut stream = response.bytes_stream();
        let mut accumulator = StreamAccumulator::default();
        let mut buffer = String::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(LlmError::Network)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Process complete SSE lines
            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if line.is_empty() || line == "data: [DONE]" {
                    continue;
                }

                if let Some(data) = line.strip_prefix("data: ")
                    && let Ok(chunk_data) = serde_json::from_str::<OpenAiStreamChunk>(data)
                {
                    for out in accumulator.feed(&chunk_data) {
                        let _ = chunk_tx.send(out).await;
                    }
                }
            }
        }

        let (response, done) = accumulator.finish();
        let _ = chunk_tx.send(done).await;
        Ok(response)
    }
}

#[async_trait]
impl ChatClient for OpenAiTransport {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let limiter = request
            .options
            .limiter
            .clone()
            .unwrap_or_else(|| self.shared_limiter.clone());

        let mut last_error: Option<LlmError> = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let reason = last_error.as_ref().map(|e| e.to_string()).unwrap_or_default();
                self.backoff(attempt, &reason).await;
            }

            limiter.acquire().await;
            let result = self.attempt_chat(&request).await;
            limiter.release().await;

            match result {
                Ok(response) => {
                    self.accountant.record(&response.usage);
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    debug!(attempt, error = %e, "chat: transient error");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::InvalidResponse("retries exhausted".to_string())))
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<ChatResponse, LlmError> {
        let limiter = request
            .options
            .limiter
            .clone()
            .unwrap_or_else(|| self.shared_limiter.clone());

        let mut last_error: Option<LlmError> = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let reason = last_error.as_ref().map(|e| e.to_string()).unwrap_or_default();
                self.backoff(attempt, &reason).await;
            }

            limiter.acquire().await;
            let result = self.attempt_stream(&request, &chunk_tx).await;
            limiter.release().await;

            match result {
                Ok(response) => {
                    self.accountant.record(&response.usage);
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    debug!(attempt, error = %e, "chat_stream: transient error");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::InvalidResponse("retries exhausted".to_string())))
    }
}

fn parse_response(api_response: OpenAiResponse) -> Result<ChatResponse, LlmError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("response contained no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCallRequest::new(tc.id, tc.function.name, tc.function.arguments))
        .collect();

    Ok(ChatResponse {
        content: choice.message.content,
        tool_calls,
        finish_reason: choice.finish_reason,
        usage: api_response.usage.unwrap_or_default(),
    })
}

/// Synthesizes a complete response from stream deltas
///
/// Tool calls arrive interleaved and fragmented: the id may be present only
/// in the first chunk for an index, while name and arguments accumulate
/// across chunks. The final list is ordered by index.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    calls: BTreeMap<usize, PartialToolCall>,
    finish_reason: Option<String>,
    usage: TokenUsage,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

impl StreamAccumulator {
    fn feed(&mut self, chunk: &OpenAiStreamChunk) -> Vec<StreamChunk> {
        let mut out = Vec::new();

        if let Some(choice) = chunk.choices.first() {
            if let Some(content) = &choice.delta.content {
                self.content.push_str(content);
                out.push(StreamChunk::TextDelta(content.clone()));
            }

            if let Some(tool_calls) = &choice.delta.tool_calls {
                for tc in tool_calls {
                    let entry = self.calls.entry(tc.index).or_default();
                    if let Some(id) = &tc.id {
                        entry.id = id.clone();
                    }
                    if let Some(function) = &tc.function {
                        if let Some(name) = &function.name {
                            entry.name.push_str(name);
                            if !entry.announced {
                                entry.announced = true;
                                out.push(StreamChunk::ToolCallStart {
                                    index: tc.index,
                                    id: entry.id.clone(),
                                    name: entry.name.clone(),
                                });
                            }
                        }
                        if let Some(arguments) = &function.arguments {
                            entry.arguments.push_str(arguments);
                            out.push(StreamChunk::ToolCallDelta {
                                index: tc.index,
                                arguments: arguments.clone(),
                            });
                        }
                    }
                }
            }

            if let Some(reason) = &choice.finish_reason {
                self.finish_reason = Some(reason.clone());
            }
        }

        // Usage arrives in the final chunk when stream_options requests it
        if let Some(usage) = &chunk.usage {
            self.usage = *usage;
        }

        out
    }

    fn finish(self) -> (ChatResponse, StreamChunk) {
        let tool_calls: Vec<ToolCallRequest> = self
            .calls
            .into_values()
            .map(|partial| ToolCallRequest::new(partial.id, partial.name, partial.arguments))
            .collect();

        let response = ChatResponse {
            content: if self.content.is_empty() { None } else { Some(self.content) },
            tool_calls,
            finish_reason: self.finish_reason.clone(),
            usage: self.usage,
        };
        let done = StreamChunk::Done {
            finish_reason: self.finish_reason,
            usage: self.usage,
        };
        (response, done)
    }
}

// Wire response types

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunction {
    name: String,
    arguments: String,
}

// Streaming wire types

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<OpenAiStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::{ChatMessage, ChatOptions, ToolDefinition};

    fn make_transport() -> OpenAiTransport {
        let config = SharedConfig::new(Config::default());
        let limiter = Arc::new(RateLimiter::new(4, 100));
        let accountant = Arc::new(TokenAccountant::new());
        OpenAiTransport::new(config, limiter, accountant).unwrap()
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        assert_eq!(
            OpenAiTransport::endpoint("https://api.openai.com/"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            OpenAiTransport::endpoint("https://api.openai.com"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_build_request_body_basic() {
        let transport = make_transport();
        let request = ChatRequest {
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
            tools: vec![],
            options: ChatOptions::default(),
        };

        let body = transport.build_request_body(&request, "gpt-4o", false);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["temperature"], 0.3);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert!(body.get("tools").is_none());
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_build_request_body_with_tools() {
        let transport = make_transport();
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: vec![ToolDefinition::new("read_file", "Read a file", serde_json::json!({"type": "object"}))],
            options: ChatOptions::default(),
        };

        let body = transport.build_request_body(&request, "gpt-4o", false);

        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "read_file");
    }

    #[test]
    fn test_build_request_body_streaming() {
        let transport = make_transport();
        let request = ChatRequest::default();

        let body = transport.build_request_body(&request, "gpt-4o", true);

        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let api: OpenAiResponse = serde_json::from_value(serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "write_file", "arguments": "{\"path\": \"a\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }))
        .unwrap();

        let response = parse_response(api).unwrap();
        assert!(response.content.is_none());
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].function.name, "write_file");
        assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(response.usage.prompt_tokens, 10);
    }

    #[test]
    fn test_parse_response_empty_choices_is_error() {
        let api: OpenAiResponse = serde_json::from_value(serde_json::json!({"choices": [], "usage": null})).unwrap();
        assert!(matches!(parse_response(api), Err(LlmError::InvalidResponse(_))));
    }

    fn feed_lines(accumulator: &mut StreamAccumulator, lines: &[&str]) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        for line in lines {
            let chunk: OpenAiStreamChunk = serde_json::from_str(line).unwrap();
            out.extend(accumulator.feed(&chunk));
        }
        out
    }

    #[test]
    fn test_stream_accumulates_content_and_usage() {
        let mut accumulator = StreamAccumulator::default();
        let chunks = feed_lines(
            &mut accumulator,
            &[
                r#"{"choices": [{"delta": {"content": "Hel"}, "finish_reason": null}]}"#,
                r#"{"choices": [{"delta": {"content": "lo"}, "finish_reason": "stop"}]}"#,
                r#"{"choices": [], "usage": {"prompt_tokens": 3, "completion_tokens": 2}}"#,
            ],
        );

        assert_eq!(chunks.len(), 2);
        let (response, _) = accumulator.finish();
        assert_eq!(response.content.as_deref(), Some("Hello"));
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.completion_tokens, 2);
    }

    #[test]
    fn test_stream_accumulates_tool_calls_per_index() {
        let mut accumulator = StreamAccumulator::default();
        feed_lines(
            &mut accumulator,
            &[
                // id arrives only in the first chunk for each index
                r#"{"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_a", "function": {"name": "read_file", "arguments": ""}}]}, "finish_reason": null}]}"#,
                r#"{"choices": [{"delta": {"tool_calls": [{"index": 1, "id": "call_b", "function": {"name": "write_file", "arguments": "{\"pa"}}]}, "finish_reason": null}]}"#,
                r#"{"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"path\": \"x\"}"}}]}, "finish_reason": null}]}"#,
                r#"{"choices": [{"delta": {"tool_calls": [{"index": 1, "function": {"arguments": "th\": \"y\"}"}}]}, "finish_reason": "tool_calls"}]}"#,
            ],
        );

        let (response, _) = accumulator.finish();
        assert_eq!(response.tool_calls.len(), 2);
        // Ordered by index
        assert_eq!(response.tool_calls[0].id, "call_a");
        assert_eq!(response.tool_calls[0].function.arguments, r#"{"path": "x"}"#);
        assert_eq!(response.tool_calls[1].id, "call_b");
        assert_eq!(response.tool_calls[1].parsed_arguments()["path"], "y");
        assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_stream_finish_reason_last_non_null_wins() {
        let mut accumulator = StreamAccumulator::default();
        feed_lines(
            &mut accumulator,
            &[
                r#"{"choices": [{"delta": {"content": "a"}, "finish_reason": null}]}"#,
                r#"{"choices": [{"delta": {}, "finish_reason": "length"}]}"#,
                r#"{"choices": [{"delta": {}, "finish_reason": null}]}"#,
            ],
        );

        let (response, _) = accumulator.finish();
        assert_eq!(response.finish_reason.as_deref(), Some("length"));
    }
}
