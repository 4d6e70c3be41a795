//! LLM layer
//!
//! The [`ChatClient`] trait abstracts the chat endpoint; [`OpenAiTransport`]
//! is the production implementation over an OpenAI-compatible wire with
//! retry, rate limiting, streaming and token accounting. [`salvage`]
//! extracts JSON from the prose models wrap around it.

mod client;
mod error;
mod openai;
mod salvage;
mod types;

pub use client::ChatClient;
pub use error::LlmError;
pub use openai::OpenAiTransport;
pub use salvage::{salvage, salvage_as};
pub use types::{
    ChatMessage, ChatOptions, ChatRequest, ChatResponse, FunctionCall, StreamChunk, TokenUsage,
    ToolCallRequest, ToolDefinition,
};

#[cfg(test)]
pub use client::mock;
