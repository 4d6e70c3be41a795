//! Context manager - keeps the orchestrator conversation under budget
//!
//! The conversation grows without bound across iterations. Before each
//! orchestrator call the manager measures a character budget (roughly 4
//! chars per token); past the threshold, everything between the system
//! message and the recent tail is summarized by the LLM into a single
//! synthetic user message. If the summarization call itself fails the
//! middle is silently dropped - a degraded conversation beats a dead build.

use tracing::{debug, warn};

use crate::llm::{ChatClient, ChatMessage, ChatOptions, ChatRequest};
use crate::prompts::embedded::SUMMARIZE_SYSTEM;

/// Char-budget policy for one conversation
pub struct ContextManager {
    /// Nominal conversation capacity
    pub max_chars: usize,
    /// Summarize once the total exceeds this
    pub summarize_threshold: usize,
    /// Messages at the tail that are never summarized
    pub keep_recent: usize,
    /// Cap on the transcript handed to the summarizer
    pub transcript_cap: usize,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self {
            max_chars: 96_000,
            summarize_threshold: 64_000,
            keep_recent: 8,
            transcript_cap: 40_000,
        }
    }
}

impl ContextManager {
    /// Total chars across the conversation
    pub fn total_chars(&self, messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| m.char_len()).sum()
    }

    /// Fraction of the nominal capacity in use
    pub fn usage_ratio(&self, messages: &[ChatMessage]) -> f64 {
        self.total_chars(messages) as f64 / self.max_chars as f64
    }

    /// Summarize the middle of the conversation if it is over budget
    ///
    /// The system message at index 0 and the last `keep_recent` messages
    /// are always preserved.
    pub async fn compact(&self, llm: &dyn ChatClient, messages: &mut Vec<ChatMessage>) {
        let total = self.total_chars(messages);
        if total <= self.summarize_threshold {
            return;
        }
        if messages.len() <= self.keep_recent + 2 {
            return;
        }

        let tail_start = messages.len() - self.keep_recent;
        let middle = &messages[1..tail_start];

        let mut transcript = String::new();
        for message in middle {
            let line = format!("[{}]: {}\n", message.role(), message.text().unwrap_or(""));
            if transcript.len() + line.len() > self.transcript_cap {
                transcript.push_str("[transcript truncated]\n");
                break;
            }
            transcript.push_str(&line);
        }

        debug!(total, middle = middle.len(), "ContextManager::compact: summarizing");

        let request = ChatRequest {
            messages: vec![ChatMessage::system(SUMMARIZE_SYSTEM), ChatMessage::user(transcript)],
            tools: vec![],
            options: ChatOptions::default(),
        };

        let replacement = match llm.chat(request).await {
            Ok(response) => {
                let summary = response.content.unwrap_or_default();
                Some(ChatMessage::user(format!("[CONTEXT SUMMARY]\n{}", summary)))
            }
            Err(e) => {
                // Truncation beats failing the build
                warn!(error = %e, "ContextManager::compact: summarization failed, dropping middle");
                None
            }
        };

        let tail: Vec<ChatMessage> = messages.drain(tail_start..).collect();
        messages.truncate(1);
        if let Some(summary) = replacement {
            messages.push(summary);
        }
        messages.extend(tail);
    }
}
