//! Token accountant - aggregate usage across all LLM calls
//!
//! Every response that reports usage is recorded here; the aggregate is
//! broadcast as a `tokens:update` event so UIs can display running totals.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::events::{EventBus, SwarmEvent};
use crate::llm::TokenUsage;

/// Aggregate token totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub calls: u64,
}

/// Aggregates prompt/completion tokens across all LLM calls
pub struct TokenAccountant {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    calls: AtomicU64,
    bus: Option<Arc<EventBus>>,
}

impl TokenAccountant {
    pub fn new() -> Self {
        Self {
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            bus: None,
        }
    }

    /// Create an accountant that broadcasts `tokens:update` on every record
    pub fn with_bus(bus: Arc<EventBus>) -> Self {
        let mut accountant = Self::new();
        accountant.bus = Some(bus);
        accountant
    }

    /// Record usage from one LLM response
    pub fn record(&self, usage: &TokenUsage) {
        self.prompt_tokens.fetch_add(usage.prompt_tokens, Ordering::SeqCst);
        self.completion_tokens.fetch_add(usage.completion_tokens, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        let totals = self.totals();
        debug!(
            prompt = totals.prompt_tokens,
            completion = totals.completion_tokens,
            calls = totals.calls,
            "TokenAccountant::record"
        );
        if let Some(bus) = &self.bus {
            bus.emit(SwarmEvent::TokensUpdate {
                prompt_tokens: totals.prompt_tokens,
                completion_tokens: totals.completion_tokens,
                calls: totals.calls,
            });
        }
    }

    /// Current aggregate
    pub fn totals(&self) -> TokenTotals {
        TokenTotals {
            prompt_tokens: self.prompt_tokens.load(Ordering::SeqCst),
            completion_tokens: self.completion_tokens.load(Ordering::SeqCst),
            calls: self.calls.load(Ordering::SeqCst),
        }
    }

    /// Reset all totals (called at the start of a new build)
    pub fn reset(&self) {
        self.prompt_tokens.store(0, Ordering::SeqCst);
        self.completion_tokens.store(0, Ordering::SeqCst);
        self.calls.store(0, Ordering::SeqCst);
    }
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self::new()
    }
}
