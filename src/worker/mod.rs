//! Worker - the tool-calling loop that drives one subtask
//!
//! A worker owns one subtask attempt: it streams the LLM with the full
//! tool catalog, executes requested tools locally, feeds results back, and
//! finishes when the model replies without tool calls. Failures inside a
//! worker never escape - they become a failed WorkerResult for this
//! subtask only.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::EventEmitter;
use crate::limits::{FileLockRegistry, RateLimiter};
use crate::llm::{ChatClient, ChatMessage, ChatOptions, ChatRequest, StreamChunk};
use crate::prompts::{self, Prompts};
use crate::task::WorkerResult;
use crate::tools::{ToolContext, ToolExecutor};

/// Everything a worker needs to run one subtask
#[derive(Debug, Clone)]
pub struct WorkerAssignment {
    pub subtask_id: String,
    pub title: String,
    pub description: String,
    pub feedback: Option<String>,
    pub file_tree: Option<String>,
    /// Compressed summaries of completed sibling subtasks
    pub sibling_context: String,
}

/// One parallel execution slot
pub struct Worker {
    index: usize,
    root: PathBuf,
    llm: Arc<dyn ChatClient>,
    /// Per-worker limiter so workers do not contend with each other
    limiter: Arc<RateLimiter>,
    executor: Arc<ToolExecutor>,
    locks: Arc<FileLockRegistry>,
    emitter: EventEmitter,
    prompts: Arc<Prompts>,
    max_tool_loops: u32,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        root: PathBuf,
        llm: Arc<dyn ChatClient>,
        limiter: Arc<RateLimiter>,
        executor: Arc<ToolExecutor>,
        locks: Arc<FileLockRegistry>,
        emitter: EventEmitter,
        prompts: Arc<Prompts>,
        max_tool_loops: u32,
    ) -> Self {
        Self {
            index,
            root,
            llm,
            limiter,
            executor,
            locks,
            emitter,
            prompts,
            max_tool_loops: max_tool_loops.max(1),
        }
    }

    /// Drive the assigned subtask to completion or failure
    pub async fn run(&self, assignment: WorkerAssignment) -> WorkerResult {
        info!(worker = self.index, subtask_id = %assignment.subtask_id, title = %assignment.title, "Worker: starting");

        let tool_ctx = ToolContext::new(self.root.clone(), assignment.subtask_id.clone(), self.index)
            .with_locks(self.locks.clone())
            .with_emitter(self.emitter.clone());

        let mut messages = match self.initial_messages(&assignment) {
            Ok(messages) => messages,
            Err(e) => {
                return WorkerResult::failed(&assignment.subtask_id, format!("prompt error: {}", e), vec![]);
            }
        };
        let definitions = self.executor.definitions();

        for tool_loop in 1..=self.max_tool_loops {
            debug!(worker = self.index, subtask_id = %assignment.subtask_id, tool_loop, "Worker: LLM turn");

            let (chunk_tx, chunk_rx) = mpsc::channel(256);
            let forwarder = self.spawn_token_forwarder(&assignment.subtask_id, chunk_rx);

            let request = ChatRequest {
                messages: messages.clone(),
                tools: definitions.clone(),
                options: ChatOptions {
                    limiter: Some(self.limiter.clone()),
                    ..Default::default()
                },
            };

            let response = self.llm.chat_stream(request, chunk_tx).await;
            let _ = forwarder.await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!(worker = self.index, subtask_id = %assignment.subtask_id, error = %e, "Worker: LLM call failed");
                    return WorkerResult::failed(
                        &assignment.subtask_id,
                        format!("LLM error: {}", e),
                        tool_ctx.artifacts().await,
                    );
                }
            };

            messages.push(ChatMessage::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            // No tool calls means the worker considers itself done; the
            // final text is the summary.
            if !response.has_tool_calls() {
                let summary = response.content.unwrap_or_default();
                info!(worker = self.index, subtask_id = %assignment.subtask_id, tool_loop, "Worker: completed");
                return WorkerResult::completed(&assignment.subtask_id, summary, tool_ctx.artifacts().await);
            }

            for call in &response.tool_calls {
                let args_preview: String = call.function.arguments.chars().take(120).collect();
                self.emitter.subtask_progress(
                    &assignment.subtask_id,
                    self.index,
                    &format!("{}({})", call.function.name, args_preview),
                );

                let mut result = self.executor.execute(call, &tool_ctx).await;
                if result.is_error {
                    // One transparent retry; after that the error string
                    // becomes the tool result so the model can adapt.
                    debug!(worker = self.index, tool = %call.function.name, "Worker: tool failed, retrying once");
                    result = self.executor.execute(call, &tool_ctx).await;
                }

                messages.push(ChatMessage::tool(call.id.clone(), result.content));
            }
        }

        warn!(worker = self.index, subtask_id = %assignment.subtask_id, "Worker: tool-loop budget exhausted");
        WorkerResult::failed(&assignment.subtask_id, "max_iterations", tool_ctx.artifacts().await)
    }

    fn initial_messages(&self, assignment: &WorkerAssignment) -> eyre::Result<Vec<ChatMessage>> {
        let system = self.prompts.render(
            prompts::WORKER_SYSTEM,
            &serde_json::json!({
                "worker_index": self.index,
                "root_dir": self.root.display().to_string(),
            }),
        )?;

        let task = self.prompts.render(
            prompts::WORKER_TASK,
            &serde_json::json!({
                "title": assignment.title,
                "description": assignment.description,
                "feedback": assignment.feedback.clone().unwrap_or_default(),
                "file_tree": assignment.file_tree.clone().unwrap_or_default(),
                "siblings": assignment.sibling_context,
            }),
        )?;

        Ok(vec![ChatMessage::system(system), ChatMessage::user(task)])
    }

    fn spawn_token_forwarder(
        &self,
        subtask_id: &str,
        mut chunk_rx: mpsc::Receiver<StreamChunk>,
    ) -> tokio::task::JoinHandle<()> {
        let emitter = self.emitter.clone();
        let subtask_id = subtask_id.to_string();
        let worker = self.index;
        tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if let StreamChunk::TextDelta(token) = chunk {
                    emitter.worker_token(&subtask_id, worker, &token);
                }
            }
        })
    }
}
