//! Orchestrator engine - the plan/dispatch/review/verify control loop
//!
//! One Orchestrator drives one build: it asks the LLM for a plan, hands
//! ready subtasks to parallel workers, feeds results back through the
//! reviewer, and gates completion on the project verifier. Subtask state
//! is checkpointed after every batch so an interrupted build resumes.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SharedConfig;
use crate::events::{EventBus, EventEmitter, Phase};
use crate::limits::{FileLockRegistry, RateLimiter};
use crate::llm::{ChatClient, ChatMessage, ChatOptions, ChatRequest, LlmError, salvage};
use crate::project::{ProjectAnalyzer, Verifier};
use crate::prompts::{self, Prompts};
use crate::task::{
    Checkpointer, PlannedSubtask, ProjectContext, ReviewDecision, SubtaskStatus, TaskManager, WorkerResult,
};
use crate::tools::ToolExecutor;
use crate::worker::{Worker, WorkerAssignment};

use super::ContextManager;

/// Reviewer sees at most this many chars of each worker summary
const REVIEW_SUMMARY_CAP: usize = 1500;

/// Verifier output is capped in prompts
const VERIFIER_REPORT_CAP: usize = 6000;

/// Extra in-conversation retries when the model returns non-JSON
const JSON_RETRIES: u32 = 2;

/// Terminal outcomes the orchestrator can report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Final review said done
    Done { summary: String },
    /// Iteration budget exhausted; the checkpoint remains for a resume
    MaxIterations,
}

/// Terminal errors for one build
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Planner returned no subtasks")]
    EmptyPlan,

    #[error("Subtasks failed after max attempts: {0}")]
    SubtasksFailed(String),

    #[error("Deadlock: no subtask is ready and the build cannot progress")]
    Deadlock,

    #[error("Model reply was not valid JSON after retries: {0}")]
    MalformedReply(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// The orchestrator control loop for one build
pub struct Orchestrator {
    ctx: ProjectContext,
    tasks: TaskManager,
    llm: Arc<dyn ChatClient>,
    prompts: Arc<Prompts>,
    context_manager: ContextManager,
    checkpointer: Checkpointer,
    verifier: Box<dyn Verifier>,
    executor: Arc<ToolExecutor>,
    locks: Arc<FileLockRegistry>,
    emitter: EventEmitter,
    config: SharedConfig,
    /// One limiter per worker slot, so workers never contend with each
    /// other or with orchestrator calls on the shared limiter
    worker_limiters: Vec<Arc<RateLimiter>>,
}

impl Orchestrator {
    pub fn new(
        ctx: ProjectContext,
        config: SharedConfig,
        llm: Arc<dyn ChatClient>,
        bus: Arc<EventBus>,
        locks: Arc<FileLockRegistry>,
        executor: Arc<ToolExecutor>,
        verifier: Box<dyn Verifier>,
    ) -> Self {
        let snapshot = config.snapshot();
        let emitter = bus.emitter_for(ctx.id.clone());
        let checkpointer = Checkpointer::new(ctx.root_dir.clone());
        let worker_limiters = (0..snapshot.workers.count.max(1))
            .map(|_| {
                Arc::new(RateLimiter::with_bus(
                    snapshot.limits.max_concurrent,
                    snapshot.limits.max_calls_per_hour,
                    bus.clone(),
                ))
            })
            .collect();

        Self {
            tasks: TaskManager::new(snapshot.limits.max_attempts),
            ctx,
            llm,
            prompts: Arc::new(Prompts::new()),
            context_manager: ContextManager::default(),
            checkpointer,
            verifier,
            executor,
            locks,
            emitter,
            config,
            worker_limiters,
        }
    }

    /// The project context (primarily for inspection after a build)
    pub fn context(&self) -> &ProjectContext {
        &self.ctx
    }

    /// Run a build to a terminal outcome
    pub async fn run(&mut self) -> Result<BuildOutcome, OrchestratorError> {
        let resumed = !self.ctx.subtasks.is_empty();
        self.ctx.orchestrator_messages = vec![self.system_message()];

        if resumed {
            info!(project_id = %self.ctx.id, subtasks = self.ctx.subtasks.len(), "Orchestrator: resuming from checkpoint");
            let resume = self.render(
                prompts::RESUME,
                &serde_json::json!({ "status_summary": self.tasks.status_summary(&self.ctx) }),
            );
            self.ctx.orchestrator_messages.push(ChatMessage::user(resume));
        } else {
            self.analyze_project();
            self.plan_phase().await?;
        }

        self.main_loop().await
    }

    /// Continue a finished build with a change request
    ///
    /// Rebuilds a fresh conversation, plans subtasks for the change, and
    /// re-enters the main loop. Completed subtasks are not re-executed.
    pub async fn continue_build(&mut self, change_request: &str) -> Result<BuildOutcome, OrchestratorError> {
        info!(project_id = %self.ctx.id, "Orchestrator: continuation requested");
        self.ctx.orchestrator_messages = vec![self.system_message()];

        let prompt = self.render(
            prompts::CONTINUATION,
            &serde_json::json!({
                "change_request": change_request,
                "status_summary": self.tasks.status_summary(&self.ctx),
            }),
        );

        let value = self.ask_orchestrator(prompt).await?;
        let plan = parse_plan(&value);
        if plan.is_empty() {
            self.emitter.project_error("continuation produced no subtasks");
            return Err(OrchestratorError::EmptyPlan);
        }

        self.tasks.add_subtasks_from_plan(&mut self.ctx, &plan);
        self.emitter.plan(plan.len());
        self.save_checkpoint().await;

        self.main_loop().await
    }

    // === Phases ===

    fn analyze_project(&mut self) {
        let scan = ProjectAnalyzer::new().scan(&self.ctx.root_dir);
        if !scan.file_tree.is_empty() {
            self.ctx.project_file_tree = Some(scan.file_tree.clone());
        }
        if !scan.key_files.is_empty() {
            let rendered = scan
                .key_files
                .iter()
                .map(|(name, content)| format!("--- {} ---\n{}", name, content))
                .collect::<Vec<_>>()
                .join("\n");
            // Key files double as planning context when none was carried in
            if self.ctx.planning_context.is_none() {
                self.ctx.planning_context = Some(rendered);
            }
        }
    }

    async fn plan_phase(&mut self) -> Result<(), OrchestratorError> {
        let prompt = self.render(
            prompts::PLANNING,
            &serde_json::json!({
                "file_tree": self.ctx.project_file_tree.clone().unwrap_or_default(),
                "key_files": "",
                "planning_context": self.ctx.planning_context.clone().unwrap_or_default(),
            }),
        );

        let value = self.ask_orchestrator(prompt).await?;
        let plan = parse_plan(&value);
        if plan.is_empty() {
            self.emitter.project_error("planner returned no subtasks");
            return Err(OrchestratorError::EmptyPlan);
        }

        let ids = self.tasks.add_subtasks_from_plan(&mut self.ctx, &plan);
        info!(project_id = %self.ctx.id, subtasks = ids.len(), "Orchestrator: plan accepted");
        self.emitter.plan(ids.len());
        self.save_checkpoint().await;
        Ok(())
    }

    async fn main_loop(&mut self) -> Result<BuildOutcome, OrchestratorError> {
        let max_iterations = self.config.snapshot().limits.max_orchestrator_iterations;

        for iteration in 1..=max_iterations {
            self.emitter.phase(Phase::Executing);
            let ready = self.tasks.ready_subtasks(&self.ctx);

            if ready.is_empty() {
                if self.tasks.all_completed(&self.ctx) {
                    match self.verify_and_finalize().await? {
                        Some(outcome) => return Ok(outcome),
                        None => continue,
                    }
                }
                if self.tasks.any_failed(&self.ctx) {
                    let failed: Vec<&str> = self
                        .ctx
                        .subtasks
                        .iter()
                        .filter(|s| s.status == SubtaskStatus::Failed)
                        .map(|s| s.title.as_str())
                        .collect();
                    let message = format!("subtasks failed after max attempts: {}", failed.join(", "));
                    self.emitter.project_error(&message);
                    return Err(OrchestratorError::SubtasksFailed(failed.join(", ")));
                }
                self.emitter
                    .project_error("deadlock: no subtask is ready and the build cannot progress");
                return Err(OrchestratorError::Deadlock);
            }

            // Dispatch a batch of ready subtasks to parallel workers
            self.emitter.phase(Phase::Dispatching);
            let results = self.dispatch_batch(&ready).await;

            for result in &results {
                self.tasks.apply_worker_result(&mut self.ctx, result);
                if let Some(subtask) = self.ctx.subtask(&result.subtask_id) {
                    self.emitter
                        .subtask_completed(&result.subtask_id, subtask.status.as_str(), subtask.attempts);
                }
            }
            self.save_checkpoint().await;

            // Review the batch
            self.emitter.phase(Phase::Reviewing);
            self.review_batch(&results).await?;
            self.save_checkpoint().await;

            // Iteration accounting
            let completed = self
                .ctx
                .subtasks
                .iter()
                .filter(|s| s.status == SubtaskStatus::Completed)
                .count();
            self.emitter.iteration(iteration, completed, self.ctx.subtasks.len());

            let usage = self.context_manager.usage_ratio(&self.ctx.orchestrator_messages);
            if usage > 0.5 {
                warn!(project_id = %self.ctx.id, usage = format!("{:.0}%", usage * 100.0), "Orchestrator: context over half budget");
            }
        }

        warn!(project_id = %self.ctx.id, max_iterations, "Orchestrator: iteration budget exhausted, checkpoint kept for resume");
        self.save_checkpoint().await;
        Ok(BuildOutcome::MaxIterations)
    }

    async fn dispatch_batch(&mut self, ready: &[String]) -> Vec<WorkerResult> {
        let snapshot = self.config.snapshot();
        let worker_count = snapshot.workers.count.max(1);
        let batch: Vec<String> = ready.iter().take(worker_count).cloned().collect();

        let mut handles = Vec::with_capacity(batch.len());
        for (slot, subtask_id) in batch.iter().enumerate() {
            let assignment = {
                let sibling_context = self.sibling_context(subtask_id);
                let file_tree = self.ctx.project_file_tree.clone();
                let Some(subtask) = self.ctx.subtask_mut(subtask_id) else {
                    continue;
                };
                subtask.status = SubtaskStatus::InProgress;
                subtask.assigned_worker = Some(slot);

                WorkerAssignment {
                    subtask_id: subtask.id.clone(),
                    title: subtask.title.clone(),
                    description: subtask.description.clone(),
                    feedback: subtask.feedback.clone(),
                    file_tree,
                    sibling_context,
                }
            };

            self.emitter.subtask_assigned(subtask_id, &assignment.title, slot);
            debug!(subtask_id = %subtask_id, slot, "Orchestrator: dispatching");

            let worker = Worker::new(
                slot,
                self.ctx.root_dir.clone(),
                self.llm.clone(),
                self.worker_limiters[slot % self.worker_limiters.len()].clone(),
                self.executor.clone(),
                self.locks.clone(),
                self.emitter.clone(),
                self.prompts.clone(),
                snapshot.limits.max_tool_loops,
            );

            let id = subtask_id.clone();
            handles.push((id, tokio::spawn(async move { worker.run(assignment).await })));
        }

        // Wait for the whole batch; a panicked worker task becomes a failed
        // result for its subtask and never touches its siblings.
        let mut results = Vec::with_capacity(handles.len());
        for (subtask_id, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_error) => {
                    warn!(subtask_id = %subtask_id, error = %join_error, "Orchestrator: worker task panicked");
                    results.push(WorkerResult::failed(
                        subtask_id,
                        format!("worker task panicked: {}", join_error),
                        vec![],
                    ));
                }
            }
        }
        results
    }

    async fn review_batch(&mut self, results: &[WorkerResult]) -> Result<(), OrchestratorError> {
        if results.is_empty() {
            return Ok(());
        }

        let mut batch_report = String::new();
        for result in results {
            let Some(subtask) = self.ctx.subtask(&result.subtask_id) else {
                continue;
            };
            let summary: String = subtask
                .result
                .as_deref()
                .unwrap_or("")
                .chars()
                .take(REVIEW_SUMMARY_CAP)
                .collect();
            batch_report.push_str(&format!(
                "subtask_id: {}\ntitle: {}\nstatus: {}\nsummary: {}\nartifacts: {}\n\n",
                subtask.id,
                subtask.title,
                subtask.status,
                summary,
                if subtask.artifacts.is_empty() {
                    "(none)".to_string()
                } else {
                    subtask.artifacts.join(", ")
                },
            ));
        }

        let prompt = self.render(
            prompts::REVIEW,
            &serde_json::json!({
                "batch_report": batch_report,
                "status_summary": self.tasks.status_summary(&self.ctx),
            }),
        );

        let decisions = match self.ask_orchestrator(prompt).await {
            Ok(value) => parse_decisions(&value),
            Err(OrchestratorError::MalformedReply(reply)) => {
                // Worker statuses stand; the build goes on without this
                // review round.
                warn!(project_id = %self.ctx.id, reply = %reply, "Orchestrator: unusable review reply, skipping review");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        self.emitter.review(decisions.len());
        self.tasks.apply_review_decisions(&mut self.ctx, &decisions);
        Ok(())
    }

    /// Verify and final-review; `Some(outcome)` ends the build, `None`
    /// means new subtasks were appended and the main loop continues
    async fn verify_and_finalize(&mut self) -> Result<Option<BuildOutcome>, OrchestratorError> {
        self.emitter.phase(Phase::Verifying);
        info!(project_id = %self.ctx.id, "Orchestrator: all subtasks completed, verifying");
        let report = self.verifier.verify(&self.ctx.root_dir).await;
        let report_text: String = report.report.chars().take(VERIFIER_REPORT_CAP).collect();

        if !report.passed {
            info!(project_id = %self.ctx.id, "Orchestrator: verification failed, planning fixes");
            let prompt = self.render(
                prompts::FIX_PLAN,
                &serde_json::json!({
                    "verifier_report": report_text,
                    "status_summary": self.tasks.status_summary(&self.ctx),
                }),
            );

            let value = self.ask_orchestrator(prompt).await?;
            let plan = parse_plan(&value);
            if plan.is_empty() {
                self.emitter.project_error("verification failed and no fix plan was produced");
                return Err(OrchestratorError::EmptyPlan);
            }

            self.tasks.add_subtasks_from_plan(&mut self.ctx, &plan);
            self.emitter.plan(plan.len());
            self.save_checkpoint().await;
            return Ok(None);
        }

        self.emitter.phase(Phase::FinalReview);
        let prompt = self.render(
            prompts::FINAL_REVIEW,
            &serde_json::json!({
                "status_summary": self.tasks.status_summary(&self.ctx),
                "verifier_report": report_text,
            }),
        );

        let value = self.ask_orchestrator(prompt).await?;
        let reply: FinalReply = serde_json::from_value(value.clone())
            .map_err(|_| OrchestratorError::MalformedReply(value.to_string()))?;

        if reply.status == "needs_more" && !reply.additional_subtasks.is_empty() {
            info!(project_id = %self.ctx.id, additional = reply.additional_subtasks.len(), "Orchestrator: final review wants more work");
            self.tasks.add_subtasks_from_plan(&mut self.ctx, &reply.additional_subtasks);
            self.emitter.plan(reply.additional_subtasks.len());
            self.save_checkpoint().await;
            return Ok(None);
        }

        info!(project_id = %self.ctx.id, "Orchestrator: done");
        self.emitter.project_done(&reply.summary);
        self.save_checkpoint().await;
        Ok(Some(BuildOutcome::Done { summary: reply.summary }))
    }

    // === Helpers ===

    /// Send a prompt on the orchestrator conversation and salvage JSON
    ///
    /// Compacts the conversation first; on an empty or non-JSON reply,
    /// appends a reminder and retries on the same conversation. The final
    /// assistant reply is always appended before returning.
    async fn ask_orchestrator(&mut self, prompt: String) -> Result<serde_json::Value, OrchestratorError> {
        self.ctx.orchestrator_messages.push(ChatMessage::user(prompt));
        self.context_manager
            .compact(self.llm.as_ref(), &mut self.ctx.orchestrator_messages)
            .await;

        let mut retries_left = JSON_RETRIES;
        loop {
            let request = ChatRequest {
                messages: self.ctx.orchestrator_messages.clone(),
                tools: vec![],
                options: ChatOptions::default(),
            };

            let response = self.llm.chat(request).await?;
            let text = response.content.unwrap_or_default();
            self.ctx.orchestrator_messages.push(ChatMessage::assistant(text.clone()));

            if let Some(value) = salvage(&text) {
                return Ok(value);
            }

            if retries_left == 0 {
                let preview: String = text.chars().take(200).collect();
                return Err(OrchestratorError::MalformedReply(preview));
            }
            retries_left -= 1;
            debug!(project_id = %self.ctx.id, retries_left, "ask_orchestrator: reply was not JSON, reminding");
            self.ctx
                .orchestrator_messages
                .push(ChatMessage::user("Your response was not valid JSON. Respond with ONLY valid JSON."));
        }
    }

    fn system_message(&self) -> ChatMessage {
        ChatMessage::system(self.render(
            prompts::ORCHESTRATOR_SYSTEM,
            &serde_json::json!({
                "root_dir": self.ctx.root_dir.display().to_string(),
                "task_description": self.ctx.task_description,
            }),
        ))
    }

    fn render(&self, template: &str, data: &serde_json::Value) -> String {
        // Embedded templates always render; a failure here is a programming
        // error surfaced in tests.
        self.prompts.render(template, data).unwrap_or_default()
    }

    /// Compressed summaries of completed siblings for a worker prompt
    fn sibling_context(&self, exclude_id: &str) -> String {
        let mut out = String::new();
        for subtask in &self.ctx.subtasks {
            if subtask.id == exclude_id || subtask.status != SubtaskStatus::Completed {
                continue;
            }
            let summary: String = subtask.result.as_deref().unwrap_or("").chars().take(200).collect();
            out.push_str(&format!("- {}: {}", subtask.title, summary));
            if !subtask.artifacts.is_empty() {
                out.push_str(&format!(" (files: {})", subtask.artifacts.join(", ")));
            }
            out.push('\n');
            if out.len() > 4000 {
                out.push_str("[more siblings omitted]\n");
                break;
            }
        }
        out
    }

    async fn save_checkpoint(&self) {
        if let Err(e) = self.checkpointer.save(&self.ctx).await {
            warn!(project_id = %self.ctx.id, error = %e, "Orchestrator: checkpoint save failed");
        }
    }
}

/// Reply shape of the final review
#[derive(Debug, Deserialize)]
struct FinalReply {
    status: String,
    #[serde(default)]
    summary: String,
    #[serde(default, alias = "additionalSubtasks")]
    additional_subtasks: Vec<PlannedSubtask>,
}

/// Accept `{"subtasks": [...]}` or a bare array
fn parse_plan(value: &serde_json::Value) -> Vec<PlannedSubtask> {
    let list = value.get("subtasks").cloned().unwrap_or_else(|| value.clone());
    let plan: Vec<PlannedSubtask> = serde_json::from_value(list).unwrap_or_default();
    plan.into_iter().filter(|p| !p.title.trim().is_empty()).collect()
}

/// Accept `{"decisions": [...]}` or a bare array
fn parse_decisions(value: &serde_json::Value) -> Vec<ReviewDecision> {
    let list = value.get("decisions").cloned().unwrap_or_else(|| value.clone());
    serde_json::from_value(list).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::SwarmEvent;
    use crate::llm::{ChatResponse, StreamChunk};
    use crate::project::VerifyReport;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    /// Chat client scripted with successes and failures
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<ChatResponse, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn remaining(&self) -> usize {
            self.script.lock().unwrap().len()
        }

        fn next(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".to_string())))
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.next(request)
        }

        async fn chat_stream(
            &self,
            request: ChatRequest,
            chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<ChatResponse, LlmError> {
            let response = self.next(request)?;
            if let Some(content) = &response.content {
                let _ = chunk_tx.send(StreamChunk::TextDelta(content.clone())).await;
            }
            Ok(response)
        }
    }

    fn text(reply: &str) -> Result<ChatResponse, LlmError> {
        Ok(ChatResponse {
            content: Some(reply.to_string()),
            ..Default::default()
        })
    }

    fn llm_failure() -> Result<ChatResponse, LlmError> {
        Err(LlmError::ApiError {
            status: 400,
            message: "bad request".to_string(),
        })
    }

    /// Verifier scripted with a sequence of outcomes
    struct ScriptedVerifier {
        outcomes: Mutex<VecDeque<VerifyReport>>,
        calls: AtomicUsize,
    }

    impl ScriptedVerifier {
        fn boxed(outcomes: Vec<VerifyReport>) -> Box<Self> {
            Box::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Verifier for ScriptedVerifier {
        async fn verify(&self, _root: &Path) -> VerifyReport {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| VerifyReport::passing("ok"))
        }
    }

    fn make_orchestrator(
        root: &Path,
        llm: Arc<dyn ChatClient>,
        verifier: Box<dyn Verifier>,
    ) -> (Orchestrator, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new(10_000));
        let ctx = ProjectContext::new(root.to_path_buf(), "build the demo project");
        let orchestrator = Orchestrator::new(
            ctx,
            SharedConfig::new(Config::default()),
            llm,
            bus.clone(),
            Arc::new(FileLockRegistry::new()),
            Arc::new(ToolExecutor::standard()),
            verifier,
        );
        (orchestrator, bus)
    }

    fn drain_topics(rx: &mut tokio::sync::broadcast::Receiver<SwarmEvent>) -> Vec<String> {
        let mut topics = Vec::new();
        while let Ok(event) = rx.try_recv() {
            topics.push(event.topic().to_string());
        }
        topics
    }

    const PLAN_ONE: &str = r#"{"subtasks": [{"title": "A", "description": "do A", "dependencies": []}]}"#;
    const DONE: &str = r#"{"status": "done", "summary": "built it"}"#;

    /// Subtask ids are fresh uuids, so a scripted reviewer cannot name
    /// them up front. An empty decision list lets worker statuses stand,
    /// which is the accept-everything path.
    fn accept_all_decisions(_n: usize) -> String {
        r#"{"decisions": []}"#.to_string()
    }

    #[tokio::test]
    async fn test_happy_path_single_subtask() {
        let temp = tempdir().unwrap();
        let llm = ScriptedClient::new(vec![
            text(PLAN_ONE),                    // planning
            text("Implemented A fully."),      // worker (no tool calls -> completed)
            text(&accept_all_decisions(1)),    // review
            text(DONE),                        // final review
        ]);
        let verifier = ScriptedVerifier::boxed(vec![VerifyReport::passing("all green")]);
        let (mut orchestrator, bus) = make_orchestrator(temp.path(), llm.clone(), verifier);
        let mut rx = bus.subscribe();

        let outcome = orchestrator.run().await.unwrap();

        assert_eq!(outcome, BuildOutcome::Done { summary: "built it".to_string() });
        assert_eq!(llm.remaining(), 0, "exactly plan + worker + review + final calls");
        assert!(orchestrator.context().subtasks.iter().all(|s| s.status == SubtaskStatus::Completed));

        let topics = drain_topics(&mut rx);
        assert!(topics.contains(&"orchestrator:plan".to_string()));
        assert!(topics.contains(&"subtask:assigned".to_string()));
        assert!(topics.contains(&"project:done".to_string()));
        assert!(!topics.contains(&"project:error".to_string()));

        // Checkpoint written
        assert!(temp.path().join(crate::task::CHECKPOINT_FILE).exists());
    }

    #[tokio::test]
    async fn test_dependency_chain_dispatches_in_order() {
        let temp = tempdir().unwrap();
        let plan = r#"{"subtasks": [
            {"title": "A", "description": "first", "dependencies": []},
            {"title": "B", "description": "second", "dependencies": ["A"]},
            {"title": "C", "description": "third", "dependencies": ["B"]}
        ]}"#;
        let llm = ScriptedClient::new(vec![
            text(plan),
            text("A done"),
            text(&accept_all_decisions(1)),
            text("B done"),
            text(&accept_all_decisions(1)),
            text("C done"),
            text(&accept_all_decisions(1)),
            text(DONE),
        ]);
        let verifier = ScriptedVerifier::boxed(vec![VerifyReport::passing("ok")]);
        let (mut orchestrator, _bus) = make_orchestrator(temp.path(), llm.clone(), verifier);

        let outcome = orchestrator.run().await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Done { .. }));

        // Worker requests are the ones that carry tools; their order must
        // be A, then B, then C - never overlapping batches.
        let worker_prompts: Vec<String> = llm
            .requests()
            .iter()
            .filter(|r| !r.tools.is_empty())
            .map(|r| r.messages[1].text().unwrap().to_string())
            .collect();
        assert_eq!(worker_prompts.len(), 3);
        assert!(worker_prompts[0].contains("Subtask: A"));
        assert!(worker_prompts[1].contains("Subtask: B"));
        assert!(worker_prompts[2].contains("Subtask: C"));
        // Completed siblings are visible to later subtasks
        assert!(worker_prompts[2].contains("B:"));
    }

    #[tokio::test]
    async fn test_revise_then_accept_feeds_feedback_and_counts_attempts() {
        let temp = tempdir().unwrap();
        // Subtask ids are fresh uuids, so the review replies are
        // placeholders that DynamicReviewClient rewrites with the id it
        // reads out of the review prompt.
        let scripted = ScriptedClient::new(vec![
            text(PLAN_ONE),
            text("first try"),
            text("__REVIEW_REVISE__"),
            text("second try"),
            text("__REVIEW_ACCEPT__"),
            text(DONE),
        ]);
        let llm = DynamicReviewClient::new(scripted.clone());
        let bus = Arc::new(EventBus::new(1000));
        let ctx = ProjectContext::new(temp.path().to_path_buf(), "demo");
        let mut orchestrator = Orchestrator::new(
            ctx,
            SharedConfig::new(Config::default()),
            llm,
            bus,
            Arc::new(FileLockRegistry::new()),
            Arc::new(ToolExecutor::standard()),
            ScriptedVerifier::boxed(vec![VerifyReport::passing("ok")]),
        );

        let outcome = orchestrator.run().await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Done { .. }));

        let subtask = &orchestrator.context().subtasks[0];
        assert_eq!(subtask.status, SubtaskStatus::Completed);
        assert_eq!(subtask.attempts, 2, "revise-then-accept is two attempts");

        // The retried worker prompt carried the reviewer feedback
        let worker_prompts: Vec<String> = scripted
            .requests()
            .iter()
            .filter(|r| !r.tools.is_empty())
            .map(|r| r.messages[1].text().unwrap().to_string())
            .collect();
        assert_eq!(worker_prompts.len(), 2);
        assert!(worker_prompts[1].contains("fix X"), "feedback must reach the retry");
    }

    /// Wraps a ScriptedClient, rewriting review placeholders with real ids
    #[derive(Clone)]
    struct DynamicReviewClient {
        inner: Arc<ScriptedClient>,
    }

    impl DynamicReviewClient {
        fn new(inner: Arc<ScriptedClient>) -> Arc<Self> {
            Arc::new(Self { inner })
        }
    }

    #[async_trait]
    impl ChatClient for DynamicReviewClient {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            let mut response = self.inner.chat(request.clone()).await?;
            if let Some(content) = &response.content {
                if content == "__REVIEW_REVISE__" || content == "__REVIEW_ACCEPT__" {
                    // Pull the subtask id out of the review prompt
                    let prompt = request.messages.last().and_then(|m| m.text()).unwrap_or("");
                    let id = prompt
                        .lines()
                        .find_map(|line| line.strip_prefix("subtask_id: "))
                        .unwrap_or("")
                        .to_string();
                    let verdict = if content == "__REVIEW_REVISE__" {
                        format!(r#"{{"decisions": [{{"subtask_id": "{}", "verdict": "revise", "feedback": "fix X"}}]}}"#, id)
                    } else {
                        format!(r#"{{"decisions": [{{"subtask_id": "{}", "verdict": "accept"}}]}}"#, id)
                    };
                    response.content = Some(verdict);
                }
            }
            Ok(response)
        }

        async fn chat_stream(
            &self,
            request: ChatRequest,
            chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<ChatResponse, LlmError> {
            self.inner.chat_stream(request, chunk_tx).await
        }
    }

    #[tokio::test]
    async fn test_exhausted_retries_terminates_with_error() {
        let temp = tempdir().unwrap();
        let llm = ScriptedClient::new(vec![
            text(PLAN_ONE),
            llm_failure(),                   // worker attempt 1
            text(&accept_all_decisions(0)),  // review of the failed batch
            llm_failure(),                   // worker attempt 2
            text(&accept_all_decisions(0)),
            llm_failure(),                   // worker attempt 3 -> failed at cap
            text(&accept_all_decisions(0)),
        ]);
        let verifier = ScriptedVerifier::boxed(vec![]);
        let (mut orchestrator, bus) = make_orchestrator(temp.path(), llm, verifier);
        let mut rx = bus.subscribe();

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::SubtasksFailed(_)));

        let subtask = &orchestrator.context().subtasks[0];
        assert_eq!(subtask.status, SubtaskStatus::Failed);
        assert_eq!(subtask.attempts, 3);

        let topics = drain_topics(&mut rx);
        assert!(topics.contains(&"project:error".to_string()));
    }

    #[tokio::test]
    async fn test_verifier_failure_plans_fix_and_reverifies() {
        let temp = tempdir().unwrap();
        let fix_plan = r#"{"subtasks": [{"title": "Fix tsc error", "description": "repair", "dependencies": []}]}"#;
        let llm = ScriptedClient::new(vec![
            text(PLAN_ONE),
            text("A done"),
            text(&accept_all_decisions(1)),
            text(fix_plan),                  // fix plan after failed verification
            text("fixed"),                   // fix worker
            text(&accept_all_decisions(1)),  // review
            text(DONE),                      // final review after second verification
        ]);
        let verifier = ScriptedVerifier::boxed(vec![
            VerifyReport::failing("tsc: error TS2304"),
            VerifyReport::passing("clean"),
        ]);
        let (mut orchestrator, bus) = make_orchestrator(temp.path(), llm.clone(), verifier);
        let mut rx = bus.subscribe();

        let outcome = orchestrator.run().await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Done { .. }));
        assert_eq!(orchestrator.context().subtasks.len(), 2, "fix subtask was appended");

        // The fix-plan request saw the verifier report
        let fix_request = llm
            .requests()
            .iter()
            .find(|r| {
                r.messages
                    .last()
                    .and_then(|m| m.text())
                    .map(|t| t.contains("verification failed"))
                    .unwrap_or(false)
            })
            .cloned();
        assert!(fix_request.is_some());
        assert!(
            fix_request
                .unwrap()
                .messages
                .last()
                .unwrap()
                .text()
                .unwrap()
                .contains("TS2304")
        );

        let topics = drain_topics(&mut rx);
        assert!(topics.contains(&"project:done".to_string()));
    }

    #[tokio::test]
    async fn test_empty_plan_aborts() {
        let temp = tempdir().unwrap();
        let llm = ScriptedClient::new(vec![text(r#"{"subtasks": []}"#)]);
        let verifier = ScriptedVerifier::boxed(vec![]);
        let (mut orchestrator, bus) = make_orchestrator(temp.path(), llm, verifier);
        let mut rx = bus.subscribe();

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::EmptyPlan));
        assert!(drain_topics(&mut rx).contains(&"project:error".to_string()));
    }

    #[tokio::test]
    async fn test_circular_dependencies_deadlock() {
        let temp = tempdir().unwrap();
        let plan = r#"{"subtasks": [
            {"title": "A", "description": "a", "dependencies": ["B"]},
            {"title": "B", "description": "b", "dependencies": ["A"]}
        ]}"#;
        let llm = ScriptedClient::new(vec![text(plan)]);
        let verifier = ScriptedVerifier::boxed(vec![]);
        let (mut orchestrator, bus) = make_orchestrator(temp.path(), llm, verifier);
        let mut rx = bus.subscribe();

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Deadlock));
        assert!(drain_topics(&mut rx).contains(&"project:error".to_string()));
    }

    #[tokio::test]
    async fn test_json_reminder_retry() {
        let temp = tempdir().unwrap();
        let llm = ScriptedClient::new(vec![
            text("Sure! I will plan the subtasks now."), // not JSON
            text(PLAN_ONE),                              // after the reminder
            text("A done"),
            text(&accept_all_decisions(1)),
            text(DONE),
        ]);
        let verifier = ScriptedVerifier::boxed(vec![VerifyReport::passing("ok")]);
        let (mut orchestrator, _bus) = make_orchestrator(temp.path(), llm.clone(), verifier);

        let outcome = orchestrator.run().await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Done { .. }));

        // The second planning request must carry the reminder message
        let requests = llm.requests();
        let reminder = requests[1]
            .messages
            .iter()
            .filter_map(|m| m.text())
            .any(|t| t.contains("was not valid JSON"));
        assert!(reminder, "reminder message must be on the conversation");
    }

    #[tokio::test]
    async fn test_final_review_needs_more_appends_subtasks() {
        let temp = tempdir().unwrap();
        let needs_more = r#"{"status": "needs_more", "summary": "missing docs", "additionalSubtasks": [
            {"title": "Write docs", "description": "README", "dependencies": []}
        ]}"#;
        let llm = ScriptedClient::new(vec![
            text(PLAN_ONE),
            text("A done"),
            text(&accept_all_decisions(1)),
            text(needs_more),                // final review round 1
            text("docs written"),
            text(&accept_all_decisions(1)),
            text(DONE),                      // final review round 2
        ]);
        let verifier = ScriptedVerifier::boxed(vec![
            VerifyReport::passing("ok"),
            VerifyReport::passing("ok"),
        ]);
        let (mut orchestrator, _bus) = make_orchestrator(temp.path(), llm, verifier);

        let outcome = orchestrator.run().await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Done { .. }));
        assert_eq!(orchestrator.context().subtasks.len(), 2);
        assert!(orchestrator.context().subtasks.iter().any(|s| s.title == "Write docs"));
    }

    #[tokio::test]
    async fn test_unusable_review_reply_is_skipped_and_build_continues() {
        let temp = tempdir().unwrap();
        // The review round burns the initial call plus both JSON retries on
        // prose; the round is skipped, the worker's completed status
        // stands, and the build still finishes.
        let llm = ScriptedClient::new(vec![
            text(PLAN_ONE),
            text("A done"),
            text("The work looks good to me overall."), // review, not JSON
            text("As I said, it looks fine."),          // after reminder 1
            text("Fine. Ship it."),                     // after reminder 2
            text(DONE),                                 // final review
        ]);
        let verifier = ScriptedVerifier::boxed(vec![VerifyReport::passing("ok")]);
        let (mut orchestrator, bus) = make_orchestrator(temp.path(), llm.clone(), verifier);
        let mut rx = bus.subscribe();

        let outcome = orchestrator.run().await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Done { .. }));
        assert_eq!(llm.remaining(), 0);

        let subtask = &orchestrator.context().subtasks[0];
        assert_eq!(subtask.status, SubtaskStatus::Completed, "worker status stands");
        assert_eq!(subtask.attempts, 1);

        // Both reminders went onto the review conversation
        let reminders = llm
            .requests()
            .last()
            .unwrap()
            .messages
            .iter()
            .filter_map(|m| m.text())
            .filter(|t| t.contains("was not valid JSON"))
            .count();
        assert_eq!(reminders, 2);

        // Skipped review reports zero decisions; the build never errors
        let topics = drain_topics(&mut rx);
        assert!(topics.contains(&"orchestrator:review".to_string()));
        assert!(topics.contains(&"project:done".to_string()));
        assert!(!topics.contains(&"project:error".to_string()));
    }

    #[tokio::test]
    async fn test_final_review_needs_more_without_subtasks_is_done() {
        let temp = tempdir().unwrap();
        let needs_more_empty =
            r#"{"status": "needs_more", "summary": "nothing actionable", "additionalSubtasks": []}"#;
        let llm = ScriptedClient::new(vec![
            text(PLAN_ONE),
            text("A done"),
            text(&accept_all_decisions(1)),
            text(needs_more_empty),
        ]);
        let verifier = ScriptedVerifier::boxed(vec![VerifyReport::passing("ok")]);
        let (mut orchestrator, bus) = make_orchestrator(temp.path(), llm.clone(), verifier);
        let mut rx = bus.subscribe();

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(
            outcome,
            BuildOutcome::Done {
                summary: "nothing actionable".to_string()
            },
            "needs_more with no subtasks completes instead of looping"
        );
        assert_eq!(llm.remaining(), 0, "no further planning or worker calls");
        assert_eq!(orchestrator.context().subtasks.len(), 1);

        let topics = drain_topics(&mut rx);
        assert!(topics.contains(&"project:done".to_string()));
    }

    #[tokio::test]
    async fn test_resume_skips_planning() {
        let temp = tempdir().unwrap();
        let llm = ScriptedClient::new(vec![
            text("A done"),                  // worker for the restored pending subtask
            text(&accept_all_decisions(1)),
            text(DONE),
        ]);
        let verifier = ScriptedVerifier::boxed(vec![VerifyReport::passing("ok")]);
        let bus = Arc::new(EventBus::new(1000));

        let mut ctx = ProjectContext::new(temp.path().to_path_buf(), "demo");
        ctx.subtasks.push(crate::task::Subtask::new("A", "restored"));

        let mut orchestrator = Orchestrator::new(
            ctx,
            SharedConfig::new(Config::default()),
            llm.clone(),
            bus,
            Arc::new(FileLockRegistry::new()),
            Arc::new(ToolExecutor::standard()),
            verifier,
        );

        let outcome = orchestrator.run().await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Done { .. }));

        // First LLM call is the worker, not a planning request; the
        // conversation starts with the resume marker.
        let requests = llm.requests();
        assert!(!requests[0].tools.is_empty(), "first call is a worker call");
        let resumed_marker = requests
            .iter()
            .flat_map(|r| r.messages.iter())
            .filter_map(|m| m.text())
            .any(|t| t.contains("[RESUMED FROM CHECKPOINT]"));
        assert!(resumed_marker);
    }

    #[tokio::test]
    async fn test_continuation_adds_subtasks_without_rerunning_completed() {
        let temp = tempdir().unwrap();
        let llm = ScriptedClient::new(vec![
            text(PLAN_ONE),
            text("A done"),
            text(&accept_all_decisions(1)),
            text(DONE),
            // continuation
            text(r#"{"subtasks": [{"title": "Add login", "description": "auth", "dependencies": []}]}"#),
            text("login added"),
            text(&accept_all_decisions(1)),
            text(DONE),
        ]);
        let verifier = ScriptedVerifier::boxed(vec![
            VerifyReport::passing("ok"),
            VerifyReport::passing("ok"),
        ]);
        let (mut orchestrator, _bus) = make_orchestrator(temp.path(), llm.clone(), verifier);

        orchestrator.run().await.unwrap();
        let outcome = orchestrator.continue_build("add a login page").await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Done { .. }));

        assert_eq!(orchestrator.context().subtasks.len(), 2);

        // Only two worker calls total: A once, login once
        let worker_calls = llm.requests().iter().filter(|r| !r.tools.is_empty()).count();
        assert_eq!(worker_calls, 2);

        // Continuation marker present
        let continuation = llm
            .requests()
            .iter()
            .flat_map(|r| r.messages.clone())
            .filter_map(|m| m.text().map(|t| t.to_string()))
            .any(|t| t.starts_with("[CONTINUATION]"));
        assert!(continuation);
    }

    #[tokio::test]
    async fn test_iteration_budget_exhaustion_returns_max_iterations() {
        let temp = tempdir().unwrap();
        // Shrink the iteration budget to keep the script small
        let config = SharedConfig::new(Config::default());
        config.update(|c| c.limits.max_orchestrator_iterations = 2);

        // Worker always completes, reviewer always revises
        let llm = DynamicReviseForeverClient::new();
        let bus = Arc::new(EventBus::new(1000));
        let ctx = ProjectContext::new(temp.path().to_path_buf(), "demo");
        let mut orchestrator = Orchestrator::new(
            ctx,
            config,
            llm,
            bus,
            Arc::new(FileLockRegistry::new()),
            Arc::new(ToolExecutor::standard()),
            ScriptedVerifier::boxed(vec![]),
        );

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome, BuildOutcome::MaxIterations);
        assert!(temp.path().join(crate::task::CHECKPOINT_FILE).exists());
    }

    /// Plans one subtask, completes it, then revises it forever
    struct DynamicReviseForeverClient {
        calls: AtomicUsize,
    }

    impl DynamicReviseForeverClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatClient for DynamicReviseForeverClient {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let prompt = request.messages.last().and_then(|m| m.text()).unwrap_or("");
            let content = if prompt.contains("Break the task into subtasks") {
                r#"{"subtasks": [{"title": "A", "description": "do A", "dependencies": []}]}"#.to_string()
            } else if prompt.contains("Review each result") || prompt.contains("Workers finished a batch") {
                let id = prompt
                    .lines()
                    .find_map(|line| line.strip_prefix("subtask_id: "))
                    .unwrap_or("")
                    .to_string();
                // Never at the attempt cap with a high default, so this
                // keeps the loop spinning
                format!(r#"{{"decisions": [{{"subtask_id": "{}", "verdict": "revise", "feedback": "again"}}]}}"#, id)
            } else {
                "unused".to_string()
            };
            Ok(ChatResponse {
                content: Some(content),
                ..Default::default()
            })
        }

        async fn chat_stream(
            &self,
            _request: ChatRequest,
            chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<ChatResponse, LlmError> {
            let _ = chunk_tx.send(StreamChunk::TextDelta("working".to_string())).await;
            Ok(ChatResponse {
                content: Some("A done".to_string()),
                ..Default::default()
            })
        }
    }
}
