//! Task manager - mutation rules for the subtask dependency graph
//!
//! The task manager is the only component that mutates subtasks, and only
//! between batch execution and the next dispatch, never while workers run.
//! It ingests plans (resolving dependency tokens the model may phrase as
//! titles or ordinals), computes the ready set, and applies worker results
//! and review verdicts under the attempt cap.

use tracing::{debug, warn};

use super::subtask::{
    PlannedSubtask, ProjectContext, RESULT_CAP, ReviewDecision, ReviewVerdict, Subtask, SubtaskStatus,
    WorkerResult, WorkerStatus,
};

/// Owns the subtask mutation rules; holds no subtask state itself
pub struct TaskManager {
    max_attempts: u32,
}

impl TaskManager {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Ingest a plan, assigning fresh ids and resolving dependency tokens
    ///
    /// Each token is resolved in order against: another title within the
    /// same plan (excluding self), an existing subtask title in the
    /// context, then a 1-based ordinal into the plan. Unresolved tokens are
    /// dropped, so the model can speak by title or by number without
    /// breaking the graph. Returns the ids of the new subtasks.
    pub fn add_subtasks_from_plan(&self, ctx: &mut ProjectContext, plan: &[PlannedSubtask]) -> Vec<String> {
        let new_ids: Vec<String> = plan
            .iter()
            .map(|p| {
                let subtask = Subtask::new(p.title.trim(), p.description.trim());
                let id = subtask.id.clone();
                ctx.subtasks.push(subtask);
                id
            })
            .collect();

        // ctx.subtasks now ends with the new entries; existing ones precede
        let existing_count = ctx.subtasks.len() - plan.len();

        for (i, planned) in plan.iter().enumerate() {
            let mut resolved = Vec::new();
            for token in &planned.dependencies {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }

                // (a) another title within this plan
                if let Some(j) = plan
                    .iter()
                    .position(|other| other.title.trim().eq_ignore_ascii_case(token))
                    .filter(|&j| j != i)
                {
                    resolved.push(new_ids[j].clone());
                    continue;
                }

                // (b) an existing subtask title in the context
                if let Some(existing) = ctx.subtasks[..existing_count]
                    .iter()
                    .find(|s| s.title.eq_ignore_ascii_case(token))
                {
                    resolved.push(existing.id.clone());
                    continue;
                }

                // (c) a 1-based ordinal into this plan
                if let Ok(ordinal) = token.parse::<usize>()
                    && ordinal >= 1
                    && ordinal <= plan.len()
                    && ordinal - 1 != i
                {
                    resolved.push(new_ids[ordinal - 1].clone());
                    continue;
                }

                debug!(token, title = %planned.title, "add_subtasks_from_plan: dropping unresolved dependency");
            }

            resolved.dedup();
            if let Some(subtask) = ctx.subtask_mut(&new_ids[i]) {
                subtask.dependencies = resolved;
            }
        }

        debug!(added = new_ids.len(), total = ctx.subtasks.len(), "add_subtasks_from_plan");
        new_ids
    }

    /// Ids of subtasks that are pending with every dependency completed
    ///
    /// Dependency ids that do not resolve to an existing subtask count as
    /// not completed, so a subtask with an unknown dependency never becomes
    /// ready.
    pub fn ready_subtasks(&self, ctx: &ProjectContext) -> Vec<String> {
        ctx.subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Pending)
            .filter(|s| {
                s.dependencies.iter().all(|dep| {
                    ctx.subtask(dep)
                        .map(|d| d.status == SubtaskStatus::Completed)
                        .unwrap_or(false)
                })
            })
            .map(|s| s.id.clone())
            .collect()
    }

    /// Apply one worker result
    ///
    /// Every settled run counts as one attempt, successful or not. A
    /// completed result tentatively marks the subtask completed (review may
    /// still send it back); a failed result re-queues it with the error as
    /// feedback, or fails it permanently at the attempt cap. Artifacts are
    /// appended even from failed runs.
    pub fn apply_worker_result(&self, ctx: &mut ProjectContext, result: &WorkerResult) {
        let cap = self.max_attempts;
        let Some(subtask) = ctx.subtask_mut(&result.subtask_id) else {
            warn!(subtask_id = %result.subtask_id, "apply_worker_result: unknown subtask");
            return;
        };

        subtask.result = Some(truncate_chars(&result.summary, RESULT_CAP));
        subtask.artifacts.extend(result.artifacts.iter().cloned());
        subtask.attempts += 1;

        match result.status {
            WorkerStatus::Completed => {
                subtask.status = SubtaskStatus::Completed;
            }
            WorkerStatus::Failed => {
                if subtask.attempts >= cap {
                    subtask.status = SubtaskStatus::Failed;
                } else {
                    subtask.status = SubtaskStatus::Pending;
                    subtask.feedback = result.error.clone().or_else(|| Some("worker failed".to_string()));
                }
            }
        }

        debug!(
            subtask_id = %result.subtask_id,
            status = %subtask.status,
            attempts = subtask.attempts,
            "apply_worker_result"
        );
    }

    /// Apply the reviewer's decisions
    ///
    /// `accept` finalizes completion. `revise` re-queues with feedback; the
    /// run that prompted the revision was already counted when its result
    /// was applied, so no extra attempt is charged, but a subtask already
    /// at the attempt cap fails instead of going back to pending. `reassign`
    /// re-queues and clears the worker without touching attempts - the work
    /// is being moved, not retried.
    pub fn apply_review_decisions(&self, ctx: &mut ProjectContext, decisions: &[ReviewDecision]) {
        for decision in decisions {
            let cap = self.max_attempts;
            let Some(subtask) = ctx.subtask_mut(&decision.subtask_id) else {
                warn!(subtask_id = %decision.subtask_id, "apply_review_decisions: unknown subtask");
                continue;
            };

            match decision.verdict {
                ReviewVerdict::Accept => {
                    subtask.status = SubtaskStatus::Completed;
                }
                ReviewVerdict::Revise => {
                    subtask.feedback = decision.feedback.clone();
                    if subtask.attempts >= cap {
                        subtask.status = SubtaskStatus::Failed;
                    } else {
                        subtask.status = SubtaskStatus::Pending;
                    }
                }
                ReviewVerdict::Reassign => {
                    subtask.assigned_worker = None;
                    subtask.feedback = decision.feedback.clone();
                    // No attempt is charged, but nothing goes back to
                    // pending once the cap is reached.
                    if subtask.attempts >= cap {
                        subtask.status = SubtaskStatus::Failed;
                    } else {
                        subtask.status = SubtaskStatus::Pending;
                    }
                }
            }

            debug!(
                subtask_id = %decision.subtask_id,
                verdict = ?decision.verdict,
                status = %subtask.status,
                "apply_review_decisions"
            );
        }
    }

    /// True iff every subtask is completed
    pub fn all_completed(&self, ctx: &ProjectContext) -> bool {
        !ctx.subtasks.is_empty() && ctx.subtasks.iter().all(|s| s.status == SubtaskStatus::Completed)
    }

    /// True iff at least one subtask failed permanently (at the attempt cap)
    pub fn any_failed(&self, ctx: &ProjectContext) -> bool {
        ctx.subtasks
            .iter()
            .any(|s| s.status == SubtaskStatus::Failed && s.attempts >= self.max_attempts)
    }

    /// Human-readable multi-line status, used for display and as prompt
    /// context
    pub fn status_summary(&self, ctx: &ProjectContext) -> String {
        let total = ctx.subtasks.len();
        let count = |status: SubtaskStatus| ctx.subtasks.iter().filter(|s| s.status == status).count();

        let mut out = format!(
            "Subtasks: {}/{} completed, {} in progress, {} pending, {} failed\n",
            count(SubtaskStatus::Completed),
            total,
            count(SubtaskStatus::InProgress),
            count(SubtaskStatus::Pending),
            count(SubtaskStatus::Failed),
        );

        for subtask in &ctx.subtasks {
            out.push_str(&format!(
                "- [{}] {} ({}) attempts: {}",
                subtask.status, subtask.title, subtask.id, subtask.attempts
            ));
            if !subtask.artifacts.is_empty() {
                out.push_str(&format!(", artifacts: {}", subtask.artifacts.join(", ")));
            }
            if let Some(feedback) = &subtask.feedback
                && subtask.status == SubtaskStatus::Pending
            {
                out.push_str(&format!("\n    feedback: {}", truncate_chars(feedback, 200)));
            }
            out.push('\n');
        }

        out
    }
}

fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        text.to_string()
    } else {
        text.chars().take(cap).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ctx() -> ProjectContext {
        ProjectContext::new(PathBuf::from("/tmp/p"), "build it")
    }

    fn planned(title: &str, deps: &[&str]) -> PlannedSubtask {
        PlannedSubtask {
            title: title.to_string(),
            description: format!("{} description", title),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_plan_resolves_titles_within_plan() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();

        let ids = manager.add_subtasks_from_plan(
            &mut ctx,
            &[planned("Setup", &[]), planned("Build", &["Setup"]), planned("Test", &["Build"])],
        );

        assert_eq!(ids.len(), 3);
        assert_eq!(ctx.subtask(&ids[1]).unwrap().dependencies, vec![ids[0].clone()]);
        assert_eq!(ctx.subtask(&ids[2]).unwrap().dependencies, vec![ids[1].clone()]);
    }

    #[test]
    fn test_plan_resolves_titles_case_insensitively() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();

        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("Setup DB", &[]), planned("Load", &["setup db"])]);
        assert_eq!(ctx.subtask(&ids[1]).unwrap().dependencies, vec![ids[0].clone()]);
    }

    #[test]
    fn test_plan_resolves_existing_titles() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();

        let first = manager.add_subtasks_from_plan(&mut ctx, &[planned("Bootstrap", &[])]);
        let second = manager.add_subtasks_from_plan(&mut ctx, &[planned("Extend", &["Bootstrap"])]);

        assert_eq!(ctx.subtask(&second[0]).unwrap().dependencies, vec![first[0].clone()]);
    }

    #[test]
    fn test_plan_resolves_ordinals() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();

        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("A", &[]), planned("B", &["1"])]);
        assert_eq!(ctx.subtask(&ids[1]).unwrap().dependencies, vec![ids[0].clone()]);
    }

    #[test]
    fn test_plan_drops_unresolved_and_self_tokens() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();

        let ids = manager.add_subtasks_from_plan(
            &mut ctx,
            &[planned("A", &["A", "No Such Task", "99", "0"]), planned("B", &[])],
        );
        assert!(ctx.subtask(&ids[0]).unwrap().dependencies.is_empty());
    }

    #[test]
    fn test_ready_requires_completed_dependencies() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();
        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("A", &[]), planned("B", &["A"])]);

        assert_eq!(manager.ready_subtasks(&ctx), vec![ids[0].clone()]);

        ctx.subtask_mut(&ids[0]).unwrap().status = SubtaskStatus::Completed;
        assert_eq!(manager.ready_subtasks(&ctx), vec![ids[1].clone()]);
    }

    #[test]
    fn test_unknown_dependency_blocks_readiness() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();
        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("A", &[])]);
        // Simulate a stale id that resolves to nothing
        ctx.subtask_mut(&ids[0]).unwrap().dependencies = vec!["ghost".to_string()];

        assert!(manager.ready_subtasks(&ctx).is_empty());
    }

    #[test]
    fn test_worker_result_completed_counts_attempt() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();
        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("A", &[])]);

        manager.apply_worker_result(
            &mut ctx,
            &WorkerResult::completed(&ids[0], "did the thing", vec!["src/a.rs".to_string()]),
        );

        let subtask = ctx.subtask(&ids[0]).unwrap();
        assert_eq!(subtask.status, SubtaskStatus::Completed);
        assert_eq!(subtask.attempts, 1);
        assert_eq!(subtask.artifacts, vec!["src/a.rs"]);
        assert_eq!(subtask.result.as_deref(), Some("did the thing"));
    }

    #[test]
    fn test_worker_result_failure_requeues_with_feedback() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();
        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("A", &[])]);

        manager.apply_worker_result(&mut ctx, &WorkerResult::failed(&ids[0], "compile error", vec![]));

        let subtask = ctx.subtask(&ids[0]).unwrap();
        assert_eq!(subtask.status, SubtaskStatus::Pending);
        assert_eq!(subtask.attempts, 1);
        assert_eq!(subtask.feedback.as_deref(), Some("compile error"));
    }

    #[test]
    fn test_worker_failures_exhaust_into_failed() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();
        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("A", &[])]);

        for _ in 0..3 {
            manager.apply_worker_result(&mut ctx, &WorkerResult::failed(&ids[0], "boom", vec![]));
        }

        let subtask = ctx.subtask(&ids[0]).unwrap();
        assert_eq!(subtask.status, SubtaskStatus::Failed);
        assert_eq!(subtask.attempts, 3);
        assert!(manager.any_failed(&ctx));
    }

    #[test]
    fn test_result_truncated_at_storage_time() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();
        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("A", &[])]);

        let long = "x".repeat(RESULT_CAP + 500);
        manager.apply_worker_result(&mut ctx, &WorkerResult::completed(&ids[0], long, vec![]));

        assert_eq!(ctx.subtask(&ids[0]).unwrap().result.as_ref().unwrap().len(), RESULT_CAP);
    }

    #[test]
    fn test_artifacts_kept_from_failed_runs() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();
        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("A", &[])]);

        manager.apply_worker_result(
            &mut ctx,
            &WorkerResult::failed(&ids[0], "half done", vec!["partial.rs".to_string()]),
        );
        manager.apply_worker_result(
            &mut ctx,
            &WorkerResult::completed(&ids[0], "done", vec!["full.rs".to_string()]),
        );

        assert_eq!(ctx.subtask(&ids[0]).unwrap().artifacts, vec!["partial.rs", "full.rs"]);
    }

    #[test]
    fn test_revise_then_accept_counts_two_attempts() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();
        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("A", &[])]);

        manager.apply_worker_result(&mut ctx, &WorkerResult::completed(&ids[0], "v1", vec![]));
        manager.apply_review_decisions(
            &mut ctx,
            &[ReviewDecision {
                subtask_id: ids[0].clone(),
                verdict: ReviewVerdict::Revise,
                feedback: Some("fix X".to_string()),
            }],
        );

        let subtask = ctx.subtask(&ids[0]).unwrap();
        assert_eq!(subtask.status, SubtaskStatus::Pending);
        assert_eq!(subtask.feedback.as_deref(), Some("fix X"));
        assert_eq!(subtask.attempts, 1);

        manager.apply_worker_result(&mut ctx, &WorkerResult::completed(&ids[0], "v2", vec![]));
        manager.apply_review_decisions(
            &mut ctx,
            &[ReviewDecision {
                subtask_id: ids[0].clone(),
                verdict: ReviewVerdict::Accept,
                feedback: None,
            }],
        );

        let subtask = ctx.subtask(&ids[0]).unwrap();
        assert_eq!(subtask.status, SubtaskStatus::Completed);
        assert_eq!(subtask.attempts, 2);
    }

    #[test]
    fn test_revise_at_cap_fails_instead_of_requeueing() {
        let manager = TaskManager::new(2);
        let mut ctx = ctx();
        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("A", &[])]);

        manager.apply_worker_result(&mut ctx, &WorkerResult::failed(&ids[0], "e1", vec![]));
        manager.apply_worker_result(&mut ctx, &WorkerResult::completed(&ids[0], "v2", vec![]));
        assert_eq!(ctx.subtask(&ids[0]).unwrap().attempts, 2);

        manager.apply_review_decisions(
            &mut ctx,
            &[ReviewDecision {
                subtask_id: ids[0].clone(),
                verdict: ReviewVerdict::Revise,
                feedback: Some("still wrong".to_string()),
            }],
        );

        assert_eq!(ctx.subtask(&ids[0]).unwrap().status, SubtaskStatus::Failed);
    }

    #[test]
    fn test_reassign_clears_worker_and_keeps_attempts() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();
        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("A", &[])]);

        ctx.subtask_mut(&ids[0]).unwrap().assigned_worker = Some(1);
        manager.apply_worker_result(&mut ctx, &WorkerResult::completed(&ids[0], "v1", vec![]));
        let attempts_before = ctx.subtask(&ids[0]).unwrap().attempts;

        manager.apply_review_decisions(
            &mut ctx,
            &[ReviewDecision {
                subtask_id: ids[0].clone(),
                verdict: ReviewVerdict::Reassign,
                feedback: Some("give it to someone else".to_string()),
            }],
        );

        let subtask = ctx.subtask(&ids[0]).unwrap();
        assert_eq!(subtask.status, SubtaskStatus::Pending);
        assert!(subtask.assigned_worker.is_none());
        assert_eq!(subtask.attempts, attempts_before);
    }

    #[test]
    fn test_all_completed_and_empty_context() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();
        assert!(!manager.all_completed(&ctx), "empty context is not complete");

        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("A", &[])]);
        assert!(!manager.all_completed(&ctx));

        ctx.subtask_mut(&ids[0]).unwrap().status = SubtaskStatus::Completed;
        assert!(manager.all_completed(&ctx));
    }

    #[test]
    fn test_status_summary_mentions_counts_and_titles() {
        let manager = TaskManager::new(3);
        let mut ctx = ctx();
        let ids = manager.add_subtasks_from_plan(&mut ctx, &[planned("Parse config", &[]), planned("Emit code", &["1"])]);
        ctx.subtask_mut(&ids[0]).unwrap().status = SubtaskStatus::Completed;

        let summary = manager.status_summary(&ctx);
        assert!(summary.contains("1/2 completed"));
        assert!(summary.contains("Parse config"));
        assert!(summary.contains("Emit code"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// Random operation against the task manager
        #[derive(Debug, Clone)]
        enum Op {
            Plan(Vec<(String, Vec<String>)>),
            WorkerCompleted(usize, Vec<String>),
            WorkerFailed(usize),
            Review(usize, ReviewVerdict),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                proptest::collection::vec(("[a-d]{1,4}", proptest::collection::vec("[a-d1-3]{1,4}", 0..3)), 1..4)
                    .prop_map(Op::Plan),
                (0usize..8, proptest::collection::vec("[a-z]{1,6}", 0..3)).prop_map(|(i, a)| Op::WorkerCompleted(i, a)),
                (0usize..8).prop_map(Op::WorkerFailed),
                (
                    0usize..8,
                    prop_oneof![
                        Just(ReviewVerdict::Accept),
                        Just(ReviewVerdict::Revise),
                        Just(ReviewVerdict::Reassign)
                    ]
                )
                    .prop_map(|(i, v)| Op::Review(i, v)),
            ]
        }

        proptest! {
            #[test]
            fn attempts_never_exceed_cap_while_unfailed(ops in proptest::collection::vec(op_strategy(), 1..40)) {
                let manager = TaskManager::new(3);
                let mut ctx = ProjectContext::new(PathBuf::from("/tmp/p"), "prop");

                for op in ops {
                    match op {
                        Op::Plan(entries) => {
                            let plan: Vec<PlannedSubtask> = entries
                                .into_iter()
                                .map(|(title, dependencies)| PlannedSubtask {
                                    title,
                                    description: String::new(),
                                    dependencies,
                                })
                                .collect();
                            manager.add_subtasks_from_plan(&mut ctx, &plan);
                        }
                        Op::WorkerCompleted(i, artifacts) => {
                            if let Some(subtask) = ctx.subtasks.get(i % ctx.subtasks.len().max(1)) {
                                let result = WorkerResult::completed(subtask.id.clone(), "ok", artifacts);
                                manager.apply_worker_result(&mut ctx, &result);
                            }
                        }
                        Op::WorkerFailed(i) => {
                            if let Some(subtask) = ctx.subtasks.get(i % ctx.subtasks.len().max(1)) {
                                let result = WorkerResult::failed(subtask.id.clone(), "err", vec![]);
                                manager.apply_worker_result(&mut ctx, &result);
                            }
                        }
                        Op::Review(i, verdict) => {
                            if let Some(subtask) = ctx.subtasks.get(i % ctx.subtasks.len().max(1)) {
                                let decision = ReviewDecision {
                                    subtask_id: subtask.id.clone(),
                                    verdict,
                                    feedback: Some("note".to_string()),
                                };
                                manager.apply_review_decisions(&mut ctx, &[decision]);
                            }
                        }
                    }

                    // Invariant: nothing sits at or beyond the cap unless it
                    // is failed or survived as completed.
                    for subtask in &ctx.subtasks {
                        if subtask.status == SubtaskStatus::Pending || subtask.status == SubtaskStatus::InProgress {
                            prop_assert!(subtask.attempts < manager.max_attempts(),
                                "subtask {} pending with attempts {}", subtask.id, subtask.attempts);
                        }
                    }

                    // Invariant: ready set is exactly pending with all known deps completed
                    let ready = manager.ready_subtasks(&ctx);
                    for subtask in &ctx.subtasks {
                        let expected = subtask.status == SubtaskStatus::Pending
                            && subtask.dependencies.iter().all(|d| {
                                ctx.subtask(d).map(|s| s.status == SubtaskStatus::Completed).unwrap_or(false)
                            });
                        prop_assert_eq!(ready.contains(&subtask.id), expected);
                    }
                }
            }

            #[test]
            fn artifacts_never_shrink(ops in proptest::collection::vec(op_strategy(), 1..30)) {
                let manager = TaskManager::new(3);
                let mut ctx = ProjectContext::new(PathBuf::from("/tmp/p"), "prop");
                manager.add_subtasks_from_plan(&mut ctx, &[PlannedSubtask {
                    title: "seed".to_string(),
                    description: String::new(),
                    dependencies: vec![],
                }]);

                let mut lengths: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

                for op in ops {
                    match op {
                        Op::Plan(_) => {}
                        Op::WorkerCompleted(i, artifacts) => {
                            let idx = i % ctx.subtasks.len();
                            let id = ctx.subtasks[idx].id.clone();
                            manager.apply_worker_result(&mut ctx, &WorkerResult::completed(id, "ok", artifacts));
                        }
                        Op::WorkerFailed(i) => {
                            let idx = i % ctx.subtasks.len();
                            let id = ctx.subtasks[idx].id.clone();
                            manager.apply_worker_result(&mut ctx, &WorkerResult::failed(id, "err", vec!["kept.rs".to_string()]));
                        }
                        Op::Review(i, verdict) => {
                            let idx = i % ctx.subtasks.len();
                            let id = ctx.subtasks[idx].id.clone();
                            manager.apply_review_decisions(&mut ctx, &[ReviewDecision {
                                subtask_id: id,
                                verdict,
                                feedback: None,
                            }]);
                        }
                    }

                    for subtask in &ctx.subtasks {
                        let previous = lengths.entry(subtask.id.clone()).or_insert(0);
                        prop_assert!(subtask.artifacts.len() >= *previous, "artifacts shrank on {}", subtask.id);
                        *previous = subtask.artifacts.len();
                    }
                }
            }
        }
    }
}
