//! Prompt templates and rendering
//!
//! Templates are embedded handlebars sources; [`Prompts`] registers them
//! once and renders with JSON context values.

pub mod embedded;

use eyre::{Context, Result};
use handlebars::Handlebars;
use serde_json::Value;

/// Registered prompt templates
pub struct Prompts {
    registry: Handlebars<'static>,
}

/// Template names
pub const ORCHESTRATOR_SYSTEM: &str = "orchestrator-system";
pub const PLANNING: &str = "planning";
pub const REVIEW: &str = "review";
pub const FIX_PLAN: &str = "fix-plan";
pub const FINAL_REVIEW: &str = "final-review";
pub const CONTINUATION: &str = "continuation";
pub const RESUME: &str = "resume";
pub const SUMMARIZE_SYSTEM: &str = "summarize-system";
pub const WORKER_SYSTEM: &str = "worker-system";
pub const WORKER_TASK: &str = "worker-task";

impl Prompts {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);

        let templates = [
            (ORCHESTRATOR_SYSTEM, embedded::ORCHESTRATOR_SYSTEM),
            (PLANNING, embedded::PLANNING),
            (REVIEW, embedded::REVIEW),
            (FIX_PLAN, embedded::FIX_PLAN),
            (FINAL_REVIEW, embedded::FINAL_REVIEW),
            (CONTINUATION, embedded::CONTINUATION),
            (RESUME, embedded::RESUME),
            (SUMMARIZE_SYSTEM, embedded::SUMMARIZE_SYSTEM),
            (WORKER_SYSTEM, embedded::WORKER_SYSTEM),
            (WORKER_TASK, embedded::WORKER_TASK),
        ];

        for (name, source) in templates {
            registry
                .register_template_string(name, source)
                .expect("embedded template must parse");
        }

        Self { registry }
    }

    /// Render a template with the given context
    pub fn render(&self, name: &str, data: &Value) -> Result<String> {
        self.registry
            .render(name, data)
            .context(format!("Failed to render prompt template '{}'", name))
    }
}

impl Default for Prompts {
    fn default() -> Self {
        Self::new()
    }
}
