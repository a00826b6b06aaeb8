//! Prompt rendering for classification, planning and reflection.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{ActionKind, ActionOutput, ActionRecord, ExecutionState};
use crate::io::tools::truncate_output;

const CLASSIFY_TEMPLATE: &str = include_str!("prompts/classify.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const REFLECT_TEMPLATE: &str = include_str!("prompts/reflect.md");

/// Most recent action records shown to the model.
const HISTORY_WINDOW: usize = 8;
/// Per-record outcome budget in the reflection prompt.
const OUTCOME_BUDGET_BYTES: usize = 4_000;

/// System prompt for classification requests.
pub const CLASSIFY_SYSTEM: &str =
    "You route tasks for an autonomous agent. Answer with JSON only, no prose.";

static PROMPTS: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

/// Shared prompt engine.
pub fn prompts() -> &'static PromptEngine {
    &PROMPTS
}

#[derive(Debug, Clone, Serialize)]
struct VocabularyEntry {
    kind: &'static str,
    params: &'static str,
}

fn vocabulary_context(vocabulary: &[ActionKind]) -> Vec<VocabularyEntry> {
    vocabulary
        .iter()
        .map(|kind| VocabularyEntry {
            kind: kind.as_str(),
            params: kind.parameter_hint(),
        })
        .collect()
}

/// One action record as shown in the reflection prompt.
#[derive(Debug, Clone, Serialize)]
struct HistoryEntry {
    step_id: String,
    action: String,
    authorization: String,
    outcome: Option<String>,
}

impl HistoryEntry {
    fn from_record(record: &ActionRecord) -> Self {
        let decision = &record.safety_decision;
        let authorization = if decision.allowed {
            "allowed".to_string()
        } else {
            format!(
                "DENIED ({}): {}",
                decision.reason_code.as_str(),
                decision.message
            )
        };
        let outcome = record.output.as_ref().map(|output| match output {
            ActionOutput::Success { content } => truncate_output(content, OUTCOME_BUDGET_BYTES),
            ActionOutput::Failure { message, .. } => {
                format!("FAILED: {}", truncate_output(message, OUTCOME_BUDGET_BYTES))
            }
        });
        Self {
            step_id: record.step_id.clone(),
            action: record.action.label(),
            authorization,
            outcome,
        }
    }
}

/// Inputs for a reflection prompt.
#[derive(Debug, Clone, Copy)]
pub struct ReflectInputs<'a> {
    pub task: &'a str,
    pub state: &'a ExecutionState,
    pub vocabulary: &'a [ActionKind],
    pub max_iterations: u32,
    pub pending_actions: usize,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("classify", CLASSIFY_TEMPLATE)
            .expect("classify template should be valid");
        env.add_template("plan", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        env.add_template("reflect", REFLECT_TEMPLATE)
            .expect("reflect template should be valid");
        Self { env }
    }

    pub fn render_classify(&self, task: &str) -> Result<String> {
        let template = self.env.get_template("classify")?;
        Ok(template.render(context! { task => task.trim() })?)
    }

    pub fn render_plan(&self, task: &str, vocabulary: &[ActionKind]) -> Result<String> {
        let template = self.env.get_template("plan")?;
        Ok(template.render(context! {
            task => task.trim(),
            vocabulary => vocabulary_context(vocabulary),
        })?)
    }

    pub fn render_reflect(&self, input: &ReflectInputs<'_>) -> Result<String> {
        let records = &input.state.action_history;
        let skip = records.len().saturating_sub(HISTORY_WINDOW);
        let history: Vec<HistoryEntry> = records
            .iter()
            .skip(skip)
            .map(HistoryEntry::from_record)
            .collect();
        let plan = input.state.plan.trim();
        let template = self.env.get_template("reflect")?;
        Ok(template.render(context! {
            task => input.task.trim(),
            plan => if plan.is_empty() { "(none)" } else { plan },
            iteration => input.state.iteration,
            max_iterations => input.max_iterations,
            pending => input.pending_actions,
            history => history,
            vocabulary => vocabulary_context(input.vocabulary),
        })?)
    }
}
