//! Research workflow: find and read material, then summarize it.

use crate::core::types::{ActionKind, Domain, ExecutionState};

use super::{DomainWorkflow, WorkflowDeps, claimed_after_success, finished_with_complete};

const VOCABULARY: &[ActionKind] = &[
    ActionKind::SearchFiles,
    ActionKind::SearchContent,
    ActionKind::ReadFile,
    ActionKind::Analyze,
    ActionKind::Complete,
];

const GATHERING: &[ActionKind] = &[
    ActionKind::SearchFiles,
    ActionKind::SearchContent,
    ActionKind::ReadFile,
    ActionKind::Analyze,
];

const PLANNING_PROMPT: &str = "You are a research assistant with read-only access to a local \
workspace. Locate the relevant material first, read it, and record findings with `analyze`. \
Answer with JSON only.";

const REFLECTION_PROMPT: &str = "You are reviewing your own research progress. Only claim the \
task is complete once the findings are backed by material you actually read. Answer with \
JSON only.";

pub struct ResearchWorkflow {
    deps: WorkflowDeps,
}

impl ResearchWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self { deps }
    }
}

impl DomainWorkflow for ResearchWorkflow {
    fn domain(&self) -> Domain {
        Domain::Research
    }

    fn agent_name(&self) -> &'static str {
        "research-agent"
    }

    fn vocabulary(&self) -> &'static [ActionKind] {
        VOCABULARY
    }

    fn planning_prompt(&self) -> &'static str {
        PLANNING_PROMPT
    }

    fn reflection_prompt(&self) -> &'static str {
        REFLECTION_PROMPT
    }

    fn is_complete(&self, state: &ExecutionState) -> bool {
        finished_with_complete(state)
            || (claimed_after_success(state)
                && GATHERING.iter().any(|kind| state.has_succeeded(*kind)))
    }

    fn deps(&self) -> &WorkflowDeps {
        &self.deps
    }
}
