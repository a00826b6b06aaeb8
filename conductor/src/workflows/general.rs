//! General workflow: everyday workspace chores.

use crate::core::types::{ActionKind, Domain, ExecutionState};

use super::{DomainWorkflow, WorkflowDeps, claimed_after_success, finished_with_complete};

const VOCABULARY: &[ActionKind] = &[
    ActionKind::ListDirectory,
    ActionKind::SearchFiles,
    ActionKind::ReadFile,
    ActionKind::WriteFile,
    ActionKind::RunCommand,
    ActionKind::GitStatus,
    ActionKind::Complete,
];

const PLANNING_PROMPT: &str = "You are a general-purpose assistant operating in a local \
workspace. Prefer inspecting files and listing directories over running commands, and \
keep commands simple. Answer with JSON only.";

const REFLECTION_PROMPT: &str = "You are reviewing your own progress on a workspace task. \
Claim completion only when the last action succeeded and the request is satisfied. Answer \
with JSON only.";

pub struct GeneralWorkflow {
    deps: WorkflowDeps,
}

impl GeneralWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self { deps }
    }
}

impl DomainWorkflow for GeneralWorkflow {
    fn domain(&self) -> Domain {
        Domain::General
    }

    fn agent_name(&self) -> &'static str {
        "general-agent"
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
        finished_with_complete(state) || claimed_after_success(state)
    }

    fn deps(&self) -> &WorkflowDeps {
        &self.deps
    }
}
