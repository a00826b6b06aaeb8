//! Coding workflow: read, change and test source code.

use crate::core::types::{ActionKind, Domain, ExecutionState};

use super::{DomainWorkflow, WorkflowDeps, claimed_after_success, finished_with_complete};

const VOCABULARY: &[ActionKind] = &[
    ActionKind::ReadFile,
    ActionKind::SearchCode,
    ActionKind::WriteFile,
    ActionKind::RunTests,
    ActionKind::GitStatus,
    ActionKind::Complete,
];

const PLANNING_PROMPT: &str = "You are a careful software engineer working in a local repository. \
Read the relevant code before changing it, keep edits minimal, and prefer running the tests \
over guessing. Answer with JSON only.";

const REFLECTION_PROMPT: &str = "You are reviewing your own progress on a coding task. \
A task is only done once the fix has been written to disk. If tests fail, read the failure \
before editing again. Answer with JSON only.";

pub struct CodingWorkflow {
    deps: WorkflowDeps,
}

impl CodingWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self { deps }
    }
}

impl DomainWorkflow for CodingWorkflow {
    fn domain(&self) -> Domain {
        Domain::Coding
    }

    fn agent_name(&self) -> &'static str {
        "coding-agent"
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

    /// Done after an explicit `complete`, or when the model claims completion
    /// and at least one file was written.
    fn is_complete(&self, state: &ExecutionState) -> bool {
        finished_with_complete(state)
            || (claimed_after_success(state) && state.has_succeeded(ActionKind::WriteFile))
    }

    fn deps(&self) -> &WorkflowDeps {
        &self.deps
    }
}
