//! Data workflow: inspect data files and compute results with small scripts.

use crate::core::types::{ActionKind, Domain, ExecutionState};
use crate::io::tools::ToolLimits;

use super::{DomainWorkflow, WorkflowDeps, claimed_after_success, finished_with_complete};

/// Data files are read with a larger ceiling than other domains.
const READ_MULTIPLIER: usize = 4;

const VOCABULARY: &[ActionKind] = &[
    ActionKind::SearchFiles,
    ActionKind::ReadFile,
    ActionKind::RunCode,
    ActionKind::WriteFile,
    ActionKind::Complete,
];

const PLANNING_PROMPT: &str = "You are a data analyst working with files in a local workspace. \
Look at a sample of the data before computing anything, and compute results with short \
scripts instead of by hand. Answer with JSON only.";

const REFLECTION_PROMPT: &str = "You are reviewing your own progress on a data task. Only \
claim completion once a script has produced the result or the result was written to a file. \
Answer with JSON only.";

pub struct DataWorkflow {
    deps: WorkflowDeps,
}

impl DataWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self { deps }
    }
}

impl DomainWorkflow for DataWorkflow {
    fn domain(&self) -> Domain {
        Domain::Data
    }

    fn agent_name(&self) -> &'static str {
        "data-agent"
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
                && (state.has_succeeded(ActionKind::RunCode)
                    || state.has_succeeded(ActionKind::WriteFile)))
    }

    fn deps(&self) -> &WorkflowDeps {
        &self.deps
    }

    fn tool_limits(&self) -> ToolLimits {
        self.deps.limits.with_read_multiplier(READ_MULTIPLIER)
    }
}
