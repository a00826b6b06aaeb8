//! Domain workflows: the planning, reflection and completion strategy the
//! engine runs a task with.
//!
//! The engine depends only on [`DomainWorkflow`]. The four variants differ in
//! their prompts, action vocabulary, tool limits and completion signal; the
//! LLM round trips and action dispatch are shared default methods.
//!
//! Workflows hold no per-run state and are reused across sessions.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::types::{Action, ActionKind, Domain, ExecutionState, Task};
use crate::io::llm::{ChatRequest, LlmClient, LlmError};
use crate::io::prompt::{ReflectInputs, prompts};
use crate::io::tools::{ToolError, ToolExecutor, ToolLimits, ToolOutput};

pub mod coding;
pub mod data;
pub mod decision;
pub mod general;
pub mod research;

pub use coding::CodingWorkflow;
pub use data::DataWorkflow;
pub use decision::{Plan, Reflection};
pub use general::GeneralWorkflow;
pub use research::ResearchWorkflow;

/// Collaborators shared by every workflow of one orchestrator.
#[derive(Clone)]
pub struct WorkflowDeps {
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<dyn ToolExecutor>,
    pub limits: ToolLimits,
    /// Retry a planning/reflection call once after a transient failure.
    pub retry_transient: bool,
}

/// Read-only view of a run handed to the planning and reflection steps.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowContext<'a> {
    pub task: &'a Task,
    pub state: &'a ExecutionState,
    pub max_iterations: u32,
    /// Planned actions not yet executed.
    pub pending_actions: usize,
    pub cancel: &'a CancellationToken,
}

/// Capability set the engine runs a task with.
#[async_trait]
pub trait DomainWorkflow: Send + Sync {
    fn domain(&self) -> Domain;

    /// Name reported in progress events.
    fn agent_name(&self) -> &'static str;

    /// Action kinds this workflow may run.
    fn vocabulary(&self) -> &'static [ActionKind];

    /// System prompt for the planning call.
    fn planning_prompt(&self) -> &'static str;

    /// System prompt for the reflection call.
    fn reflection_prompt(&self) -> &'static str;

    /// Domain-specific completion signal.
    fn is_complete(&self, state: &ExecutionState) -> bool;

    fn deps(&self) -> &WorkflowDeps;

    fn tool_limits(&self) -> ToolLimits {
        self.deps().limits
    }

    fn recognizes(&self, kind: ActionKind) -> bool {
        self.vocabulary().contains(&kind)
    }

    /// Ask the model for a plan and the first actions.
    async fn plan(&self, ctx: &WorkflowContext<'_>) -> Result<Plan> {
        let prompt = prompts()
            .render_plan(&ctx.task.description, self.vocabulary())
            .context("render planning prompt")?;
        let request = ChatRequest::new(self.planning_prompt(), prompt);
        let reply = complete_with_retry(self.deps(), request, ctx.cancel)
            .await
            .context("planning call failed")?;
        decision::parse_plan(&reply).context("planning reply rejected")
    }

    /// Ask the model to review the history and pick continue or stop.
    async fn reflect(&self, ctx: &WorkflowContext<'_>) -> Result<Reflection> {
        let prompt = prompts()
            .render_reflect(&ReflectInputs {
                task: &ctx.task.description,
                state: ctx.state,
                vocabulary: self.vocabulary(),
                max_iterations: ctx.max_iterations,
                pending_actions: ctx.pending_actions,
            })
            .context("render reflection prompt")?;
        let request = ChatRequest::new(self.reflection_prompt(), prompt);
        let reply = complete_with_retry(self.deps(), request, ctx.cancel)
            .await
            .context("reflection call failed")?;
        decision::parse_reflection(&reply).context("reflection reply rejected")
    }

    /// Run an action that already passed the safety gate.
    async fn execute(&self, action: &Action) -> Result<ToolOutput, ToolError> {
        if !self.recognizes(action.kind) {
            return Err(ToolError::Unsupported(action.kind));
        }
        match action.kind {
            ActionKind::Analyze => Ok(ToolOutput::text(
                action.param("notes").unwrap_or("(no notes)"),
            )),
            ActionKind::Complete => Ok(ToolOutput::text(
                action.param("summary").unwrap_or("task complete"),
            )),
            _ => self.deps().tools.invoke(action, &self.tool_limits()).await,
        }
    }
}

/// Build the workflow for `domain`.
pub fn workflow_for(domain: Domain, deps: WorkflowDeps) -> Arc<dyn DomainWorkflow> {
    match domain {
        Domain::Coding => Arc::new(CodingWorkflow::new(deps)),
        Domain::Research => Arc::new(ResearchWorkflow::new(deps)),
        Domain::Data => Arc::new(DataWorkflow::new(deps)),
        Domain::General => Arc::new(GeneralWorkflow::new(deps)),
    }
}

/// One LLM round trip, retried once on a transient failure unless the run
/// was cancelled in the meantime.
pub async fn complete_with_retry(
    deps: &WorkflowDeps,
    request: ChatRequest,
    cancel: &CancellationToken,
) -> Result<String, LlmError> {
    match deps.llm.complete(request.clone()).await {
        Ok(reply) => Ok(reply),
        Err(err) if deps.retry_transient && err.is_transient() => {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            warn!(error = %err, "transient LLM failure, retrying once");
            deps.llm.complete(request).await
        }
        Err(err) => Err(err),
    }
}

/// True when the latest record is a successful `complete` action.
pub(crate) fn finished_with_complete(state: &ExecutionState) -> bool {
    state
        .last_record()
        .is_some_and(|record| record.action.kind == ActionKind::Complete && record.succeeded())
}

/// True when the model claims completion and the latest action did not fail.
pub(crate) fn claimed_after_success(state: &ExecutionState) -> bool {
    state.completion_claimed && state.last_record().is_some_and(|record| record.succeeded())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ActionOutput;
    use crate::test_support::{ScriptedLlm, ScriptedTools, deps_with, record, success};

    #[tokio::test]
    async fn retries_one_transient_failure() {
        let llm = ScriptedLlm::new()
            .fail(LlmError::Timeout)
            .reply(r#"{"plan": "p", "actions": []}"#);
        let deps = deps_with(Arc::new(llm.clone()), Arc::new(ScriptedTools::new()));
        let reply = complete_with_retry(&deps, ChatRequest::new("s", "u"), &CancellationToken::new())
            .await
            .expect("retried");
        assert!(reply.contains("plan"));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let llm = ScriptedLlm::new()
            .fail(LlmError::Api {
                status: 401,
                message: "bad key".to_string(),
            })
            .reply("unused");
        let deps = deps_with(Arc::new(llm.clone()), Arc::new(ScriptedTools::new()));
        let err = complete_with_retry(&deps, ChatRequest::new("s", "u"), &CancellationToken::new())
            .await
            .expect_err("not retried");
        assert!(matches!(err, LlmError::Api { status: 401, .. }));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn skips_retry_when_cancelled_or_disabled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let llm = ScriptedLlm::new().fail(LlmError::Timeout).reply("unused");
        let deps = deps_with(Arc::new(llm.clone()), Arc::new(ScriptedTools::new()));
        let err = complete_with_retry(&deps, ChatRequest::new("s", "u"), &cancel)
            .await
            .expect_err("cancelled");
        assert_eq!(err, LlmError::Cancelled);
        assert_eq!(llm.calls(), 1);

        let llm = ScriptedLlm::new().fail(LlmError::Timeout).reply("unused");
        let mut deps = deps_with(Arc::new(llm.clone()), Arc::new(ScriptedTools::new()));
        deps.retry_transient = false;
        let err = complete_with_retry(&deps, ChatRequest::new("s", "u"), &CancellationToken::new())
            .await
            .expect_err("disabled");
        assert_eq!(err, LlmError::Timeout);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn plan_sends_domain_prompt_and_vocabulary() {
        let llm = ScriptedLlm::new().reply(
            r#"{"plan": "look around", "actions": [{"kind": "list-directory", "parameters": {}}]}"#,
        );
        let workflow = GeneralWorkflow::new(deps_with(
            Arc::new(llm.clone()),
            Arc::new(ScriptedTools::new()),
        ));
        let task = Task::new("tidy the repo", "s1");
        let state = ExecutionState::default();
        let cancel = CancellationToken::new();
        let plan = workflow
            .plan(&WorkflowContext {
                task: &task,
                state: &state,
                max_iterations: 5,
                pending_actions: 0,
                cancel: &cancel,
            })
            .await
            .expect("plan");
        assert_eq!(plan.actions[0].kind, ActionKind::ListDirectory);
        let requests = llm.requests();
        assert_eq!(requests[0].messages[0].content, workflow.planning_prompt());
        assert!(requests[0].user_text().contains("tidy the repo"));
        assert!(requests[0].user_text().contains("`run-command`"));
    }

    #[tokio::test]
    async fn malformed_reflection_is_an_error() {
        let llm = ScriptedLlm::new().reply("I think we are done!");
        let workflow = GeneralWorkflow::new(deps_with(
            Arc::new(llm),
            Arc::new(ScriptedTools::new()),
        ));
        let task = Task::new("t", "s1");
        let state = ExecutionState::default();
        let cancel = CancellationToken::new();
        let err = workflow
            .reflect(&WorkflowContext {
                task: &task,
                state: &state,
                max_iterations: 5,
                pending_actions: 0,
                cancel: &cancel,
            })
            .await
            .expect_err("malformed");
        assert!(format!("{err:#}").contains("reflection reply rejected"));
    }

    #[tokio::test]
    async fn execute_handles_internal_actions_without_tools() {
        let tools = ScriptedTools::new();
        let workflow = ResearchWorkflow::new(deps_with(
            Arc::new(ScriptedLlm::new()),
            Arc::new(tools.clone()),
        ));
        let out = workflow
            .execute(&Action::new(ActionKind::Analyze).with_param("notes", "two sources agree"))
            .await
            .expect("analyze");
        assert_eq!(out.content, "two sources agree");
        assert!(tools.invoked().is_empty());
    }

    #[tokio::test]
    async fn execute_rejects_kinds_outside_the_vocabulary() {
        let tools = ScriptedTools::new();
        let workflow = ResearchWorkflow::new(deps_with(
            Arc::new(ScriptedLlm::new()),
            Arc::new(tools.clone()),
        ));
        let err = workflow
            .execute(&Action::new(ActionKind::RunCommand).with_param("command", "ls"))
            .await
            .expect_err("unsupported");
        assert_eq!(err, ToolError::Unsupported(ActionKind::RunCommand));
        assert!(tools.invoked().is_empty());
    }

    #[test]
    fn complete_action_finishes_any_domain() {
        let mut state = ExecutionState::default();
        assert!(!finished_with_complete(&state));
        state
            .action_history
            .push(record(Action::new(ActionKind::Complete), success("done")));
        assert!(finished_with_complete(&state));
    }

    #[test]
    fn claim_requires_a_successful_last_action() {
        let mut state = ExecutionState {
            completion_claimed: true,
            ..ExecutionState::default()
        };
        state.action_history.push(record(
            Action::new(ActionKind::RunCommand),
            Some(ActionOutput::Failure {
                message: "exit 1".to_string(),
                fatal: false,
            }),
        ));
        assert!(!claimed_after_success(&state));
        state
            .action_history
            .push(record(Action::new(ActionKind::RunCommand), success("ok")));
        assert!(claimed_after_success(&state));
    }
}
