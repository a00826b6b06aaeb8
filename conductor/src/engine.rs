//! Execution engine: drives one task through
//! Pending → Planning → Executing ⇄ Reflecting → Completed | Error.
//!
//! The engine owns the run's [`ExecutionState`] and is the only place status
//! changes. Every action passes the safety gate before the workflow may run
//! it. Cancellation and the run deadline are checked around the planning and
//! reflection calls; an in-flight call is allowed to finish.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::core::budget::{deadline_after, remaining_budget};
use crate::core::invariants::validate_state;
use crate::core::transitions::{self, LoopDecision, LoopInputs};
use crate::core::types::{
    Action, ActionOutput, ActionRecord, Artifact, ErrorReason, ExecutionState, Status, Task,
    WorkflowResult,
};
use crate::events::{EventSink, RunEvents, RunSummary};
use crate::safety::SafetyGate;
use crate::workflows::{DomainWorkflow, WorkflowContext};

/// Final state and caller-facing result of one run.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub state: ExecutionState,
    pub result: WorkflowResult,
}

impl ExecutionOutcome {
    pub fn error_reason(&self) -> Option<ErrorReason> {
        self.state.error_reason
    }
}

/// Runs tasks against a domain workflow under a shared safety gate.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    gate: Arc<SafetyGate>,
    max_iterations: u32,
    run_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(gate: Arc<SafetyGate>, max_iterations: u32, run_timeout: Duration) -> Self {
        Self {
            gate,
            max_iterations,
            run_timeout,
        }
    }

    /// Run `task` to a terminal state. Never returns early: failures, denials,
    /// cancellation and timeouts all end in a terminal [`ExecutionState`].
    #[instrument(skip_all, fields(session = %task.session_id, domain = %workflow.domain()))]
    pub async fn run(
        &self,
        task: &Task,
        workflow: &dyn DomainWorkflow,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let mut run = Run {
            engine: self,
            task,
            workflow,
            cancel,
            deadline: deadline_after(self.run_timeout),
            state: ExecutionState::default(),
            queue: VecDeque::new(),
            artifacts: Vec::new(),
            events: RunEvents::new(sink, workflow.agent_name()),
        };
        if let Err(err) = run.drive().await {
            error!(error = %format!("{err:#}"), "engine aborted run");
            run.state.record_error(format!("{err:#}"));
            run.state.status = Status::Error;
            if run.state.error_reason.is_none() {
                run.state.error_reason = Some(ErrorReason::FatalAction);
            }
        }
        run.finish()
    }
}

/// Why a planning or reflection call did not produce a value.
enum PhaseError {
    Interrupted(ErrorReason),
    Failed(anyhow::Error),
}

/// Per-run bookkeeping. Lives for one call to [`ExecutionEngine::run`].
struct Run<'a> {
    engine: &'a ExecutionEngine,
    task: &'a Task,
    workflow: &'a dyn DomainWorkflow,
    cancel: &'a CancellationToken,
    deadline: Instant,
    state: ExecutionState,
    /// Planned actions not yet executed.
    queue: VecDeque<Action>,
    artifacts: Vec<Artifact>,
    events: RunEvents<'a>,
}

impl Run<'_> {
    async fn drive(&mut self) -> Result<()> {
        self.advance(Status::Planning)?;
        self.events
            .thinking(format!("planning {} task", self.workflow.domain()));
        if let Some(reason) = self.interruption() {
            return self.fail(reason, "run interrupted before planning");
        }

        let planned = {
            let ctx = self.context();
            self.bounded(self.workflow.plan(&ctx)).await
        };
        let plan = match planned {
            Ok(plan) => plan,
            Err(PhaseError::Interrupted(reason)) => {
                return self.fail(reason, "run interrupted during planning");
            }
            Err(PhaseError::Failed(err)) => {
                return self.fail(ErrorReason::PlanningFailed, format!("{err:#}"));
            }
        };
        if let Some(reason) = self.interruption() {
            return self.fail(reason, "run interrupted after planning");
        }
        info!(actions = plan.actions.len(), "plan accepted");
        self.events.thinking(plan.plan.clone());
        self.state.plan = plan.plan;
        self.queue.extend(plan.actions);

        loop {
            self.advance(Status::Executing)?;
            self.execute_next().await;
            self.advance(Status::Reflecting)?;
            match self.reflect().await {
                LoopDecision::Continue => continue,
                LoopDecision::Complete => return self.advance(Status::Completed),
                LoopDecision::Fail(reason) => {
                    let message = match self.state.last_record() {
                        Some(record) => format!("stopped after {}", record.action.label()),
                        None => "stopped before any action ran".to_string(),
                    };
                    return self.fail(reason, message);
                }
            }
        }
    }

    async fn execute_next(&mut self) {
        let Some(action) = self.queue.pop_front() else {
            self.state.stalled += 1;
            self.state.record_error("no action was proposed");
            self.events
                .task_completed(false, "idle", "no action was proposed");
            return;
        };
        let step_id = format!("step-{}", self.state.action_history.len() + 1);
        let decision = self.engine.gate.check(&action.safety_subject());
        if !decision.allowed {
            self.state.stalled += 1;
            self.events.task_completed(
                false,
                format!("{} denied", action.label()),
                &decision.message,
            );
            self.state.action_history.push(ActionRecord {
                step_id,
                action,
                safety_decision: decision,
                output: None,
                completed_at: None,
            });
            return;
        }

        self.events.thinking(format!("running {}", action.label()));
        let result = self.workflow.execute(&action).await;
        let completed_at = Utc::now();
        let (output, artifact) = match result {
            Ok(out) => (
                ActionOutput::Success {
                    content: out.content,
                },
                out.artifact,
            ),
            Err(err) => {
                warn!(step = %step_id, error = %err, "action failed");
                (
                    ActionOutput::Failure {
                        message: err.to_string(),
                        fatal: err.is_fatal(),
                    },
                    None,
                )
            }
        };
        self.state.iteration += 1;
        let (ok, shown) = match &output {
            ActionOutput::Success { content } => (true, content.clone()),
            ActionOutput::Failure { message, .. } => (false, format!("FAILED: {message}")),
        };
        self.state
            .accumulated_results
            .insert(step_id.clone(), shown.clone());
        if let Some(artifact) = artifact {
            self.events.artifact(&artifact);
            self.artifacts.push(artifact);
        }
        self.events.task_completed(ok, action.label(), &shown);
        debug!(step = %step_id, ok, iteration = self.state.iteration, "action recorded");
        self.state.action_history.push(ActionRecord {
            step_id,
            action,
            safety_decision: decision,
            output: Some(output),
            completed_at: Some(completed_at),
        });
    }

    async fn reflect(&mut self) -> LoopDecision {
        let last_fatal = self
            .state
            .last_record()
            .is_some_and(ActionRecord::is_fatal);
        if last_fatal {
            return LoopDecision::Fail(ErrorReason::FatalAction);
        }
        if let Some(reason) = self.interruption() {
            return LoopDecision::Fail(reason);
        }

        self.events.thinking("reviewing progress");
        let reflected = {
            let ctx = self.context();
            self.bounded(self.workflow.reflect(&ctx)).await
        };
        let reflection = match reflected {
            Ok(reflection) => reflection,
            Err(PhaseError::Interrupted(reason)) => return LoopDecision::Fail(reason),
            Err(PhaseError::Failed(err)) => {
                self.state.record_error(format!("{err:#}"));
                return LoopDecision::Fail(ErrorReason::ReflectionFailed);
            }
        };

        self.state.completion_claimed = reflection.complete;
        if !reflection.summary.trim().is_empty() {
            self.state.summary = Some(reflection.summary);
        }
        let decision = transitions::decide(LoopInputs {
            iteration: self.state.iteration,
            stalled: self.state.stalled,
            max_iterations: self.engine.max_iterations,
            domain_complete: self.workflow.is_complete(&self.state),
            last_action_fatal: false,
            verdict: reflection.verdict,
        });
        debug!(
            ?decision,
            iteration = self.state.iteration,
            stalled = self.state.stalled,
            "reflection decided"
        );
        if decision != LoopDecision::Continue {
            return decision;
        }
        if let Some(reason) = self.interruption() {
            return LoopDecision::Fail(reason);
        }
        if let Some(next) = reflection.next_action {
            self.queue.push_front(next);
        }
        decision
    }

    fn context(&self) -> WorkflowContext<'_> {
        WorkflowContext {
            task: self.task,
            state: &self.state,
            max_iterations: self.engine.max_iterations,
            pending_actions: self.queue.len(),
            cancel: self.cancel,
        }
    }

    /// Await a planning/reflection call within the remaining run budget.
    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T, PhaseError> {
        let Some(remaining) = remaining_budget(self.deadline) else {
            return Err(PhaseError::Interrupted(ErrorReason::TimedOut));
        };
        match tokio::time::timeout(remaining, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) if self.cancel.is_cancelled() => {
                Err(PhaseError::Interrupted(ErrorReason::Cancelled))
            }
            Ok(Err(err)) => Err(PhaseError::Failed(err)),
            Err(_) => Err(PhaseError::Interrupted(ErrorReason::TimedOut)),
        }
    }

    fn interruption(&self) -> Option<ErrorReason> {
        if self.cancel.is_cancelled() {
            return Some(ErrorReason::Cancelled);
        }
        if remaining_budget(self.deadline).is_none() {
            return Some(ErrorReason::TimedOut);
        }
        None
    }

    fn advance(&mut self, to: Status) -> Result<()> {
        let from = self.state.status;
        transitions::transition(&mut self.state.status, to)?;
        debug!(?from, ?to, "status transition");
        Ok(())
    }

    fn fail(&mut self, reason: ErrorReason, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        warn!(reason = reason.as_str(), %message, "run failed");
        self.state.record_error(message);
        self.state.error_reason = Some(reason);
        self.advance(Status::Error)
    }

    fn finish(mut self) -> ExecutionOutcome {
        for violation in validate_state(&self.state, self.engine.max_iterations) {
            warn!(%violation, "run state invariant violated");
        }
        let result = self.result();
        if result.success {
            let summary = RunSummary {
                tasks_completed: count(self.state.action_history.iter().filter(|r| r.succeeded())),
                total_tasks: count(self.state.action_history.iter()),
                artifacts_count: count(self.artifacts.iter()),
            };
            self.events
                .completed(result.output.clone(), summary, self.artifacts.clone());
        } else {
            self.events.error(result.output.clone(), result.errors.clone());
        }
        ExecutionOutcome {
            state: self.state,
            result,
        }
    }

    fn result(&self) -> WorkflowResult {
        let success = self.state.status == Status::Completed;
        let output = if success {
            self.state
                .summary
                .clone()
                .or_else(|| {
                    self.state.last_record().and_then(|record| match &record.output {
                        Some(ActionOutput::Success { content }) => Some(content.clone()),
                        _ => None,
                    })
                })
                .unwrap_or_else(|| "task complete".to_string())
        } else {
            let reason = self
                .state
                .error_reason
                .map_or("failed", ErrorReason::as_str);
            match self.state.errors.last() {
                Some(last) if last.message != reason => format!("{reason}: {}", last.message),
                _ => reason.to_string(),
            }
        };
        WorkflowResult {
            success,
            output,
            iterations: self.state.iteration,
            errors: self
                .state
                .errors
                .iter()
                .map(|record| record.message.clone())
                .collect(),
            artifacts: self.artifacts.clone(),
        }
    }
}

fn count<I: Iterator>(items: I) -> u32 {
    u32::try_from(items.count()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use async_trait::async_trait;

    use crate::core::policy::SafetyPolicy;
    use crate::core::types::ActionKind;
    use crate::events::EventType;
    use crate::io::llm::{ChatRequest, LlmClient, LlmError};
    use crate::io::tools::ToolError;
    use crate::test_support::{
        CollectingSink, ScriptedLlm, ScriptedTools, deps_with, gate_at, plan_reply, reflect_reply,
    };
    use crate::workflows::{CodingWorkflow, GeneralWorkflow};

    fn engine(max_iterations: u32) -> ExecutionEngine {
        ExecutionEngine::new(
            Arc::new(gate_at(&SafetyPolicy::default(), Path::new("/work"))),
            max_iterations,
            Duration::from_secs(30),
        )
    }

    fn read(path: &str) -> Action {
        Action::new(ActionKind::ReadFile).with_param("path", path)
    }

    fn write(path: &str, content: &str) -> Action {
        Action::new(ActionKind::WriteFile)
            .with_param("path", path)
            .with_param("content", content)
    }

    fn kinds(sink: &CollectingSink) -> Vec<EventType> {
        sink.events().iter().map(|event| event.kind).collect()
    }

    #[tokio::test]
    async fn read_then_write_completes_in_two_iterations() {
        let llm = ScriptedLlm::new()
            .reply(plan_reply("read then fix", &[read("parser.c")]))
            .reply(reflect_reply(
                "continue",
                false,
                Some(&write("parser.c", "if (p) {}")),
            ))
            .reply(reflect_reply("stop", true, None));
        let tools = ScriptedTools::new();
        let workflow = CodingWorkflow::new(deps_with(Arc::new(llm.clone()), Arc::new(tools.clone())));
        let sink = CollectingSink::default();
        let task = Task::new("Fix the null-pointer bug in parser.c", "s1");

        let outcome = engine(10)
            .run(&task, &workflow, &sink, &CancellationToken::new())
            .await;

        assert_eq!(outcome.state.status, Status::Completed);
        assert!(outcome.result.success);
        assert_eq!(outcome.result.iterations, 2);
        assert_eq!(outcome.result.artifacts.len(), 1);
        assert_eq!(outcome.result.artifacts[0].language, "c");
        assert_eq!(llm.calls(), 3);
        assert_eq!(tools.invoked().len(), 2);
        assert_eq!(outcome.state.accumulated_results.len(), 2);
        for record in &outcome.state.action_history {
            let completed_at = record.completed_at.expect("ran");
            assert!(record.safety_decision.decided_at <= completed_at);
        }
        let kinds = kinds(&sink);
        assert_eq!(kinds.last(), Some(&EventType::Completed));
        assert!(kinds.contains(&EventType::Artifact));
        assert_eq!(kinds.iter().filter(|kind| kind.is_terminal()).count(), 1);
        assert!(validate_state(&outcome.state, 10).is_empty());
    }

    #[tokio::test]
    async fn iteration_budget_stops_at_the_limit() {
        let mut llm = ScriptedLlm::new().reply(plan_reply("look", &[read("a.c")]));
        for _ in 0..5 {
            llm = llm.reply(reflect_reply("continue", false, Some(&read("a.c"))));
        }
        let workflow = CodingWorkflow::new(deps_with(
            Arc::new(llm.clone()),
            Arc::new(ScriptedTools::new()),
        ));
        let sink = CollectingSink::default();

        let outcome = engine(3)
            .run(&Task::new("fix a.c", "s1"), &workflow, &sink, &CancellationToken::new())
            .await;

        assert_eq!(outcome.state.status, Status::Error);
        assert_eq!(
            outcome.error_reason(),
            Some(ErrorReason::IterationBudgetExhausted)
        );
        assert_eq!(outcome.result.iterations, 3);
        assert_eq!(llm.calls(), 4);
        assert_eq!(kinds(&sink).last(), Some(&EventType::Error));
    }

    #[tokio::test]
    async fn cancellation_after_planning_records_no_action() {
        let cancel = CancellationToken::new();
        let llm = ScriptedLlm::new()
            .reply(plan_reply("read", &[read("parser.c")]))
            .cancel_after(1, cancel.clone());
        let tools = ScriptedTools::new();
        let workflow = CodingWorkflow::new(deps_with(Arc::new(llm), Arc::new(tools.clone())));

        let outcome = engine(10)
            .run(&Task::new("fix", "s1"), &workflow, &CollectingSink::default(), &cancel)
            .await;

        assert_eq!(outcome.state.status, Status::Error);
        assert_eq!(outcome.error_reason(), Some(ErrorReason::Cancelled));
        assert!(outcome.state.action_history.is_empty());
        assert!(tools.invoked().is_empty());
    }

    #[tokio::test]
    async fn planning_failure_ends_in_error() {
        let llm = ScriptedLlm::new().fail(LlmError::Api {
            status: 401,
            message: "invalid key".to_string(),
        });
        let workflow = GeneralWorkflow::new(deps_with(Arc::new(llm), Arc::new(ScriptedTools::new())));
        let sink = CollectingSink::default();

        let outcome = engine(5)
            .run(&Task::new("list files", "s1"), &workflow, &sink, &CancellationToken::new())
            .await;

        assert_eq!(outcome.error_reason(), Some(ErrorReason::PlanningFailed));
        assert!(!outcome.result.success);
        assert!(outcome.result.output.starts_with("planning failed"));
        assert!(outcome.result.errors[0].contains("invalid key"));
        assert_eq!(kinds(&sink), vec![EventType::Thinking, EventType::Error]);
    }

    #[tokio::test]
    async fn reflection_failure_ends_in_error() {
        let llm = ScriptedLlm::new()
            .reply(plan_reply("read notes", &[read("notes.md")]))
            .fail(LlmError::Api {
                status: 401,
                message: "invalid key".to_string(),
            });
        let tools = ScriptedTools::new();
        let workflow = GeneralWorkflow::new(deps_with(Arc::new(llm.clone()), Arc::new(tools.clone())));
        let sink = CollectingSink::default();

        let outcome = engine(5)
            .run(&Task::new("tidy notes", "s1"), &workflow, &sink, &CancellationToken::new())
            .await;

        assert_eq!(outcome.state.status, Status::Error);
        assert_eq!(outcome.error_reason(), Some(ErrorReason::ReflectionFailed));
        assert!(outcome.result.output.starts_with("reflection failed"));
        assert!(outcome.result.errors.iter().any(|err| err.contains("invalid key")));
        assert_eq!(outcome.result.iterations, 1);
        assert_eq!(tools.invoked().len(), 1);
        // client errors are not retried
        assert_eq!(llm.calls(), 2);
        let kinds = kinds(&sink);
        assert_eq!(kinds.last(), Some(&EventType::Error));
        assert_eq!(kinds.iter().filter(|kind| kind.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn one_transient_reflection_failure_is_retried() {
        let llm = ScriptedLlm::new()
            .reply(plan_reply("read notes", &[read("notes.md")]))
            .fail(LlmError::Timeout)
            .reply(reflect_reply("stop", true, None));
        let workflow = GeneralWorkflow::new(deps_with(
            Arc::new(llm.clone()),
            Arc::new(ScriptedTools::new()),
        ));
        let sink = CollectingSink::default();

        let outcome = engine(5)
            .run(&Task::new("tidy notes", "s1"), &workflow, &sink, &CancellationToken::new())
            .await;

        assert_eq!(outcome.state.status, Status::Completed);
        assert!(outcome.result.success);
        assert_eq!(outcome.result.iterations, 1);
        assert_eq!(llm.calls(), 3);
        assert_eq!(kinds(&sink).last(), Some(&EventType::Completed));
    }

    #[tokio::test]
    async fn repeated_transient_reflection_failure_surfaces() {
        let llm = ScriptedLlm::new()
            .reply(plan_reply("read notes", &[read("notes.md")]))
            .fail(LlmError::Timeout)
            .fail(LlmError::Timeout)
            .reply(reflect_reply("stop", true, None));
        let workflow = GeneralWorkflow::new(deps_with(
            Arc::new(llm.clone()),
            Arc::new(ScriptedTools::new()),
        ));
        let sink = CollectingSink::default();

        let outcome = engine(5)
            .run(&Task::new("tidy notes", "s1"), &workflow, &sink, &CancellationToken::new())
            .await;

        assert_eq!(outcome.state.status, Status::Error);
        assert_eq!(outcome.error_reason(), Some(ErrorReason::ReflectionFailed));
        assert!(outcome.result.errors.iter().any(|err| err.contains("timed out")));
        assert_eq!(llm.calls(), 3);
        assert_eq!(kinds(&sink).last(), Some(&EventType::Error));
    }

    #[tokio::test]
    async fn denied_action_is_recorded_and_the_run_recovers() {
        let llm = ScriptedLlm::new()
            .reply(plan_reply("read key", &[read("~/.ssh/id_rsa")]))
            .reply(reflect_reply("continue", false, Some(&read("README.md"))))
            .reply(reflect_reply("stop", true, None));
        let tools = ScriptedTools::new();
        let workflow = GeneralWorkflow::new(deps_with(Arc::new(llm), Arc::new(tools.clone())));

        let outcome = engine(5)
            .run(
                &Task::new("show me the readme", "s1"),
                &workflow,
                &CollectingSink::default(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.state.status, Status::Completed);
        assert_eq!(outcome.state.iteration, 1);
        let first = &outcome.state.action_history[0];
        assert!(first.was_denied());
        assert!(first.output.is_none());
        assert_eq!(tools.invoked().len(), 1);
        assert_eq!(tools.invoked()[0].0.param("path"), Some("README.md"));
    }

    #[tokio::test]
    async fn repeated_denials_exhaust_the_budget() {
        let rm = Action::new(ActionKind::RunCommand).with_param("command", "rm -rf /");
        let llm = ScriptedLlm::new()
            .reply(plan_reply("clean", std::slice::from_ref(&rm)))
            .reply(reflect_reply("continue", false, Some(&rm)))
            .reply(reflect_reply("continue", false, Some(&rm)));
        let tools = ScriptedTools::new();
        let workflow = GeneralWorkflow::new(deps_with(Arc::new(llm), Arc::new(tools.clone())));

        let outcome = engine(2)
            .run(
                &Task::new("clean up", "s1"),
                &workflow,
                &CollectingSink::default(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            outcome.error_reason(),
            Some(ErrorReason::IterationBudgetExhausted)
        );
        assert_eq!(outcome.state.iteration, 0);
        assert_eq!(outcome.state.stalled, 2);
        assert!(tools.invoked().is_empty());
    }

    #[tokio::test]
    async fn fatal_action_skips_reflection() {
        let llm = ScriptedLlm::new().reply(plan_reply(
            "run",
            &[Action::new(ActionKind::RunCommand).with_param("command", "make")],
        ));
        let tools = ScriptedTools::new().then(Err(ToolError::Aborted("no shell".to_string())));
        let workflow = GeneralWorkflow::new(deps_with(Arc::new(llm.clone()), Arc::new(tools)));

        let outcome = engine(5)
            .run(
                &Task::new("build it", "s1"),
                &workflow,
                &CollectingSink::default(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.error_reason(), Some(ErrorReason::FatalAction));
        assert_eq!(outcome.state.iteration, 1);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn stopping_without_completion_is_an_error() {
        let llm = ScriptedLlm::new()
            .reply(plan_reply("read", &[read("a.c")]))
            .reply(reflect_reply("stop", false, None));
        let workflow = CodingWorkflow::new(deps_with(Arc::new(llm), Arc::new(ScriptedTools::new())));

        let outcome = engine(5)
            .run(
                &Task::new("fix a.c", "s1"),
                &workflow,
                &CollectingSink::default(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.error_reason(), Some(ErrorReason::Abandoned));
        assert_eq!(outcome.result.iterations, 1);
    }

    #[tokio::test]
    async fn complete_action_finishes_the_run() {
        let done = Action::new(ActionKind::Complete).with_param("summary", "nothing to do");
        let llm = ScriptedLlm::new()
            .reply(plan_reply("done already", &[done]))
            .reply(reflect_reply("stop", false, None));
        let tools = ScriptedTools::new();
        let workflow = CodingWorkflow::new(deps_with(Arc::new(llm), Arc::new(tools.clone())));

        let outcome = engine(5)
            .run(
                &Task::new("check the build", "s1"),
                &workflow,
                &CollectingSink::default(),
                &CancellationToken::new(),
            )
            .await;

        assert!(outcome.result.success);
        assert_eq!(outcome.result.iterations, 1);
        assert!(tools.invoked().is_empty());
    }

    struct SlowLlm;

    #[async_trait]
    impl LlmClient for SlowLlm {
        async fn complete(&self, _request: ChatRequest) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(plan_reply("late", &[]))
        }
    }

    #[tokio::test]
    async fn run_deadline_interrupts_planning() {
        let workflow = GeneralWorkflow::new(deps_with(Arc::new(SlowLlm), Arc::new(ScriptedTools::new())));
        let engine = ExecutionEngine::new(
            Arc::new(gate_at(&SafetyPolicy::default(), Path::new("/work"))),
            5,
            Duration::from_millis(50),
        );

        let outcome = engine
            .run(
                &Task::new("anything", "s1"),
                &workflow,
                &CollectingSink::default(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.error_reason(), Some(ErrorReason::TimedOut));
        assert!(outcome.state.action_history.is_empty());
    }
}
