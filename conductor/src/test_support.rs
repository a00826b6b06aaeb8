//! Test doubles for the LLM backend, tool executors and the event stream.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::policy::SafetyPolicy;
use crate::core::stats::SafetyStats;
use crate::core::types::{
    Action, ActionKind, ActionOutput, ActionRecord, Artifact, SafetyDecision,
};
use crate::events::{EventSink, ProgressEvent};
use crate::io::llm::{ChatRequest, LlmClient, LlmError};
use crate::io::tools::{ToolError, ToolExecutor, ToolLimits, ToolOutput};
use crate::safety::SafetyGate;
use crate::workflows::WorkflowDeps;

#[derive(Default)]
struct LlmScript {
    replies: VecDeque<Result<String, LlmError>>,
    requests: Vec<ChatRequest>,
    cancel_after: Option<(usize, CancellationToken)>,
}

/// LLM double answering from a queue of replies and errors.
///
/// Clones share the same script, so a test can keep a handle for assertions
/// after handing one to the code under test.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    script: Arc<Mutex<LlmScript>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, reply: impl Into<String>) -> Self {
        self.lock().replies.push_back(Ok(reply.into()));
        self
    }

    pub fn fail(self, err: LlmError) -> Self {
        self.lock().replies.push_back(Err(err));
        self
    }

    /// Cancel `token` once the `calls`-th request has been answered.
    pub fn cancel_after(self, calls: usize, token: CancellationToken) -> Self {
        self.lock().cancel_after = Some((calls, token));
        self
    }

    pub fn calls(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LlmScript> {
        self.script.lock().expect("llm script lock")
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        let mut script = self.lock();
        script.requests.push(request);
        let answer = script
            .replies
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Malformed("no scripted reply left".to_string())));
        if let Some((calls, token)) = &script.cancel_after
            && script.requests.len() >= *calls
        {
            token.cancel();
        }
        answer
    }
}

#[derive(Default)]
struct ToolScript {
    overrides: VecDeque<Result<ToolOutput, ToolError>>,
    invoked: Vec<(Action, ToolLimits)>,
}

/// Tool double. Queued results are returned first; after that every action
/// succeeds with a canned output, and `write-file` yields an artifact.
#[derive(Clone, Default)]
pub struct ScriptedTools {
    script: Arc<Mutex<ToolScript>>,
}

impl ScriptedTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, result: Result<ToolOutput, ToolError>) -> Self {
        self.lock().overrides.push_back(result);
        self
    }

    pub fn invoked(&self) -> Vec<(Action, ToolLimits)> {
        self.lock().invoked.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ToolScript> {
        self.script.lock().expect("tool script lock")
    }
}

fn canned_output(action: &Action) -> ToolOutput {
    match action.kind {
        ActionKind::WriteFile => {
            let path = action.param("path").unwrap_or("out.txt");
            let content = action.param("content").unwrap_or("");
            ToolOutput {
                content: format!("wrote {} bytes to {path}", content.len()),
                artifact: Some(Artifact::file(path, content)),
            }
        }
        ActionKind::ReadFile => {
            ToolOutput::text(format!("contents of {}", action.param("path").unwrap_or("?")))
        }
        _ => ToolOutput::text(format!("ok: {}", action.label())),
    }
}

#[async_trait]
impl ToolExecutor for ScriptedTools {
    async fn invoke(&self, action: &Action, limits: &ToolLimits) -> Result<ToolOutput, ToolError> {
        let mut script = self.lock();
        script.invoked.push((action.clone(), *limits));
        script
            .overrides
            .pop_front()
            .unwrap_or_else(|| Ok(canned_output(action)))
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &ProgressEvent) {
        self.events.lock().expect("events lock").push(event.clone());
    }
}

/// Default limits used by tests.
pub fn test_limits() -> ToolLimits {
    ToolLimits::new(100_000, Duration::from_secs(30))
}

pub fn deps_with(llm: Arc<dyn LlmClient>, tools: Arc<dyn ToolExecutor>) -> WorkflowDeps {
    WorkflowDeps {
        llm,
        tools,
        limits: test_limits(),
        retry_transient: true,
    }
}

/// Gate with a fixed home and workspace, reporting to private counters.
pub fn gate_at(policy: &SafetyPolicy, workspace: &Path) -> SafetyGate {
    SafetyGate::with_context(
        policy,
        Some("/home/tester".into()),
        workspace,
        Arc::new(SafetyStats::default()),
    )
    .expect("gate")
}

/// Allowed action record with the given outcome.
pub fn record(action: Action, output: Option<ActionOutput>) -> ActionRecord {
    ActionRecord {
        step_id: "step-1".to_string(),
        action,
        safety_decision: SafetyDecision::allow("ok"),
        output,
        completed_at: None,
    }
}

pub fn success(content: &str) -> Option<ActionOutput> {
    Some(ActionOutput::Success {
        content: content.to_string(),
    })
}

/// Temporary workspace directory.
pub fn workspace() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir")
}

/// Reply text for a plan with the given actions.
pub fn plan_reply(plan: &str, actions: &[Action]) -> String {
    serde_json::json!({ "plan": plan, "actions": actions }).to_string()
}

/// Reply text for a reflection.
pub fn reflect_reply(decision: &str, complete: bool, next_action: Option<&Action>) -> String {
    serde_json::json!({
        "decision": decision,
        "complete": complete,
        "summary": format!("{decision} (complete: {complete})"),
        "next_action": next_action,
    })
    .to_string()
}
