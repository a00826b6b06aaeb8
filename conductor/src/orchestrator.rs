//! Orchestrator: classify a task, pick the domain workflow, run the engine,
//! and keep the running statistics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::core::stats::{StatsHandles, StatsSnapshot};
use crate::core::types::{Domain, ErrorReason, Task, WorkflowResult};
use crate::engine::ExecutionEngine;
use crate::events::{EventSink, EventStatus, EventType, ProgressEvent};
use crate::intent::IntentClassifier;
use crate::io::config::AppConfig;
use crate::io::llm::LlmClient;
use crate::io::tools::{ToolExecutor, ToolLimits};
use crate::safety::SafetyGate;
use crate::workflows::{DomainWorkflow, WorkflowDeps, workflow_for};

const AGENT: &str = "orchestrator";

/// A run that ended because the caller or the clock stopped it, as opposed to
/// an ordinary task failure (which is a [`WorkflowResult`] with
/// `success = false`).
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("task was cancelled")]
    Cancelled,
    #[error("task timed out")]
    TimedOut,
}

/// In-flight run registered for a session.
struct ActiveRun {
    run_id: Uuid,
    cancel: CancellationToken,
}

pub struct Orchestrator {
    classifier: IntentClassifier,
    engine: ExecutionEngine,
    deps: WorkflowDeps,
    workflows: Mutex<HashMap<Domain, Arc<dyn DomainWorkflow>>>,
    sessions: Mutex<HashMap<String, ActiveRun>>,
    stats: StatsHandles,
}

impl Orchestrator {
    pub fn new(
        classifier: IntentClassifier,
        engine: ExecutionEngine,
        deps: WorkflowDeps,
        stats: StatsHandles,
    ) -> Self {
        Self {
            classifier,
            engine,
            deps,
            workflows: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            stats,
        }
    }

    /// Wire every component from configuration around a shared `gate`, the
    /// same one the tools resolve paths through.
    pub fn from_config(
        config: &AppConfig,
        gate: Arc<SafetyGate>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolExecutor>,
        stats: StatsHandles,
    ) -> Self {
        let engine = ExecutionEngine::new(
            gate,
            config.engine.max_iterations,
            config.engine.run_timeout(),
        );
        let classifier = IntentClassifier::new(
            Arc::clone(&llm),
            config.classifier.clone(),
            Arc::clone(&stats.classifier),
        );
        let deps = WorkflowDeps {
            llm,
            tools,
            limits: ToolLimits::new(
                config.engine.tool_output_limit_bytes,
                config.engine.command_timeout(),
            ),
            retry_transient: config.workflow.retry_transient_llm_failure,
        };
        Self::new(classifier, engine, deps, stats)
    }

    /// Classify `description` and run it with the matching workflow.
    pub async fn execute_task(
        &self,
        description: &str,
        session_id: &str,
        sink: &dyn EventSink,
    ) -> Result<WorkflowResult, RunError> {
        self.execute(Task::new(description, session_id), sink).await
    }

    /// Run `description` with the workflow for `domain`, skipping
    /// classification.
    pub async fn execute_with_domain(
        &self,
        description: &str,
        domain: Domain,
        session_id: &str,
        sink: &dyn EventSink,
    ) -> Result<WorkflowResult, RunError> {
        let task = Task::new(description, session_id).with_domain_hint(domain);
        self.execute(task, sink).await
    }

    #[instrument(skip_all, fields(session = %task.session_id))]
    async fn execute(&self, task: Task, sink: &dyn EventSink) -> Result<WorkflowResult, RunError> {
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.lock_sessions().insert(
            task.session_id.clone(),
            ActiveRun {
                run_id,
                cancel: cancel.clone(),
            },
        );

        let domain = match task.domain_hint {
            Some(domain) => domain,
            None => {
                let classification = self.classifier.classify(&task.description).await;
                let how = if classification.used_fallback {
                    "keyword fallback"
                } else {
                    "classifier"
                };
                sink.emit(
                    &ProgressEvent::new(AGENT, EventType::Thinking, EventStatus::Running)
                        .with_message(format!(
                            "routed to {} ({how}, confidence {:.2})",
                            classification.domain, classification.confidence
                        )),
                );
                classification.domain
            }
        };
        info!(%run_id, %domain, "starting run");

        let workflow = self.workflow(domain);
        let outcome = self.engine.run(&task, workflow.as_ref(), sink, &cancel).await;

        {
            let mut sessions = self.lock_sessions();
            if sessions
                .get(&task.session_id)
                .is_some_and(|active| active.run_id == run_id)
            {
                sessions.remove(&task.session_id);
            }
        }
        self.stats
            .orchestrator
            .record(domain, outcome.result.success, outcome.result.iterations);
        debug!(%run_id, success = outcome.result.success, "run finished");

        match outcome.error_reason() {
            Some(ErrorReason::Cancelled) => Err(RunError::Cancelled),
            Some(ErrorReason::TimedOut) => Err(RunError::TimedOut),
            _ => Ok(outcome.result),
        }
    }

    /// Cancel the run active for `session_id`. Returns false when there is none.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.lock_sessions().remove(session_id) {
            Some(active) => {
                info!(session = session_id, run_id = %active.run_id, "cancelling run");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Drop cached workflows and cancel whatever is still running.
    pub fn close(&self) {
        self.workflows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        for (_, active) in self.lock_sessions().drain() {
            active.cancel.cancel();
        }
    }

    /// Cached workflow for `domain`, built on first use.
    fn workflow(&self, domain: Domain) -> Arc<dyn DomainWorkflow> {
        let mut cache = self
            .workflows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            cache
                .entry(domain)
                .or_insert_with(|| workflow_for(domain, self.deps.clone())),
        )
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveRun>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
