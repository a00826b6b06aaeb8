//! Progress events streamed to the caller during a run.
//!
//! Field names and the `type`/`status` values are consumed verbatim by the
//! presentation layer and must stay stable. Every run ends with exactly one
//! `completed` or `error` event; [`RunEvents`] drops anything emitted after it.

use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::core::types::Artifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Thinking,
    Artifact,
    TaskCompleted,
    Completed,
    Error,
}

impl EventType {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventType::Completed | EventType::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Running,
    Completed,
    Error,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub tasks_completed: u32,
    pub total_tasks: u32,
    pub artifacts_count: u32,
}

/// One update in the progress stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub agent: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Artifact>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

impl ProgressEvent {
    pub fn new(agent: impl Into<String>, kind: EventType, status: EventStatus) -> Self {
        Self {
            agent: agent.into(),
            kind,
            status,
            message: None,
            content: None,
            artifact: None,
            artifacts: None,
            issues: None,
            summary: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Receives progress events. Emission must not block the run.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: &ProgressEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "serialize progress event");
                return;
            }
        };
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(err) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
            warn!(error = %err, "write progress event");
        }
    }
}

/// Forwards events to an async consumer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &ProgressEvent) {
        // a dropped receiver only means nobody is listening anymore
        let _ = self.tx.send(event.clone());
    }
}

/// Per-run emitter that enforces the single terminal event.
pub struct RunEvents<'a> {
    sink: &'a dyn EventSink,
    agent: &'static str,
    finished: bool,
}

impl<'a> RunEvents<'a> {
    pub fn new(sink: &'a dyn EventSink, agent: &'static str) -> Self {
        Self {
            sink,
            agent,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn emit(&mut self, event: ProgressEvent) {
        if self.finished {
            warn!(kind = ?event.kind, "progress event after terminal event dropped");
            return;
        }
        if event.kind.is_terminal() {
            self.finished = true;
        }
        self.sink.emit(&event);
    }

    pub fn thinking(&mut self, message: impl Into<String>) {
        let event = ProgressEvent::new(self.agent, EventType::Thinking, EventStatus::Running)
            .with_message(message);
        self.emit(event);
    }

    pub fn artifact(&mut self, artifact: &Artifact) {
        let mut event = ProgressEvent::new(self.agent, EventType::Artifact, EventStatus::Running)
            .with_message(format!("created {}", artifact.filename));
        event.artifact = Some(artifact.clone());
        self.emit(event);
    }

    pub fn task_completed(&mut self, ok: bool, message: impl Into<String>, content: &str) {
        let status = if ok {
            EventStatus::Completed
        } else {
            EventStatus::Error
        };
        let event = ProgressEvent::new(self.agent, EventType::TaskCompleted, status)
            .with_message(message)
            .with_content(content);
        self.emit(event);
    }

    pub fn completed(
        &mut self,
        message: impl Into<String>,
        summary: RunSummary,
        artifacts: Vec<Artifact>,
    ) {
        let mut event = ProgressEvent::new(self.agent, EventType::Completed, EventStatus::Finished)
            .with_message(message);
        event.summary = Some(summary);
        event.artifacts = Some(artifacts);
        self.emit(event);
    }

    pub fn error(&mut self, message: impl Into<String>, issues: Vec<String>) {
        let mut event =
            ProgressEvent::new(self.agent, EventType::Error, EventStatus::Error).with_message(message);
        event.issues = Some(issues);
        self.emit(event);
    }
}
