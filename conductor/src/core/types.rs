//! Shared deterministic types for the control core.
//!
//! These types define stable contracts between the classifier, the safety gate,
//! the execution engine and the domain workflows. They do not depend on external
//! state or I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Task domain; selects which workflow handles a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Coding,
    Research,
    Data,
    General,
}

impl Domain {
    /// Fixed order used for iteration and fallback tie-breaking.
    pub const ALL: [Domain; 4] = [
        Domain::Coding,
        Domain::Research,
        Domain::Data,
        Domain::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Coding => "coding",
            Domain::Research => "research",
            Domain::Data => "data",
            Domain::General => "general",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coding" => Ok(Domain::Coding),
            "research" => Ok(Domain::Research),
            "data" => Ok(Domain::Data),
            "general" => Ok(Domain::General),
            other => Err(anyhow!("unknown domain '{other}'")),
        }
    }
}

/// A unit of work submitted by a caller. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    pub session_id: String,
    pub domain_hint: Option<Domain>,
}

impl Task {
    pub fn new(description: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            session_id: session_id.into(),
            domain_hint: None,
        }
    }

    pub fn with_domain_hint(mut self, domain: Domain) -> Self {
        self.domain_hint = Some(domain);
        self
    }
}

/// Outcome of intent classification, produced once per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub domain: Domain,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub reasoning: String,
    pub used_fallback: bool,
    /// Set when the backend answered below the configured threshold.
    pub low_confidence: bool,
}

/// Lifecycle state of one execution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Planning,
    Executing,
    Reflecting,
    Completed,
    Error,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Error)
    }
}

/// Closed set of action kinds across all domains.
///
/// Each workflow recognizes a subset (its vocabulary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    ReadFile,
    WriteFile,
    ListDirectory,
    SearchFiles,
    SearchContent,
    SearchCode,
    RunCommand,
    RunTests,
    RunCode,
    GitStatus,
    Analyze,
    Complete,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::ReadFile => "read-file",
            ActionKind::WriteFile => "write-file",
            ActionKind::ListDirectory => "list-directory",
            ActionKind::SearchFiles => "search-files",
            ActionKind::SearchContent => "search-content",
            ActionKind::SearchCode => "search-code",
            ActionKind::RunCommand => "run-command",
            ActionKind::RunTests => "run-tests",
            ActionKind::RunCode => "run-code",
            ActionKind::GitStatus => "git-status",
            ActionKind::Analyze => "analyze",
            ActionKind::Complete => "complete",
        }
    }

    /// Parameters the action understands, for prompts. `?` marks optional ones.
    pub fn parameter_hint(self) -> &'static str {
        match self {
            ActionKind::ReadFile => "path",
            ActionKind::WriteFile => "path, content",
            ActionKind::ListDirectory => "path?",
            ActionKind::SearchFiles => "pattern (glob), path?",
            ActionKind::SearchContent | ActionKind::SearchCode => {
                "query (regex), path?, file_pattern?"
            }
            ActionKind::RunCommand | ActionKind::RunTests => "command",
            ActionKind::RunCode => "code, language? (python3, sh, bash, node)",
            ActionKind::GitStatus => "",
            ActionKind::Analyze => "notes",
            ActionKind::Complete => "summary",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed step: a kind plus free-form parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            parameters: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// String parameter lookup; non-string values are ignored.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// What the safety gate must authorize before this action may run.
    pub fn safety_subject(&self) -> SafetySubject {
        match self.kind {
            ActionKind::ReadFile => self.file_subject(AccessMode::Read, None),
            ActionKind::ListDirectory
            | ActionKind::SearchFiles
            | ActionKind::SearchContent
            | ActionKind::SearchCode => self.file_subject(AccessMode::Read, Some(".")),
            ActionKind::WriteFile => self.file_subject(AccessMode::Write, None),
            ActionKind::RunCommand | ActionKind::RunTests => match self.param("command") {
                Some(command) => SafetySubject::Command(command.to_string()),
                None => SafetySubject::Internal,
            },
            ActionKind::RunCode => match self.param("code") {
                Some(code) => {
                    let interpreter = self.param("language").unwrap_or("python3");
                    SafetySubject::Command(format!("{interpreter} -c {code}"))
                }
                None => SafetySubject::Internal,
            },
            ActionKind::GitStatus => SafetySubject::Command("git status".to_string()),
            ActionKind::Analyze | ActionKind::Complete => SafetySubject::Internal,
        }
    }

    fn file_subject(&self, mode: AccessMode, default_path: Option<&str>) -> SafetySubject {
        match self.param("path").or(default_path) {
            Some(path) => SafetySubject::File {
                path: path.to_string(),
                mode,
            },
            None => SafetySubject::Internal,
        }
    }

    /// Short human-readable label, e.g. `read-file parser.c`.
    pub fn label(&self) -> String {
        let target = self
            .param("path")
            .or_else(|| self.param("command"))
            .or_else(|| self.param("pattern"))
            .or_else(|| self.param("query"));
        match target {
            Some(target) => format!("{} {}", self.kind, target),
            None => self.kind.to_string(),
        }
    }
}

/// File access mode checked by the safety gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
}

/// The side effect an action would have, as seen by the safety gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetySubject {
    Command(String),
    File { path: String, mode: AccessMode },
    /// No command or file access (analysis, completion, malformed actions).
    Internal,
}

/// Why a safety decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Allowed,
    Denylisted,
    DangerousPattern,
    SystemPath,
    ProtectedPath,
    NotAllowlisted,
}

impl ReasonCode {
    pub const VIOLATIONS: [ReasonCode; 5] = [
        ReasonCode::Denylisted,
        ReasonCode::DangerousPattern,
        ReasonCode::SystemPath,
        ReasonCode::ProtectedPath,
        ReasonCode::NotAllowlisted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::Allowed => "allowed",
            ReasonCode::Denylisted => "denylisted",
            ReasonCode::DangerousPattern => "dangerous_pattern",
            ReasonCode::SystemPath => "system_path",
            ReasonCode::ProtectedPath => "protected_path",
            ReasonCode::NotAllowlisted => "not_allowlisted",
        }
    }
}

/// Result of one authorization check. Computed fresh per action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyDecision {
    pub allowed: bool,
    pub reason_code: ReasonCode,
    pub message: String,
    pub decided_at: DateTime<Utc>,
}

impl SafetyDecision {
    pub fn allow(message: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason_code: ReasonCode::Allowed,
            message: message.into(),
            decided_at: Utc::now(),
        }
    }

    pub fn deny(reason_code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason_code,
            message: message.into(),
            decided_at: Utc::now(),
        }
    }
}

/// Outcome of running an allowed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ActionOutput {
    Success { content: String },
    Failure { message: String, fatal: bool },
}

/// Append-only log entry pairing an action with its authorization and outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub step_id: String,
    pub action: Action,
    pub safety_decision: SafetyDecision,
    /// `None` when the action was denied and never ran.
    pub output: Option<ActionOutput>,
    /// When the output was captured.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActionRecord {
    pub fn succeeded(&self) -> bool {
        matches!(self.output, Some(ActionOutput::Success { .. }))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.output, Some(ActionOutput::Failure { fatal: true, .. }))
    }

    pub fn was_denied(&self) -> bool {
        !self.safety_decision.allowed
    }
}

/// Why a run ended in the `Error` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    PlanningFailed,
    ReflectionFailed,
    FatalAction,
    IterationBudgetExhausted,
    /// Reflection chose to stop before the domain reported completion.
    Abandoned,
    Cancelled,
    TimedOut,
}

impl ErrorReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorReason::PlanningFailed => "planning failed",
            ErrorReason::ReflectionFailed => "reflection failed",
            ErrorReason::FatalAction => "fatal action error",
            ErrorReason::IterationBudgetExhausted => "iteration budget exhausted",
            ErrorReason::Abandoned => "stopped before completion",
            ErrorReason::Cancelled => "cancelled",
            ErrorReason::TimedOut => "timed out",
        }
    }
}

/// An error recorded during a run, tagged with the phase it happened in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub phase: Status,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// File produced by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    pub language: String,
    pub filename: String,
    pub content: String,
}

impl Artifact {
    /// A written file, with the language inferred from its extension.
    pub fn file(filename: impl Into<String>, content: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            kind: "file".to_string(),
            language: language_for(&filename).to_string(),
            filename,
            content: content.into(),
        }
    }
}

/// Language tag for a file name, `text` when unknown.
pub fn language_for(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "sh" | "bash" => "bash",
        "md" => "markdown",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "csv" => "csv",
        "html" | "htm" => "html",
        "css" => "css",
        "sql" => "sql",
        _ => "text",
    }
}

/// Mutable state of one run. Owned exclusively by that run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub iteration: u32,
    pub status: Status,
    pub plan: String,
    pub action_history: Vec<ActionRecord>,
    pub accumulated_results: BTreeMap<String, String>,
    pub errors: Vec<ErrorRecord>,
    /// Whether the latest reflection claimed the task is done.
    pub completion_claimed: bool,
    /// Latest reflection summary.
    pub summary: Option<String>,
    /// Executing phases that did not run anything (denied or idle).
    pub stalled: u32,
    pub error_reason: Option<ErrorReason>,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self {
            iteration: 0,
            status: Status::Pending,
            plan: String::new(),
            action_history: Vec::new(),
            accumulated_results: BTreeMap::new(),
            errors: Vec::new(),
            completion_claimed: false,
            summary: None,
            stalled: 0,
            error_reason: None,
        }
    }
}

impl ExecutionState {
    pub fn last_record(&self) -> Option<&ActionRecord> {
        self.action_history.last()
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(ErrorRecord {
            phase: self.status,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// True if an action of `kind` ran successfully at some point.
    pub fn has_succeeded(&self, kind: ActionKind) -> bool {
        self.action_history
            .iter()
            .any(|record| record.action.kind == kind && record.succeeded())
    }
}

/// Final result handed back to the caller. Produced once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    pub output: String,
    pub iterations: u32,
    pub errors: Vec<String>,
    pub artifacts: Vec<Artifact>,
}
