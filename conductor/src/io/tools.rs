//! Tool executor abstraction and the local implementation.
//!
//! The [`ToolExecutor`] trait is the only thing the engine knows about side
//! effects: `invoke(action) -> output or error`. [`LocalTools`] runs actions
//! against a workspace directory; tests use scripted executors instead.
//!
//! Every action reaching `invoke` has already passed the safety gate.
//! [`LocalTools`] holds the same gate to resolve paths exactly as the check
//! did and to keep directory walks out of entries a read check would refuse.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::core::types::{Action, ActionKind, Artifact};
use crate::io::git::Git;
use crate::io::process::{CommandOutput, run_command_with_timeout, shell_command};
use crate::safety::SafetyGate;

/// Cap on search hits returned to the model.
const MAX_SEARCH_RESULTS: usize = 200;
/// Files larger than this are skipped by content search.
const MAX_SEARCHED_FILE_BYTES: u64 = 1_000_000;
/// Directories never descended into by searches.
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "__pycache__"];

/// Per-workflow execution bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolLimits {
    /// Truncate process output and listings beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Truncate file reads beyond this many bytes.
    pub read_limit_bytes: usize,
    pub command_timeout: Duration,
}

impl ToolLimits {
    pub fn new(output_limit_bytes: usize, command_timeout: Duration) -> Self {
        Self {
            output_limit_bytes,
            read_limit_bytes: output_limit_bytes,
            command_timeout,
        }
    }

    pub fn with_read_multiplier(mut self, multiplier: usize) -> Self {
        self.read_limit_bytes = self.output_limit_bytes.saturating_mul(multiplier);
        self
    }
}

/// Successful tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    /// Set by actions that produce a file the caller should see.
    pub artifact: Option<Artifact>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            artifact: None,
        }
    }
}

/// Tool failure. Only [`ToolError::Aborted`] is fatal to the run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid parameters for {kind}: {message}")]
    InvalidParameters { kind: ActionKind, message: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("command exited with status {exit_code:?}\n{output}")]
    Failed {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("command timed out after {}s\n{output}", timeout.as_secs())]
    TimedOut { timeout: Duration, output: String },

    #[error("action '{0}' is not supported by this executor")]
    Unsupported(ActionKind),

    /// The environment is unusable (no shell, executor crashed).
    #[error("aborted: {0}")]
    Aborted(String),
}

impl ToolError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ToolError::Aborted(_))
    }

    fn missing(kind: ActionKind, param: &str) -> Self {
        ToolError::InvalidParameters {
            kind,
            message: format!("missing string parameter '{param}'"),
        }
    }
}

/// Abstraction over action executors (filesystem, process, git, search).
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn invoke(&self, action: &Action, limits: &ToolLimits) -> Result<ToolOutput, ToolError>;
}

/// Executes actions against the gate's base directory.
#[derive(Debug, Clone)]
pub struct LocalTools {
    gate: Arc<SafetyGate>,
}

impl LocalTools {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self { gate }
    }

    fn root(&self) -> &Path {
        self.gate.base_dir()
    }

    fn resolve(&self, raw: &str) -> PathBuf {
        PathBuf::from(self.gate.resolve(raw).text)
    }

    fn run_sync(&self, action: &Action, limits: &ToolLimits) -> Result<ToolOutput, ToolError> {
        let kind = action.kind;
        let required = |key: &str| action.param(key).ok_or_else(|| ToolError::missing(kind, key));
        match kind {
            ActionKind::ReadFile => self.read_file(required("path")?, limits),
            ActionKind::WriteFile => self.write_file(required("path")?, required("content")?),
            ActionKind::ListDirectory => {
                self.list_directory(action.param("path").unwrap_or("."), limits)
            }
            ActionKind::SearchFiles => self.search_files(
                action.param("path").unwrap_or("."),
                required("pattern")?,
                limits,
            ),
            ActionKind::SearchContent | ActionKind::SearchCode => self.search_content(
                kind,
                action.param("path").unwrap_or("."),
                required("query")?,
                action.param("file_pattern"),
                limits,
            ),
            ActionKind::RunCommand | ActionKind::RunTests => {
                let mut cmd = shell_command(required("command")?);
                cmd.current_dir(self.root());
                let output = run_command_with_timeout(
                    cmd,
                    None,
                    limits.command_timeout,
                    limits.output_limit_bytes,
                )
                .map_err(|e| ToolError::Aborted(format!("{e:#}")))?;
                self.finish_process(output, limits)
            }
            ActionKind::RunCode => {
                let code = required("code")?;
                let language = action.param("language").unwrap_or("python3");
                let (program, flag) = interpreter(kind, language)?;
                let mut cmd = std::process::Command::new(program);
                cmd.arg(flag).arg(code).current_dir(self.root());
                let output = run_command_with_timeout(
                    cmd,
                    None,
                    limits.command_timeout,
                    limits.output_limit_bytes,
                )
                .map_err(|e| ToolError::Io(format!("{e:#}")))?;
                self.finish_process(output, limits)
            }
            ActionKind::GitStatus => Git::new(self.root())
                .status_report()
                .map(ToolOutput::text)
                .map_err(|e| ToolError::Failed {
                    exit_code: None,
                    output: format!("{e:#}"),
                }),
            ActionKind::Analyze | ActionKind::Complete => Err(ToolError::Unsupported(kind)),
        }
    }

    fn finish_process(
        &self,
        output: CommandOutput,
        limits: &ToolLimits,
    ) -> Result<ToolOutput, ToolError> {
        let text = output.render("command");
        if output.timed_out {
            return Err(ToolError::TimedOut {
                timeout: limits.command_timeout,
                output: text,
            });
        }
        if !output.status.success() {
            return Err(ToolError::Failed {
                exit_code: output.status.code(),
                output: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(ToolOutput::text("(no output)"));
        }
        Ok(ToolOutput::text(text))
    }

    fn read_file(&self, raw: &str, limits: &ToolLimits) -> Result<ToolOutput, ToolError> {
        let path = self.resolve(raw);
        let bytes = fs::read(&path).map_err(|e| io_error("read", &path, &e))?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(ToolOutput::text(truncate_output(&text, limits.read_limit_bytes)))
    }

    fn write_file(&self, raw: &str, content: &str) -> Result<ToolOutput, ToolError> {
        let path = self.resolve(raw);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error("create directory", parent, &e))?;
        }
        fs::write(&path, content).map_err(|e| io_error("write", &path, &e))?;
        debug!(path = %path.display(), bytes = content.len(), "file written");
        Ok(ToolOutput {
            content: format!("wrote {} bytes to {raw}", content.len()),
            artifact: Some(Artifact::file(raw, content)),
        })
    }

    fn list_directory(&self, raw: &str, limits: &ToolLimits) -> Result<ToolOutput, ToolError> {
        let path = self.resolve(raw);
        let entries = fs::read_dir(&path).map_err(|e| io_error("list", &path, &e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error("list", &path, &e))?;
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        if names.is_empty() {
            return Ok(ToolOutput::text("(empty directory)"));
        }
        Ok(ToolOutput::text(truncate_output(
            &names.join("\n"),
            limits.output_limit_bytes,
        )))
    }

    fn search_files(
        &self,
        raw: &str,
        pattern: &str,
        limits: &ToolLimits,
    ) -> Result<ToolOutput, ToolError> {
        let base = self.resolve(raw);
        let glob = Pattern::new(pattern).map_err(|e| ToolError::InvalidParameters {
            kind: ActionKind::SearchFiles,
            message: format!("invalid glob '{pattern}': {e}"),
        })?;
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        let mut hits = Vec::new();
        for entry in walk(&base, &self.gate) {
            let relative = relative_display(&base, entry.path());
            let name = entry.file_name().to_string_lossy();
            if glob.matches_with(&name, options) || glob.matches_with(&relative, options) {
                hits.push(relative);
                if hits.len() >= MAX_SEARCH_RESULTS {
                    break;
                }
            }
        }
        if hits.is_empty() {
            return Ok(ToolOutput::text(format!("no files match '{pattern}'")));
        }
        Ok(ToolOutput::text(truncate_output(
            &hits.join("\n"),
            limits.output_limit_bytes,
        )))
    }

    fn search_content(
        &self,
        kind: ActionKind,
        raw: &str,
        query: &str,
        file_pattern: Option<&str>,
        limits: &ToolLimits,
    ) -> Result<ToolOutput, ToolError> {
        let base = self.resolve(raw);
        let regex = Regex::new(&format!("(?i){query}"))
            .or_else(|_| Regex::new(&format!("(?i){}", regex::escape(query))))
            .map_err(|e| ToolError::InvalidParameters {
                kind,
                message: format!("invalid query '{query}': {e}"),
            })?;
        let filter = file_pattern
            .map(Pattern::new)
            .transpose()
            .map_err(|e| ToolError::InvalidParameters {
                kind,
                message: format!("invalid file_pattern: {e}"),
            })?;

        let mut hits = Vec::new();
        'files: for entry in walk(&base, &self.gate) {
            if let Some(filter) = &filter
                && !filter.matches(&entry.file_name().to_string_lossy())
            {
                continue;
            }
            if entry.metadata().is_ok_and(|m| m.len() > MAX_SEARCHED_FILE_BYTES) {
                continue;
            }
            let Ok(contents) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let relative = relative_display(&base, entry.path());
            for (number, line) in contents.lines().enumerate() {
                if regex.is_match(line) {
                    hits.push(format!("{relative}:{}: {}", number + 1, line.trim()));
                    if hits.len() >= MAX_SEARCH_RESULTS {
                        break 'files;
                    }
                }
            }
        }
        if hits.is_empty() {
            return Ok(ToolOutput::text(format!("no matches for '{query}'")));
        }
        Ok(ToolOutput::text(truncate_output(
            &hits.join("\n"),
            limits.output_limit_bytes,
        )))
    }
}

#[async_trait]
impl ToolExecutor for LocalTools {
    #[instrument(skip_all, fields(kind = %action.kind))]
    async fn invoke(&self, action: &Action, limits: &ToolLimits) -> Result<ToolOutput, ToolError> {
        let tools = self.clone();
        let action = action.clone();
        let limits = *limits;
        tokio::task::spawn_blocking(move || tools.run_sync(&action, &limits))
            .await
            .map_err(|e| ToolError::Aborted(format!("tool task failed: {e}")))?
    }
}

fn interpreter(kind: ActionKind, language: &str) -> Result<(&'static str, &'static str), ToolError> {
    match language.to_ascii_lowercase().as_str() {
        "python" | "python3" => Ok(("python3", "-c")),
        "sh" => Ok(("sh", "-c")),
        "bash" => Ok(("bash", "-c")),
        "node" | "javascript" | "js" => Ok(("node", "-e")),
        other => Err(ToolError::InvalidParameters {
            kind,
            message: format!("unsupported language '{other}'"),
        }),
    }
}

fn io_error(what: &str, path: &Path, err: &std::io::Error) -> ToolError {
    ToolError::Io(format!("{what} {}: {err}", path.display()))
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref())
}

/// Regular files under `base` that `gate` would let be read, in a stable
/// order. Refused directories are not descended into.
fn walk<'a>(base: &Path, gate: &'a SafetyGate) -> impl Iterator<Item = DirEntry> + 'a {
    WalkDir::new(base)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| !is_skipped(entry) && gate.permits_read(entry.path()))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
}

fn relative_display(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Truncate `text` to `limit` bytes on a char boundary, appending a notice.
pub fn truncate_output(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n[truncated {} bytes]\n",
        &text[..cut],
        text.len() - cut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::SafetyPolicy;
    use crate::test_support::gate_at;

    fn limits() -> ToolLimits {
        ToolLimits::new(10_000, Duration::from_secs(10))
    }

    fn workspace() -> (tempfile::TempDir, LocalTools) {
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = gate_at(&SafetyPolicy::default(), temp.path());
        (temp, LocalTools::new(Arc::new(gate)))
    }

    #[tokio::test]
    async fn write_then_read_produces_artifact() {
        let (_temp, tools) = workspace();
        let write = Action::new(ActionKind::WriteFile)
            .with_param("path", "src/parser.c")
            .with_param("content", "int parse(void) { return 0; }\n");
        let output = tools.invoke(&write, &limits()).await.expect("write");
        let artifact = output.artifact.expect("artifact");
        assert_eq!(artifact.filename, "src/parser.c");
        assert_eq!(artifact.language, "c");

        let read = Action::new(ActionKind::ReadFile).with_param("path", "src/parser.c");
        let output = tools.invoke(&read, &limits()).await.expect("read");
        assert!(output.content.contains("int parse"));
        assert!(output.artifact.is_none());
    }

    #[tokio::test]
    async fn reads_are_truncated_to_the_read_limit() {
        let (temp, tools) = workspace();
        fs::write(temp.path().join("big.txt"), "x".repeat(100)).expect("write");
        let read = Action::new(ActionKind::ReadFile).with_param("path", "big.txt");
        let small = ToolLimits::new(10, Duration::from_secs(1));
        let output = tools.invoke(&read, &small).await.expect("read");
        assert!(output.content.contains("[truncated 90 bytes]"));

        let larger = small.with_read_multiplier(4);
        let output = tools.invoke(&read, &larger).await.expect("read");
        assert!(output.content.contains("[truncated 60 bytes]"));
    }

    #[tokio::test]
    async fn missing_parameters_are_invalid() {
        let (_temp, tools) = workspace();
        let err = tools
            .invoke(&Action::new(ActionKind::ReadFile), &limits())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn reading_a_missing_file_is_an_io_error() {
        let (_temp, tools) = workspace();
        let read = Action::new(ActionKind::ReadFile).with_param("path", "nope.txt");
        let err = tools.invoke(&read, &limits()).await.unwrap_err();
        assert!(matches!(err, ToolError::Io(_)));
    }

    #[tokio::test]
    async fn lists_directories_sorted_with_markers() {
        let (temp, tools) = workspace();
        fs::create_dir(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("b.txt"), "").expect("write");
        fs::write(temp.path().join("a.txt"), "").expect("write");
        let output = tools
            .invoke(&Action::new(ActionKind::ListDirectory), &limits())
            .await
            .expect("list");
        assert_eq!(output.content, "a.txt\nb.txt\nsrc/");
    }

    #[tokio::test]
    async fn searches_files_by_glob_skipping_vendor_dirs() {
        let (temp, tools) = workspace();
        fs::create_dir_all(temp.path().join("src/nested")).expect("mkdir");
        fs::create_dir_all(temp.path().join("node_modules/pkg")).expect("mkdir");
        fs::write(temp.path().join("src/nested/data.csv"), "a,b").expect("write");
        fs::write(temp.path().join("node_modules/pkg/x.csv"), "a,b").expect("write");
        let action = Action::new(ActionKind::SearchFiles).with_param("pattern", "*.csv");
        let output = tools.invoke(&action, &limits()).await.expect("search");
        assert_eq!(output.content, "src/nested/data.csv");
    }

    #[tokio::test]
    async fn searches_content_with_line_numbers() {
        let (temp, tools) = workspace();
        fs::write(
            temp.path().join("parser.c"),
            "int a;\nchar *p = NULL;\n*p = 1;\n",
        )
        .expect("write");
        let action = Action::new(ActionKind::SearchCode)
            .with_param("query", "null")
            .with_param("file_pattern", "*.c");
        let output = tools.invoke(&action, &limits()).await.expect("search");
        assert_eq!(output.content, "parser.c:2: char *p = NULL;");
    }

    #[tokio::test]
    async fn content_search_skips_protected_files() {
        let (temp, tools) = workspace();
        fs::write(temp.path().join(".env"), "API_KEY=supersecret\n").expect("write");
        fs::write(temp.path().join("settings.toml"), "API_KEY = \"from-env\"\n").expect("write");
        fs::create_dir_all(temp.path().join("certs")).expect("mkdir");
        fs::write(temp.path().join("certs/server.pem"), "API_KEY pem body\n").expect("write");
        let action = Action::new(ActionKind::SearchContent).with_param("query", "API_KEY");
        let output = tools.invoke(&action, &limits()).await.expect("search");
        assert_eq!(output.content, "settings.toml:1: API_KEY = \"from-env\"");
        assert!(!output.content.contains("supersecret"));
    }

    #[tokio::test]
    async fn file_search_does_not_list_protected_files() {
        let (temp, tools) = workspace();
        fs::write(temp.path().join(".env"), "API_KEY=supersecret\n").expect("write");
        fs::write(temp.path().join(".env.example"), "API_KEY=\n").expect("write");
        fs::write(temp.path().join("id_rsa"), "key").expect("write");
        fs::write(temp.path().join("readme.md"), "docs").expect("write");
        let action = Action::new(ActionKind::SearchFiles).with_param("pattern", "*");
        let output = tools.invoke(&action, &limits()).await.expect("search");
        assert_eq!(output.content, "readme.md");
    }

    #[tokio::test]
    async fn invalid_regex_queries_fall_back_to_literal() {
        let (temp, tools) = workspace();
        fs::write(temp.path().join("a.rs"), "fn f(x: (u8\n").expect("write");
        let action = Action::new(ActionKind::SearchContent).with_param("query", "(u8");
        let output = tools.invoke(&action, &limits()).await.expect("search");
        assert!(output.content.starts_with("a.rs:1:"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_commands_report_exit_code() {
        let (_temp, tools) = workspace();
        let ok = Action::new(ActionKind::RunCommand).with_param("command", "echo hi");
        let output = tools.invoke(&ok, &limits()).await.expect("run");
        assert_eq!(output.content, "hi\n");

        let failing = Action::new(ActionKind::RunTests).with_param("command", "exit 2");
        let err = tools.invoke(&failing, &limits()).await.unwrap_err();
        assert!(matches!(
            err,
            ToolError::Failed {
                exit_code: Some(2),
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn commands_run_in_the_workspace_root() {
        let (temp, tools) = workspace();
        fs::write(temp.path().join("marker.txt"), "").expect("write");
        let action = Action::new(ActionKind::RunCommand).with_param("command", "ls");
        let output = tools.invoke(&action, &limits()).await.expect("run");
        assert!(output.content.contains("marker.txt"));
    }

    #[tokio::test]
    async fn internal_kinds_are_unsupported() {
        let (_temp, tools) = workspace();
        let err = tools
            .invoke(&Action::new(ActionKind::Analyze), &limits())
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Unsupported(ActionKind::Analyze));
    }

    #[test]
    fn unknown_languages_are_rejected() {
        assert!(interpreter(ActionKind::RunCode, "cobol").is_err());
        assert_eq!(
            interpreter(ActionKind::RunCode, "Python").expect("python"),
            ("python3", "-c")
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo";
        let out = truncate_output(text, 2);
        assert!(out.starts_with('h'));
        assert!(out.contains("[truncated"));
        assert_eq!(truncate_output("short", 10), "short");
    }
}
