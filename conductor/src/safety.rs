//! Safety gate: the ordered authorization check applied to every command and
//! file access before it runs.
//!
//! Check order is fixed: denylist, dangerous constructs, OS-critical paths,
//! protected paths (file access only), allowlist. A later check never
//! overrides an earlier denial.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::path::{self, PathFlavor};
use crate::core::policy::{self, CommandRules, PathRules, ResolvedPath, SafetyPolicy};
use crate::core::stats::{self, SafetyStats};
use crate::core::types::{AccessMode, ReasonCode, SafetyDecision, SafetySubject};

/// Compiled, read-only safety policy plus the context needed to resolve paths.
#[derive(Debug)]
pub struct SafetyGate {
    commands: CommandRules,
    paths: PathRules,
    home: Option<String>,
    base_dir: String,
    stats: Arc<SafetyStats>,
}

impl SafetyGate {
    /// Build a gate for the current user and working directory, reporting to
    /// the process-wide safety statistics.
    pub fn new(policy: &SafetyPolicy) -> Result<Self> {
        let base_dir = std::env::current_dir().context("resolve working directory")?;
        Self::with_context(policy, dirs::home_dir(), &base_dir, stats::safety_stats())
    }

    /// Build a gate with an explicit home directory, base directory for
    /// relative paths, and statistics sink.
    pub fn with_context(
        policy: &SafetyPolicy,
        home: Option<PathBuf>,
        base_dir: &Path,
        stats: Arc<SafetyStats>,
    ) -> Result<Self> {
        let home = home.map(|home| path::to_slashes(&home.to_string_lossy()));
        let base_dir = path::to_slashes(&base_dir.to_string_lossy());
        let commands = CommandRules::compile(policy).context("compile command rules")?;
        let paths = PathRules::compile(policy, |raw| {
            resolve_path(raw, home.as_deref(), &base_dir)
        })
        .context("compile path rules")?;
        Ok(Self {
            commands,
            paths,
            home,
            base_dir,
            stats,
        })
    }

    /// Authorize whatever side effect `subject` describes.
    pub fn check(&self, subject: &SafetySubject) -> SafetyDecision {
        match subject {
            SafetySubject::Command(command) => self.check_command(command),
            SafetySubject::File { path, mode } => self.check_file_access(path, *mode),
            SafetySubject::Internal => SafetyDecision::allow("no external side effects"),
        }
    }

    pub fn check_command(&self, command: &str) -> SafetyDecision {
        let decision = self.evaluate_command(command);
        self.finish("command", command, decision)
    }

    pub fn check_file_access(&self, raw_path: &str, mode: AccessMode) -> SafetyDecision {
        let decision = self.evaluate_path(raw_path, mode);
        self.finish("path", raw_path, decision)
    }

    /// Resolve a path the way file-access checks see it.
    pub fn resolve(&self, raw_path: &str) -> ResolvedPath {
        resolve_path(raw_path, self.home.as_deref(), &self.base_dir)
    }

    /// Directory relative paths are resolved against.
    pub fn base_dir(&self) -> &Path {
        Path::new(&self.base_dir)
    }

    /// Whether a read of `path` would be allowed. Nothing is recorded or
    /// logged; used to filter directory walks entry by entry.
    pub fn permits_read(&self, path: &Path) -> bool {
        self.evaluate_path(&path.to_string_lossy(), AccessMode::Read).allowed
    }

    fn evaluate_command(&self, command: &str) -> SafetyDecision {
        if let Some(entry) = self.commands.denylisted(command) {
            return SafetyDecision::deny(
                ReasonCode::Denylisted,
                format!("command matches denylist entry '{entry}'"),
            );
        }
        if let Some(label) = self.commands.dangerous(command) {
            return SafetyDecision::deny(
                ReasonCode::DangerousPattern,
                format!("command contains a dangerous construct ({label})"),
            );
        }
        if let Some(system) = policy::command_system_path(command) {
            return SafetyDecision::deny(
                ReasonCode::SystemPath,
                format!("command references system path {system}"),
            );
        }
        if self.commands.has_allowlist() && !self.commands.allowlisted(command) {
            return SafetyDecision::deny(
                ReasonCode::NotAllowlisted,
                "command is not in the allowlist",
            );
        }
        SafetyDecision::allow("command allowed")
    }

    fn evaluate_path(&self, raw_path: &str, mode: AccessMode) -> SafetyDecision {
        if raw_path.trim().is_empty() {
            return SafetyDecision::deny(ReasonCode::NotAllowlisted, "empty path");
        }
        let target = self.resolve(raw_path);
        let access = match mode {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
        };
        if self.paths.denylisted(&target) {
            return SafetyDecision::deny(
                ReasonCode::Denylisted,
                format!("{access} of {} matches the path denylist", target.text),
            );
        }
        if policy::is_system_path(&target) {
            return SafetyDecision::deny(
                ReasonCode::SystemPath,
                format!("{access} of {} touches a system directory", target.text),
            );
        }
        if let Some(rule) = self.paths.protected(&target) {
            return SafetyDecision::deny(
                ReasonCode::ProtectedPath,
                format!("{access} of {} is protected by '{rule}'", target.text),
            );
        }
        if self.paths.has_allowlist() && !self.paths.allowlisted(&target) {
            return SafetyDecision::deny(
                ReasonCode::NotAllowlisted,
                format!("{access} of {} is outside the path allowlist", target.text),
            );
        }
        SafetyDecision::allow(format!("{access} access allowed"))
    }

    fn finish(&self, what: &str, subject: &str, decision: SafetyDecision) -> SafetyDecision {
        self.stats.record(decision.reason_code);
        if decision.allowed {
            debug!(what, subject, "safety check passed");
        } else {
            warn!(
                what,
                subject,
                reason = decision.reason_code.as_str(),
                message = %decision.message,
                "safety check denied"
            );
        }
        decision
    }
}

/// Expand `~`, make absolute against `base_dir`, normalize, and (for POSIX
/// paths on POSIX hosts) follow symlinks where the path exists.
fn resolve_path(raw: &str, home: Option<&str>, base_dir: &str) -> ResolvedPath {
    let expanded = path::expand_home(raw.trim(), home);
    let slashed = path::to_slashes(&expanded);
    let absolute = if path::is_absolute(&slashed) {
        slashed
    } else {
        path::join(base_dir, &slashed)
    };
    let flavor = path::flavor_of(&absolute);
    let text = path::lexical_normalize(&absolute);
    let text = match flavor {
        PathFlavor::Posix if !cfg!(windows) => canonicalize_lenient(&text).unwrap_or(text),
        _ => text,
    };
    ResolvedPath { text, flavor }
}

/// Canonicalize the longest existing ancestor of `text` and re-append the
/// components that do not exist yet. `text` is already lexically normalized.
fn canonicalize_lenient(text: &str) -> Option<String> {
    let mut current = Path::new(text);
    let mut missing = Vec::new();
    let resolved = loop {
        if let Ok(resolved) = fs::canonicalize(current) {
            break resolved;
        }
        missing.push(current.file_name()?);
        current = current.parent()?;
    };
    let full = missing
        .iter()
        .rev()
        .fold(resolved, |acc, name| acc.join(name));
    Some(path::to_slashes(&full.to_string_lossy()))
}
