//! Read-only git adapter backing the `git-status` action.
//!
//! Only inspection commands are issued here; anything that changes the
//! repository goes through `run-command` and the safety gate.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Current branch name, or `None` on a detached HEAD.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            return Ok(None);
        }
        Ok(Some(name))
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Branch plus porcelain status, rendered for the model.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn status_report(&self) -> Result<String> {
        let branch = self.current_branch()?;
        let entries = self.status_porcelain()?;
        debug!(changed = entries.len(), "git status collected");
        Ok(render_status(branch.as_deref(), &entries))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Human-readable status summary.
pub fn render_status(branch: Option<&str>, entries: &[StatusEntry]) -> String {
    let mut out = match branch {
        Some(branch) => format!("branch: {branch}\n"),
        None => "branch: (detached HEAD)\n".to_string(),
    };
    if entries.is_empty() {
        out.push_str("working tree clean\n");
        return out;
    }
    for entry in entries {
        out.push_str(&format!("{} {}\n", entry.code, entry.path));
    }
    out
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn rejects_short_lines() {
        assert!(parse_status_line("M").is_err());
    }

    #[test]
    fn renders_clean_and_dirty_trees() {
        assert_eq!(
            render_status(Some("main"), &[]),
            "branch: main\nworking tree clean\n"
        );
        let entries = vec![StatusEntry {
            code: " M".to_string(),
            path: "parser.c".to_string(),
        }];
        assert_eq!(
            render_status(None, &entries),
            "branch: (detached HEAD)\n M parser.c\n"
        );
    }

    #[test]
    fn status_outside_a_repository_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        assert!(git.status_report().is_err());
    }
}
