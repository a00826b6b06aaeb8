//! Conductor configuration stored in `conductor.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::policy::SafetyPolicy;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "conductor.toml";
/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "CONDUCTOR_CONFIG";

/// Conductor configuration (TOML).
///
/// Every section is optional; missing fields take the defaults below. The
/// `[safety]` section is loaded once at startup and is read-only afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub classifier: ClassifierConfig,
    pub llm: LlmConfig,
    pub safety: SafetyPolicy,
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum execute/reflect cycles per run.
    pub max_iterations: u32,

    /// Total wall-clock budget per run in seconds.
    pub run_timeout_secs: u64,

    /// Truncate tool output (file reads, process stdout/stderr) beyond this many bytes.
    pub tool_output_limit_bytes: usize,

    /// Kill shell commands that run longer than this.
    pub command_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            run_timeout_secs: 10 * 60,
            tool_output_limit_bytes: 100_000,
            command_timeout_secs: 120,
        }
    }
}

impl EngineConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Timeout for the classification request.
    pub timeout_secs: u64,

    /// Backend answers below this confidence are flagged, not replaced.
    pub low_confidence_threshold: f64,

    /// Confidence reported for keyword fallback results.
    pub fallback_confidence: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            low_confidence_threshold: 0.5,
            fallback_confidence: 0.3,
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 60,
            temperature: 0.2,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Read the API key from the configured variable; an unset or blank key is `None`.
    pub fn api_key(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        lookup(&self.api_key_env).filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Retry a transient planning/reflection failure once before failing the run.
    pub retry_transient_llm_failure: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            retry_transient_llm_failure: true,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_iterations == 0 {
            return Err(anyhow!("engine.max_iterations must be > 0"));
        }
        if self.engine.run_timeout_secs == 0 {
            return Err(anyhow!("engine.run_timeout_secs must be > 0"));
        }
        if self.engine.tool_output_limit_bytes == 0 {
            return Err(anyhow!("engine.tool_output_limit_bytes must be > 0"));
        }
        if self.engine.command_timeout_secs == 0 {
            return Err(anyhow!("engine.command_timeout_secs must be > 0"));
        }
        if self.classifier.timeout_secs == 0 {
            return Err(anyhow!("classifier.timeout_secs must be > 0"));
        }
        for (name, value) in [
            (
                "classifier.low_confidence_threshold",
                self.classifier.low_confidence_threshold,
            ),
            (
                "classifier.fallback_confidence",
                self.classifier.fallback_confidence,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{name} must be within [0, 1]"));
            }
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(anyhow!("llm.base_url must be non-empty"));
        }
        if self.llm.model.trim().is_empty() {
            return Err(anyhow!("llm.model must be non-empty"));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(anyhow!("llm.request_timeout_secs must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(anyhow!("llm.temperature must be within [0, 2]"));
        }
        Ok(())
    }

    /// Apply `CONDUCTOR_*` overrides from `lookup` (usually the process environment).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("CONDUCTOR_LLM_BASE_URL") {
            debug!(%url, "llm base url overridden from environment");
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("CONDUCTOR_LLM_MODEL") {
            debug!(%model, "llm model overridden from environment");
            self.llm.model = model;
        }
        if let Some(raw) = lookup("CONDUCTOR_MAX_ITERATIONS") {
            self.engine.max_iterations = raw
                .trim()
                .parse()
                .with_context(|| format!("parse CONDUCTOR_MAX_ITERATIONS '{raw}'"))?;
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load config from `path`, then apply environment overrides and re-validate.
pub fn load_config_with_env(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig> {
    let mut cfg = load_config(path)?;
    cfg.apply_env_overrides(lookup)?;
    cfg.validate()
        .with_context(|| format!("validate {} with environment overrides", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
