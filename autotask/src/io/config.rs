//! Orchestrator configuration stored in `autotask.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{DEFAULT_MAX_ATTEMPTS, DEFAULT_QUALITY_THRESHOLD};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "autotask.toml";

/// Orchestrator configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values the orchestrator was designed around.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutotaskConfig {
    pub orchestrator: OrchestratorConfig,
    pub store: StoreConfig,
    pub completion: CompletionConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Retry ceiling for every plan step.
    pub max_attempts: u32,

    /// A step output must score strictly above this to be accepted.
    pub quality_threshold: f64,

    /// Maximum state transitions per invocation before the run halts.
    pub iteration_limit: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            iteration_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Task file, relative to the directory holding the config file.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".autotask/tasks.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompletionConfig {
    /// Text-generation command; the prompt is written to its stdin.
    pub command: Vec<String>,

    pub timeout_secs: u64,

    /// Truncate completion stdout beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Prompts longer than this drop their optional context first.
    pub prompt_budget_bytes: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "-".to_string(),
            ],
            timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: 40_000,
        }
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One `[[tools]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    pub name: String,

    /// Command to run; the tool input JSON is written to its stdin.
    pub command: Vec<String>,

    /// Users allowed to plan with this tool. Empty allows everyone.
    pub allowed_users: Vec<String>,

    pub timeout_secs: u64,

    pub output_limit_bytes: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            command: Vec::new(),
            allowed_users: Vec::new(),
            timeout_secs: 2 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl ToolConfig {
    pub fn allows(&self, user_id: &str) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.iter().any(|user| user == user_id)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AutotaskConfig {
    pub fn validate(&self) -> Result<()> {
        let orchestrator = &self.orchestrator;
        if orchestrator.max_attempts == 0 {
            return Err(anyhow!("orchestrator.max_attempts must be > 0"));
        }
        if !(0.0..1.0).contains(&orchestrator.quality_threshold) {
            return Err(anyhow!(
                "orchestrator.quality_threshold must be in [0, 1), got {}",
                orchestrator.quality_threshold
            ));
        }
        if orchestrator.iteration_limit == 0 {
            return Err(anyhow!("orchestrator.iteration_limit must be > 0"));
        }
        if self.store.path.as_os_str().is_empty() {
            return Err(anyhow!("store.path must not be empty"));
        }
        if !command_is_set(&self.completion.command) {
            return Err(anyhow!("completion.command must be a non-empty array"));
        }
        if self.completion.timeout_secs == 0 {
            return Err(anyhow!("completion.timeout_secs must be > 0"));
        }
        if self.completion.output_limit_bytes == 0 {
            return Err(anyhow!("completion.output_limit_bytes must be > 0"));
        }
        if self.completion.prompt_budget_bytes == 0 {
            return Err(anyhow!("completion.prompt_budget_bytes must be > 0"));
        }

        let mut names = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(anyhow!("tools[].name must not be empty"));
            }
            if !names.insert(tool.name.as_str()) {
                return Err(anyhow!("duplicate tool name '{}'", tool.name));
            }
            if !command_is_set(&tool.command) {
                return Err(anyhow!("tool '{}': command must be a non-empty array", tool.name));
            }
            if tool.timeout_secs == 0 {
                return Err(anyhow!("tool '{}': timeout_secs must be > 0", tool.name));
            }
            if tool.output_limit_bytes == 0 {
                return Err(anyhow!("tool '{}': output_limit_bytes must be > 0", tool.name));
            }
        }
        Ok(())
    }

    /// Resolve the task file against the directory holding `config_path`.
    pub fn store_path(&self, config_path: &Path) -> PathBuf {
        if self.store.path.is_absolute() {
            return self.store.path.clone();
        }
        match config_path.parent() {
            Some(dir) => dir.join(&self.store.path),
            None => self.store.path.clone(),
        }
    }
}

fn command_is_set(command: &[String]) -> bool {
    command.first().is_some_and(|program| !program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AutotaskConfig::default()`.
pub fn load_config(path: &Path) -> Result<AutotaskConfig> {
    if !path.exists() {
        let cfg = AutotaskConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AutotaskConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AutotaskConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` next to `path` and rename it into place.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path has no file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
