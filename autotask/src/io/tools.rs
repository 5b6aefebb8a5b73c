//! Tool registry abstraction and the command-backed implementation.
//!
//! The [`ToolRegistry`] trait decouples step execution from how tools are
//! actually run. Tests use scripted registries that return canned results.

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::config::ToolConfig;
use crate::io::process::{command_from_argv, run_command};

/// Named tools a planner may choose from and the step executor invokes.
pub trait ToolRegistry {
    /// Tool names `user_id` may plan with.
    fn list_allowed_tools(&self, user_id: &str) -> Result<Vec<String>>;

    /// Run `tool` with `input` and return its raw result.
    fn invoke(&self, tool: &str, input: &Value) -> Result<Value>;
}

/// Tools declared as `[[tools]]` entries and run as child processes.
///
/// The input JSON is written to the tool's stdin. Stdout is parsed as JSON;
/// anything else is returned as a JSON string.
#[derive(Debug, Clone, Default)]
pub struct CommandToolRegistry {
    tools: Vec<ToolConfig>,
}

impl CommandToolRegistry {
    pub fn new(tools: Vec<ToolConfig>) -> Self {
        Self { tools }
    }

    fn find(&self, name: &str) -> Option<&ToolConfig> {
        self.tools.iter().find(|tool| tool.name == name)
    }
}

impl ToolRegistry for CommandToolRegistry {
    fn list_allowed_tools(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .tools
            .iter()
            .filter(|tool| tool.allows(user_id))
            .map(|tool| tool.name.clone())
            .collect())
    }

    #[instrument(skip_all, fields(tool = %tool))]
    fn invoke(&self, tool: &str, input: &Value) -> Result<Value> {
        let config = self
            .find(tool)
            .ok_or_else(|| anyhow!("unknown tool '{tool}'"))?;
        let cmd = command_from_argv(&config.command)
            .with_context(|| format!("tool '{tool}' command"))?;
        let payload = serde_json::to_vec(input).context("serialize tool input")?;

        info!("invoking tool");
        let output = run_command(cmd, &payload, config.timeout(), config.output_limit_bytes)
            .with_context(|| format!("run tool '{tool}'"))?;
        if let Err(err) = output.ensure_success(&format!("tool '{tool}'")) {
            warn!(err = %err, "tool failed");
            return Err(err);
        }

        let stdout = output.stdout_text();
        let trimmed = stdout.trim();
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => Ok(value),
            Err(_) => {
                debug!(bytes = trimmed.len(), "tool returned plain text");
                Ok(Value::String(trimmed.to_string()))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, script: &str, allowed: &[&str]) -> ToolConfig {
        ToolConfig {
            name: name.to_string(),
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            allowed_users: allowed.iter().map(|user| user.to_string()).collect(),
            timeout_secs: 5,
            ..ToolConfig::default()
        }
    }

    #[test]
    fn allowed_tools_respect_user_lists() {
        let registry = CommandToolRegistry::new(vec![
            tool("search", "cat", &[]),
            tool("mail", "cat", &["u1"]),
        ]);
        assert_eq!(
            registry.list_allowed_tools("u1").expect("list"),
            vec!["search", "mail"]
        );
        assert_eq!(registry.list_allowed_tools("u2").expect("list"), vec!["search"]);
    }

    #[test]
    fn json_stdout_is_parsed() {
        let registry = CommandToolRegistry::new(vec![tool("echo", "cat", &[])]);
        let result = registry
            .invoke("echo", &json!({"query": "rust"}))
            .expect("invoke");
        assert_eq!(result, json!({"query": "rust"}));
    }

    #[test]
    fn plain_stdout_is_wrapped_as_string() {
        let registry = CommandToolRegistry::new(vec![tool("hello", "echo hello world", &[])]);
        let result = registry.invoke("hello", &json!({})).expect("invoke");
        assert_eq!(result, json!("hello world"));
    }

    #[test]
    fn failing_and_unknown_tools_error() {
        let registry = CommandToolRegistry::new(vec![tool("bad", "echo nope >&2; exit 1", &[])]);
        let err = registry.invoke("bad", &json!({})).expect_err("fails");
        assert!(err.to_string().contains("nope"));
        assert!(registry.invoke("ghost", &json!({})).is_err());
    }
}
