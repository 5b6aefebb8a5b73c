//! Text-generation backends.
//!
//! The [`LlmBackend`] trait turns a rendered prompt into a raw reply. It knows
//! nothing about call shapes or response formats; see
//! [`crate::io::completion`] for that.

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument, warn};

use crate::io::config::CompletionConfig;
use crate::io::process::{command_from_argv, run_command};

pub trait LlmBackend {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Backend that writes the prompt to a configured command's stdin and reads
/// the reply from its stdout.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    config: CompletionConfig,
}

impl CommandBackend {
    pub fn new(config: CompletionConfig) -> Self {
        Self { config }
    }
}

impl LlmBackend for CommandBackend {
    #[instrument(skip_all, fields(prompt_bytes = prompt.len()))]
    fn complete(&self, prompt: &str) -> Result<String> {
        let cmd = command_from_argv(&self.config.command).context("completion command")?;
        let output = run_command(
            cmd,
            prompt.as_bytes(),
            self.config.timeout(),
            self.config.output_limit_bytes,
        )
        .context("run completion command")?;
        if let Err(err) = output.ensure_success("completion command") {
            warn!(err = %err, "completion failed");
            return Err(err);
        }
        let reply = output.stdout_text();
        if reply.trim().is_empty() {
            bail!("completion command returned an empty reply");
        }
        debug!(reply_bytes = reply.len(), "completion finished");
        Ok(reply)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn backend(script: &str) -> CommandBackend {
        CommandBackend::new(CompletionConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout_secs: 5,
            ..CompletionConfig::default()
        })
    }

    #[test]
    fn prompt_goes_through_stdin() {
        let reply = backend("tr a-z A-Z").complete("plan this").expect("complete");
        assert_eq!(reply, "PLAN THIS");
    }

    #[test]
    fn empty_reply_is_an_error() {
        let err = backend("cat >/dev/null").complete("x").expect_err("empty");
        assert!(err.to_string().contains("empty reply"));
    }
}
