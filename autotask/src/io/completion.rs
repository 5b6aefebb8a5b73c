//! Structured text-generation calls used by the orchestrator.
//!
//! [`Completion`] is the orchestrator's view of the text-generation service:
//! one method per call shape, returning typed values. [`PromptedCompletion`]
//! implements it on top of any [`LlmBackend`] by rendering a prompt, pulling
//! the JSON object out of the reply and validating it against an embedded
//! schema.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::types::{GroupSection, PriorOutput, StepRecord, StepSpec, StepSummary};
use crate::io::llm::LlmBackend;
use crate::io::prompt::PromptEngine;
use crate::io::schema;

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
const INPUT_SCHEMA: &str = include_str!("../../schemas/input.schema.json");
const STEP_SUMMARY_SCHEMA: &str = include_str!("../../schemas/step_summary.schema.json");
const TASK_SUMMARY_SCHEMA: &str = include_str!("../../schemas/task_summary.schema.json");

#[derive(Debug, Clone, Serialize)]
pub struct PlanRequest<'a> {
    pub title: &'a str,
    pub description: &'a str,
    /// Tools the planner may choose from.
    pub tools: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
pub struct InputRequest<'a> {
    pub step_id: &'a str,
    pub tool: &'a str,
    pub objective: &'a str,
    /// Outputs of the step's dependencies, in dependency order.
    pub prior: &'a [PriorOutput],
}

#[derive(Debug, Clone, Serialize)]
pub struct StepSummaryRequest<'a> {
    pub step_id: &'a str,
    pub tool: &'a str,
    pub objective: &'a str,
    pub input: &'a Value,
    pub result: &'a Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSummaryRequest<'a> {
    pub title: &'a str,
    pub description: &'a str,
    /// Completed steps in completion order.
    pub steps: &'a [StepRecord],
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRequest<'a> {
    pub main_title: &'a str,
    /// Group members, main task first.
    pub sections: &'a [GroupSection],
}

/// Text-generation service. Every call may fail or return a malformed
/// payload; callers decide how to degrade.
pub trait Completion {
    fn plan_steps(&self, req: &PlanRequest<'_>) -> Result<Vec<StepSpec>>;

    fn format_input(&self, req: &InputRequest<'_>) -> Result<Value>;

    fn summarize_step(&self, req: &StepSummaryRequest<'_>) -> Result<StepSummary>;

    /// Short narrative summary of a finished task.
    fn summarize_task(&self, req: &TaskSummaryRequest<'_>) -> Result<String>;

    /// Markdown report spanning a whole group.
    fn write_report(&self, req: &ReportRequest<'_>) -> Result<String>;
}

#[derive(Debug, serde::Deserialize)]
struct PlanReply {
    steps: Vec<StepSpec>,
}

#[derive(Debug, serde::Deserialize)]
struct InputReply {
    input: Value,
}

#[derive(Debug, serde::Deserialize)]
struct TaskSummaryReply {
    summary: String,
}

/// [`Completion`] built from prompt templates and an [`LlmBackend`].
pub struct PromptedCompletion<B: LlmBackend> {
    backend: B,
    prompts: PromptEngine,
}

impl<B: LlmBackend> PromptedCompletion<B> {
    pub fn new(backend: B, prompt_budget_bytes: usize) -> Result<Self> {
        Ok(Self {
            backend,
            prompts: PromptEngine::new(prompt_budget_bytes)?,
        })
    }

    fn ask<T: DeserializeOwned>(&self, prompt: &str, schema_src: &str, label: &str) -> Result<T> {
        let reply = self
            .backend
            .complete(prompt)
            .with_context(|| format!("{label} completion"))?;
        let value = extract_json_object(&reply).with_context(|| format!("{label} reply"))?;
        schema::validate(schema_src, &value, label)?;
        serde_json::from_value(value).with_context(|| format!("deserialize {label} reply"))
    }
}

impl<B: LlmBackend> Completion for PromptedCompletion<B> {
    #[instrument(skip_all, fields(title = req.title))]
    fn plan_steps(&self, req: &PlanRequest<'_>) -> Result<Vec<StepSpec>> {
        let prompt = self.prompts.render_plan(req)?;
        let reply: PlanReply = self.ask(&prompt, PLAN_SCHEMA, "plan")?;
        debug!(steps = reply.steps.len(), "planner replied");
        Ok(reply.steps)
    }

    #[instrument(skip_all, fields(step_id = req.step_id))]
    fn format_input(&self, req: &InputRequest<'_>) -> Result<Value> {
        let prompt = self.prompts.render_input(req)?;
        let reply: InputReply = self.ask(&prompt, INPUT_SCHEMA, "input")?;
        Ok(reply.input)
    }

    #[instrument(skip_all, fields(step_id = req.step_id))]
    fn summarize_step(&self, req: &StepSummaryRequest<'_>) -> Result<StepSummary> {
        let prompt = self.prompts.render_step_summary(req)?;
        self.ask(&prompt, STEP_SUMMARY_SCHEMA, "step_summary")
    }

    #[instrument(skip_all, fields(title = req.title))]
    fn summarize_task(&self, req: &TaskSummaryRequest<'_>) -> Result<String> {
        let prompt = self.prompts.render_task_summary(req)?;
        let reply: TaskSummaryReply = self.ask(&prompt, TASK_SUMMARY_SCHEMA, "task_summary")?;
        Ok(reply.summary)
    }

    #[instrument(skip_all, fields(main_title = req.main_title))]
    fn write_report(&self, req: &ReportRequest<'_>) -> Result<String> {
        let prompt = self.prompts.render_report(req)?;
        let reply = self.backend.complete(&prompt).context("report completion")?;
        let report = strip_markdown_fence(reply.trim());
        if report.is_empty() {
            bail!("report completion returned an empty document");
        }
        Ok(report.to_string())
    }
}

static JSON_FENCE_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n?```"));

/// Pull the JSON object out of a model reply.
///
/// Accepts a bare object, an object inside a ```json fence, or the first
/// `{ ... }` span of surrounding prose.
pub fn extract_json_object(reply: &str) -> Result<Value> {
    let trimmed = reply.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let fence_re = JSON_FENCE_RE
        .as_ref()
        .map_err(|err| anyhow!("json fence regex: {err}"))?;
    for caps in fence_re.captures_iter(trimmed) {
        if let Some(body) = caps.get(1)
            && let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(body.as_str().trim())
        {
            return Ok(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
        && let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&trimmed[start..=end])
    {
        return Ok(value);
    }

    bail!("no JSON object found in reply")
}

fn strip_markdown_fence(reply: &str) -> &str {
    let Some(rest) = reply.strip_prefix("```") else {
        return reply;
    };
    let body = rest
        .strip_prefix("markdown")
        .or_else(|| rest.strip_prefix("md"))
        .unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}
