//! Prompt rendering for text-generation calls.
//!
//! Each call shape has one minijinja template under `prompts/`. Templates mark
//! their sections with `<!-- section:KEY required|droppable -->` so a rendered
//! prompt can be fitted into a byte budget.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::io::completion::{
    InputRequest, PlanRequest, ReportRequest, StepSummaryRequest, TaskSummaryRequest,
};

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const INPUT_TEMPLATE: &str = include_str!("prompts/input.md");
const STEP_SUMMARY_TEMPLATE: &str = include_str!("prompts/step_summary.md");
const TASK_SUMMARY_TEMPLATE: &str = include_str!("prompts/task_summary.md");
const REPORT_TEMPLATE: &str = include_str!("prompts/report.md");

/// Droppable sections, least important first.
const DROP_ORDER: &[&str] = &["description", "input"];

const TRUNCATED_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->"));

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[derive(Debug, Serialize)]
struct JsonItem<'a> {
    step_id: &'a str,
    tool: &'a str,
    objective: &'a str,
    output: String,
}

#[derive(Debug, Serialize)]
struct SectionView<'a> {
    title: &'a str,
    description: &'a str,
    status: &'a str,
    output: String,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptEngine {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.add_template("plan", PLAN_TEMPLATE)
            .context("load plan template")?;
        env.add_template("input", INPUT_TEMPLATE)
            .context("load input template")?;
        env.add_template("step_summary", STEP_SUMMARY_TEMPLATE)
            .context("load step_summary template")?;
        env.add_template("task_summary", TASK_SUMMARY_TEMPLATE)
            .context("load task_summary template")?;
        env.add_template("report", REPORT_TEMPLATE)
            .context("load report template")?;
        Ok(Self { env, budget_bytes })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let rendered = self
            .env
            .get_template(name)?
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))?;
        let mut sections = parse_sections(&rendered)?;
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }

    pub fn render_plan(&self, req: &PlanRequest<'_>) -> Result<String> {
        self.render(
            "plan",
            context! {
                title => req.title.trim(),
                description => req.description.trim(),
                tools => req.tools,
            },
        )
    }

    pub fn render_input(&self, req: &InputRequest<'_>) -> Result<String> {
        let prior: Vec<JsonItem<'_>> = req
            .prior
            .iter()
            .map(|item| JsonItem {
                step_id: &item.step_id,
                tool: &item.tool,
                objective: "",
                output: pretty(&item.output),
            })
            .collect();
        self.render(
            "input",
            context! {
                step_id => req.step_id,
                tool => req.tool,
                objective => req.objective,
                prior => prior,
            },
        )
    }

    pub fn render_step_summary(&self, req: &StepSummaryRequest<'_>) -> Result<String> {
        self.render(
            "step_summary",
            context! {
                step_id => req.step_id,
                tool => req.tool,
                objective => req.objective,
                input => pretty(req.input),
                result => pretty(req.result),
            },
        )
    }

    pub fn render_task_summary(&self, req: &TaskSummaryRequest<'_>) -> Result<String> {
        let steps: Vec<JsonItem<'_>> = req
            .steps
            .iter()
            .map(|step| JsonItem {
                step_id: &step.step_id,
                tool: &step.tool,
                objective: &step.objective,
                output: pretty(&step.output),
            })
            .collect();
        self.render(
            "task_summary",
            context! {
                title => req.title.trim(),
                description => req.description.trim(),
                steps => steps,
            },
        )
    }

    pub fn render_report(&self, req: &ReportRequest<'_>) -> Result<String> {
        let sections: Vec<SectionView<'_>> = req
            .sections
            .iter()
            .map(|section| SectionView {
                title: &section.title,
                description: section.description.trim(),
                status: section.status.as_str(),
                output: section
                    .output
                    .as_ref()
                    .map(pretty)
                    .unwrap_or_else(|| "null".to_string()),
            })
            .collect();
        self.render(
            "report",
            context! {
                main_title => req.main_title,
                sections => sections,
            },
        )
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Result<Vec<ParsedSection>> {
    let section_re = SECTION_RE
        .as_ref()
        .map_err(|err| anyhow::anyhow!("section marker regex: {err}"))?;
    let matches: Vec<_> = section_re.captures_iter(rendered).collect();

    let mut sections = Vec::new();
    for (i, caps) in matches.iter().enumerate() {
        let (Some(marker), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|next| next.start())
            .unwrap_or(rendered.len());
        let required = kind.as_str() == "required";
        let content = rendered[marker.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    Ok(sections)
}

/// Drop droppable sections in [`DROP_ORDER`] until the prompt fits, then
/// truncate the last section if it still does not.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let other_len: usize = sections
        .iter()
        .rev()
        .skip(1)
        .map(|s| s.content.len())
        .sum();
    let Some(last) = sections.last_mut() else {
        return;
    };
    let allowed = budget.saturating_sub(other_len);
    if last.content.len() <= allowed {
        return;
    }
    let before_len = last.content.len();
    if allowed > TRUNCATED_MARKER.len() {
        let cut = floor_char_boundary(&last.content, allowed - TRUNCATED_MARKER.len());
        last.content.truncate(cut);
        last.content.push_str(TRUNCATED_MARKER);
    } else {
        let cut = floor_char_boundary(&last.content, allowed);
        last.content.truncate(cut);
    }
    debug!(
        section = last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
