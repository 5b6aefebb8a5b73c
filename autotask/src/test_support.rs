//! Test-only collaborators and builders for orchestration tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};

use anyhow::{Result, anyhow, bail};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::types::{GroupSection, PriorOutput, StepSpec, StepSummary};
use crate::io::completion::{
    Completion, InputRequest, PlanRequest, ReportRequest, StepSummaryRequest, TaskSummaryRequest,
};
use crate::io::store::{JsonTaskStore, TaskStore};
use crate::io::tools::ToolRegistry;
use crate::task::{AutoTask, TaskUpdate};

/// Score handed out once a step's scripted scores run out.
pub const DEFAULT_SCORE: f64 = 0.9;

/// Main task owned by `u1`.
pub fn main_task(id: &str, title: &str) -> AutoTask {
    AutoTask::new(id, "u1", title, &format!("{title} description"))
}

/// Sub-task of `parent` owned by `u1`.
pub fn sub_task(id: &str, parent: &str, title: &str) -> AutoTask {
    let mut task = main_task(id, title);
    task.parent_id = Some(parent.to_string());
    task
}

pub fn step_spec(id: &str, tool: &str, depends_on: &[&str]) -> StepSpec {
    StepSpec {
        id: id.to_string(),
        tool: tool.to_string(),
        objective: format!("{id} objective"),
        depends_on: depends_on.iter().map(|dep| dep.to_string()).collect(),
    }
}

/// A JSON task store inside a fresh temporary directory.
pub fn temp_json_store() -> Result<(TempDir, JsonTaskStore)> {
    let dir = tempfile::tempdir()?;
    let store = JsonTaskStore::new(dir.path().join("tasks.json"));
    Ok((dir, store))
}

/// [`Completion`] answering from scripted data.
///
/// Plans are keyed by task title. Step scores are consumed per step id in
/// order and fall back to [`DEFAULT_SCORE`].
#[derive(Default)]
pub struct ScriptedCompletion {
    plans: BTreeMap<String, Vec<StepSpec>>,
    inputs: BTreeMap<String, Value>,
    outputs: BTreeMap<String, Value>,
    scores: RefCell<BTreeMap<String, VecDeque<f64>>>,
    fail_task_summary: bool,
    fail_report: bool,
    plan_calls: Cell<usize>,
    task_summary_calls: Cell<usize>,
    priors: RefCell<BTreeMap<String, Vec<PriorOutput>>>,
    reports: RefCell<Vec<(String, Vec<GroupSection>)>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(mut self, title: &str, steps: Vec<StepSpec>) -> Self {
        self.plans.insert(title.to_string(), steps);
        self
    }

    /// Tool input returned for `step_id` instead of the default.
    pub fn with_input(mut self, step_id: &str, input: Value) -> Self {
        self.inputs.insert(step_id.to_string(), input);
        self
    }

    /// Summarized output returned for `step_id` instead of the default.
    pub fn with_output(mut self, step_id: &str, output: Value) -> Self {
        self.outputs.insert(step_id.to_string(), output);
        self
    }

    pub fn with_scores(self, step_id: &str, scores: &[f64]) -> Self {
        self.scores
            .borrow_mut()
            .insert(step_id.to_string(), scores.iter().copied().collect());
        self
    }

    pub fn failing_task_summary(mut self) -> Self {
        self.fail_task_summary = true;
        self
    }

    pub fn failing_report(mut self) -> Self {
        self.fail_report = true;
        self
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.get()
    }

    pub fn task_summary_calls(&self) -> usize {
        self.task_summary_calls.get()
    }

    pub fn report_calls(&self) -> usize {
        self.reports.borrow().len()
    }

    /// Main title and sections of every report request, in order.
    pub fn report_requests(&self) -> Vec<(String, Vec<GroupSection>)> {
        self.reports.borrow().clone()
    }

    /// Prior outputs passed with the latest input request for `step_id`.
    pub fn input_priors(&self, step_id: &str) -> Vec<PriorOutput> {
        self.priors
            .borrow()
            .get(step_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Completion for ScriptedCompletion {
    fn plan_steps(&self, req: &PlanRequest<'_>) -> Result<Vec<StepSpec>> {
        self.plan_calls.set(self.plan_calls.get() + 1);
        self.plans
            .get(req.title)
            .cloned()
            .ok_or_else(|| anyhow!("no plan scripted for '{}'", req.title))
    }

    fn format_input(&self, req: &InputRequest<'_>) -> Result<Value> {
        self.priors
            .borrow_mut()
            .insert(req.step_id.to_string(), req.prior.to_vec());
        Ok(self
            .inputs
            .get(req.step_id)
            .cloned()
            .unwrap_or_else(|| json!({ "objective": req.objective })))
    }

    fn summarize_step(&self, req: &StepSummaryRequest<'_>) -> Result<StepSummary> {
        let quality_score = self
            .scores
            .borrow_mut()
            .get_mut(req.step_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(DEFAULT_SCORE);
        let output = self
            .outputs
            .get(req.step_id)
            .cloned()
            .unwrap_or_else(|| json!({ "step": req.step_id, "result": req.result }));
        Ok(StepSummary {
            output,
            quality_score,
        })
    }

    fn summarize_task(&self, req: &TaskSummaryRequest<'_>) -> Result<String> {
        self.task_summary_calls.set(self.task_summary_calls.get() + 1);
        if self.fail_task_summary {
            bail!("narrative service unavailable");
        }
        Ok(format!("{}: {} step(s) completed", req.title, req.steps.len()))
    }

    fn write_report(&self, req: &ReportRequest<'_>) -> Result<String> {
        self.reports
            .borrow_mut()
            .push((req.main_title.to_string(), req.sections.to_vec()));
        if self.fail_report {
            bail!("document service unavailable");
        }
        let mut report = format!("# {}\n", req.main_title);
        for section in req.sections {
            report.push_str(&format!("\n- {} ({})", section.title, section.status.as_str()));
        }
        Ok(report)
    }
}

/// [`ToolRegistry`] that echoes its input and records every invocation.
pub struct ScriptedTools {
    allowed: Vec<String>,
    failures: RefCell<BTreeMap<String, u32>>,
    invocations: RefCell<Vec<String>>,
}

impl Default for ScriptedTools {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTools {
    /// Registry permitting `search` and `mail`.
    pub fn new() -> Self {
        Self {
            allowed: vec!["search".to_string(), "mail".to_string()],
            failures: RefCell::new(BTreeMap::new()),
            invocations: RefCell::new(Vec::new()),
        }
    }

    /// Make the next `times` invocations of `tool` fail.
    pub fn failing(self, tool: &str, times: u32) -> Self {
        self.failures.borrow_mut().insert(tool.to_string(), times);
        self
    }

    /// Tool names in invocation order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.borrow().clone()
    }
}

impl ToolRegistry for ScriptedTools {
    fn list_allowed_tools(&self, _user_id: &str) -> Result<Vec<String>> {
        Ok(self.allowed.clone())
    }

    fn invoke(&self, tool: &str, input: &Value) -> Result<Value> {
        if !self.allowed.iter().any(|name| name == tool) {
            bail!("unknown tool '{tool}'");
        }
        self.invocations.borrow_mut().push(tool.to_string());
        if let Some(left) = self.failures.borrow_mut().get_mut(tool)
            && *left > 0
        {
            *left -= 1;
            bail!("tool '{tool}' failed");
        }
        Ok(json!({ "tool": tool, "echo": input }))
    }
}

/// [`TaskStore`] whose backend is never reachable.
pub struct UnreachableStore;

impl TaskStore for UnreachableStore {
    fn list_user_tasks(&self, _user_id: &str) -> Result<Vec<AutoTask>> {
        bail!("store unreachable")
    }

    fn update_task(&self, _id: &str, _update: &TaskUpdate) -> Result<AutoTask> {
        bail!("store unreachable")
    }
}
