//! Shared deterministic types for orchestration core logic.
//!
//! These types define the contracts between the scheduler, plan builder,
//! step executor and aggregator. They hold no I/O handles.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::StepError;
use crate::task::{AutoTask, TaskStatus};

/// Default retry ceiling for a plan step.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default quality score a step output must exceed to be accepted.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.5;

/// Status of a single plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Failed)
    }
}

/// Step description as returned by the planner, before scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: String,
    pub tool: String,
    pub objective: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Structured summarizer response for one tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub output: Value,
    pub quality_score: f64,
}

/// Accepted (or failed) output of a step with its quality score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub result: Value,
    pub quality_score: f64,
}

/// One tool invocation inside a task plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub tool: String,
    pub objective: String,
    pub depends_on: Vec<String>,
    /// Tool input, derived right before invocation.
    pub input: Option<Value>,
    pub output: Option<StepOutput>,
    pub status: StepStatus,
    pub attempt: u32,
    pub max_attempts: u32,
}

impl PlanStep {
    pub fn from_spec(spec: StepSpec, max_attempts: u32) -> Self {
        let mut depends_on: Vec<String> = Vec::with_capacity(spec.depends_on.len());
        for dep in spec.depends_on {
            if !depends_on.contains(&dep) {
                depends_on.push(dep);
            }
        }
        Self {
            id: spec.id,
            tool: spec.tool,
            objective: spec.objective,
            depends_on,
            input: None,
            output: None,
            status: StepStatus::Pending,
            attempt: 0,
            max_attempts,
        }
    }

    /// Quality of the latest output; a step without output scores zero.
    pub fn quality_score(&self) -> f64 {
        self.output
            .as_ref()
            .map(|output| output.quality_score)
            .unwrap_or(0.0)
    }
}

/// Outcome of evaluating a step after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Success,
    Retry,
    Fail,
}

/// Per-step entry of a finalized task result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub tool: String,
    pub objective: String,
    pub output: Value,
}

/// Task-level result persisted as the task's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub completed: bool,
    pub summary: String,
    pub steps: Vec<StepRecord>,
}

/// Output of a dependency handed to the input formatter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorOutput {
    pub step_id: String,
    pub tool: String,
    pub output: Value,
}

/// One task's contribution to a group report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSection {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub output: Option<Value>,
}

impl GroupSection {
    pub fn from_task(task: &AutoTask) -> Self {
        Self {
            task_id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status,
            output: task.output.clone(),
        }
    }
}

/// Transient execution state for the active task.
///
/// Owned by exactly one orchestration run and discarded once the task is
/// finalized and persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRuntime {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub parent_id: Option<String>,
    pub plan: BTreeMap<String, PlanStep>,
    /// Step ids in topological order; a step leaves the queue once done or failed.
    pub ready_queue: Vec<String>,
    /// Step ids in completion order.
    pub completed_ids: Vec<String>,
    pub result: Option<TaskResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRuntime {
    pub fn from_task(task: &AutoTask, started_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            parent_id: task.parent_id.clone(),
            plan: BTreeMap::new(),
            ready_queue: Vec::new(),
            completed_ids: Vec::new(),
            result: None,
            started_at,
            finished_at: None,
        }
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.plan.get(id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut PlanStep> {
        self.plan.get_mut(id)
    }

    /// Hand out step `id`: mark it running.
    pub fn start_step(&mut self, id: &str) -> Result<&mut PlanStep, StepError> {
        let step = self
            .plan
            .get_mut(id)
            .ok_or_else(|| StepError::UnknownStep(id.to_string()))?;
        step.status = StepStatus::Running;
        Ok(step)
    }

    /// Record `id` as completed and drop it from the ready queue.
    pub fn mark_completed(&mut self, id: &str) {
        if !self.completed_ids.iter().any(|done| done == id) {
            self.completed_ids.push(id.to_string());
        }
        self.remove_from_queue(id);
    }

    pub fn remove_from_queue(&mut self, id: &str) {
        self.ready_queue.retain(|queued| queued != id);
    }

    /// True once every planned step completed and nothing is left queued.
    pub fn is_complete(&self) -> bool {
        !self.plan.is_empty()
            && self.ready_queue.is_empty()
            && self.completed_ids.len() == self.plan.len()
    }

    /// Completed steps as result records, in completion order.
    pub fn completed_records(&self) -> Vec<StepRecord> {
        self.completed_ids
            .iter()
            .filter_map(|id| self.plan.get(id))
            .map(|step| StepRecord {
                step_id: step.id.clone(),
                tool: step.tool.clone(),
                objective: step.objective.clone(),
                output: step
                    .output
                    .as_ref()
                    .map(|output| output.result.clone())
                    .unwrap_or(Value::Null),
            })
            .collect()
    }

    pub fn snapshot(&self) -> TaskRuntimeSnapshot {
        TaskRuntimeSnapshot {
            task_id: self.task_id.clone(),
            title: self.title.clone(),
            steps: self
                .plan
                .values()
                .map(|step| StepSnapshot {
                    id: step.id.clone(),
                    tool: step.tool.clone(),
                    status: step.status,
                    attempt: step.attempt,
                    quality_score: step.output.as_ref().map(|output| output.quality_score),
                })
                .collect(),
            ready_queue: self.ready_queue.clone(),
            completed_ids: self.completed_ids.clone(),
            completed: self.result.as_ref().is_some_and(|result| result.completed),
        }
    }
}

/// Serializable view of a step for run reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSnapshot {
    pub id: String,
    pub tool: String,
    pub status: StepStatus,
    pub attempt: u32,
    pub quality_score: Option<f64>,
}

/// Serializable view of the active task for run reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRuntimeSnapshot {
    pub task_id: String,
    pub title: String,
    pub steps: Vec<StepSnapshot>,
    pub ready_queue: Vec<String>,
    pub completed_ids: Vec<String>,
    pub completed: bool,
}

/// How an orchestration invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// No task qualified for selection: all work is done.
    Idle,
    /// A group was exhausted and its report written to the main task.
    GroupCompleted { main_task_id: String },
    /// A fatal error stopped the invocation.
    Halted,
}

/// Result of one `run_once` invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub finished: bool,
    pub error: Option<String>,
    pub active_task: Option<TaskRuntimeSnapshot>,
    pub outcome: RunOutcome,
    /// Titles of tasks finalized during this invocation, in order.
    pub completed_tasks: Vec<String>,
    pub iterations: u32,
}

/// Per-invocation orchestration context.
///
/// Re-created at the start of every invocation and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct BgState {
    pub user_id: String,
    pub current: Option<TaskRuntime>,
    pub last_completed_title: Option<String>,
    pub error: Option<String>,
    pub finished: bool,
    pub current_step: Option<String>,
}

impl BgState {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            current: None,
            last_completed_title: None,
            error: None,
            finished: false,
            current_step: None,
        }
    }

    /// Record a non-fatal error; the run keeps going.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Record a fatal error and stop the run.
    pub fn halt(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime_with(ids: &[&str]) -> TaskRuntime {
        let task = AutoTask::new("t1", "u1", "Task", "");
        let mut runtime = TaskRuntime::from_task(&task, Utc::now());
        for id in ids {
            let step = PlanStep::from_spec(
                StepSpec {
                    id: id.to_string(),
                    tool: "search".to_string(),
                    objective: format!("{id} objective"),
                    depends_on: Vec::new(),
                },
                DEFAULT_MAX_ATTEMPTS,
            );
            runtime.plan.insert(id.to_string(), step);
            runtime.ready_queue.push(id.to_string());
        }
        runtime
    }

    #[test]
    fn mark_completed_never_duplicates() {
        let mut runtime = runtime_with(&["a", "b"]);
        runtime.mark_completed("a");
        runtime.mark_completed("a");
        assert_eq!(runtime.completed_ids, vec!["a".to_string()]);
        assert_eq!(runtime.ready_queue, vec!["b".to_string()]);
        assert!(!runtime.is_complete());

        runtime.mark_completed("b");
        assert!(runtime.is_complete());
    }

    #[test]
    fn empty_plan_is_never_complete() {
        let runtime = runtime_with(&[]);
        assert!(!runtime.is_complete());
    }

    #[test]
    fn from_spec_drops_repeated_dependencies() {
        let step = PlanStep::from_spec(
            StepSpec {
                id: "b".to_string(),
                tool: "search".to_string(),
                objective: "o".to_string(),
                depends_on: vec!["a".to_string(), "a".to_string()],
            },
            2,
        );
        assert_eq!(step.depends_on, vec!["a".to_string()]);
        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(step.attempt, 0);
        assert_eq!(step.quality_score(), 0.0);
    }
}
