//! Durable automation task records owned by the task store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of an [`AutoTask`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Undone,
    Doing,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Undone => "undone",
            TaskStatus::Doing => "doing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// One human-readable progress message persisted on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLogEntry {
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub message: String,
}

impl StepLogEntry {
    /// Entry about the task as a whole (plan ready, completed, stalled).
    pub fn task(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            step_id: None,
            tool: None,
            message: message.into(),
        }
    }

    /// Entry about a single plan step.
    pub fn step(step_id: &str, tool: &str, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            step_id: Some(step_id.to_string()),
            tool: Some(tool.to_string()),
            message: message.into(),
        }
    }
}

/// A user's unit of automation work.
///
/// Tasks without a `parent_id` are main tasks; the others are sub-tasks and
/// point at their parent by id. The orchestrator only writes `status`,
/// the timestamps, `output` and `step_log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoTask {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub step_log: Vec<StepLogEntry>,
}

impl AutoTask {
    pub fn new(id: &str, user_id: &str, title: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            parent_id: None,
            status: TaskStatus::Undone,
            started_at: None,
            finished_at: None,
            output: None,
            step_log: Vec::new(),
        }
    }

    pub fn is_main(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_undone(&self) -> bool {
        self.status == TaskStatus::Undone
    }
}

/// Partial update applied by [`crate::io::store::TaskStore::update_task`].
///
/// `None` fields are left untouched; `log_append` entries are appended to the
/// existing step log in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output: Option<Value>,
    pub log_append: Vec<StepLogEntry>,
}

impl TaskUpdate {
    pub fn log(entry: StepLogEntry) -> Self {
        Self {
            log_append: vec![entry],
            ..Self::default()
        }
    }

    pub fn apply(&self, task: &mut AutoTask) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(started_at) = self.started_at {
            task.started_at = Some(started_at);
        }
        if let Some(finished_at) = self.finished_at {
            task.finished_at = Some(finished_at);
        }
        if let Some(output) = &self.output {
            task.output = Some(output.clone());
        }
        task.step_log.extend(self.log_append.iter().cloned());
    }
}
