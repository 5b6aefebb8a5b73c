//! Durable task storage.
//!
//! The [`TaskStore`] trait is the orchestrator's only view of persisted tasks.
//! [`JsonTaskStore`] keeps every user's tasks in one JSON file;
//! [`MemoryTaskStore`] keeps them in memory for embedding hosts and tests.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::invariants::validate_tasks;
use crate::io::config::write_atomic;
use crate::io::schema;
use crate::task::{AutoTask, TaskUpdate};

const TASKS_SCHEMA: &str = include_str!("../../schemas/tasks.schema.json");

/// Task persistence used by the orchestrator.
pub trait TaskStore {
    /// All tasks owned by `user_id`, in creation order.
    fn list_user_tasks(&self, user_id: &str) -> Result<Vec<AutoTask>>;

    /// Apply a partial update to task `id` and return the stored result.
    fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<AutoTask>;
}

/// Append `task`, rejecting an id that is already taken.
fn push_unique(tasks: &mut Vec<AutoTask>, task: AutoTask) -> Result<()> {
    if tasks.iter().any(|existing| existing.id == task.id) {
        bail!("task id '{}' already exists", task.id);
    }
    tasks.push(task);
    Ok(())
}

fn apply_update(tasks: &mut [AutoTask], id: &str, update: &TaskUpdate) -> Result<AutoTask> {
    let task = tasks
        .iter_mut()
        .find(|task| task.id == id)
        .ok_or_else(|| anyhow!("task '{id}' not found"))?;
    update.apply(task);
    Ok(task.clone())
}

/// Tasks stored as one pretty-printed JSON array in creation order.
///
/// A missing file reads as an empty store. Every write replaces the file
/// atomically.
#[derive(Debug, Clone)]
pub struct JsonTaskStore {
    path: PathBuf,
}

impl JsonTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every task (schema + invariants).
    pub fn load_all(&self) -> Result<Vec<AutoTask>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read tasks {}", self.path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse tasks {}", self.path.display()))?;
        schema::validate(TASKS_SCHEMA, &value, "tasks")?;
        let tasks: Vec<AutoTask> = serde_json::from_value(value)
            .with_context(|| format!("deserialize tasks {}", self.path.display()))?;
        let errors = validate_tasks(&tasks);
        if !errors.is_empty() {
            bail!(
                "task file invariants failed ({}): {}",
                self.path.display(),
                errors.join("; ")
            );
        }
        Ok(tasks)
    }

    pub fn save_all(&self, tasks: &[AutoTask]) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(tasks).context("serialize tasks")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }

    /// Append a new task at the end of the creation order.
    pub fn insert_task(&self, task: AutoTask) -> Result<()> {
        let mut tasks = self.load_all()?;
        push_unique(&mut tasks, task)?;
        self.save_all(&tasks)
    }
}

impl TaskStore for JsonTaskStore {
    #[instrument(skip_all, fields(user_id = %user_id))]
    fn list_user_tasks(&self, user_id: &str) -> Result<Vec<AutoTask>> {
        let tasks: Vec<AutoTask> = self
            .load_all()?
            .into_iter()
            .filter(|task| task.user_id == user_id)
            .collect();
        debug!(count = tasks.len(), "listed user tasks");
        Ok(tasks)
    }

    #[instrument(skip_all, fields(task_id = %id))]
    fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<AutoTask> {
        let mut tasks = self.load_all()?;
        let updated = apply_update(&mut tasks, id, update)?;
        self.save_all(&tasks)
            .with_context(|| format!("persist update of task '{id}'"))?;
        Ok(updated)
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RefCell<Vec<AutoTask>>,
}

impl MemoryTaskStore {
    pub fn new(tasks: Vec<AutoTask>) -> Self {
        Self {
            tasks: RefCell::new(tasks),
        }
    }

    pub fn insert_task(&self, task: AutoTask) -> Result<()> {
        push_unique(&mut self.tasks.borrow_mut(), task)
    }

    /// Snapshot of every stored task.
    pub fn tasks(&self) -> Vec<AutoTask> {
        self.tasks.borrow().clone()
    }

    pub fn task(&self, id: &str) -> Option<AutoTask> {
        self.tasks.borrow().iter().find(|task| task.id == id).cloned()
    }
}

impl TaskStore for MemoryTaskStore {
    fn list_user_tasks(&self, user_id: &str) -> Result<Vec<AutoTask>> {
        Ok(self
            .tasks
            .borrow()
            .iter()
            .filter(|task| task.user_id == user_id)
            .cloned()
            .collect())
    }

    fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<AutoTask> {
        apply_update(&mut self.tasks.borrow_mut(), id, update)
    }
}
