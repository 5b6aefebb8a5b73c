//! Runtime invariants checked at finalization and in tests.

use std::collections::HashSet;

use crate::core::types::{StepStatus, TaskRuntime};
use crate::task::AutoTask;

/// Check the invariants a [`TaskRuntime`] must hold between transitions:
/// - dependency ids exist in the plan
/// - `attempt <= max_attempts`
/// - completed ids are plan keys, unique, and `done`
/// - queued ids are plan keys, unique, and neither done nor failed
pub fn validate_runtime(runtime: &TaskRuntime) -> Vec<String> {
    let mut errors = Vec::new();

    for (id, step) in &runtime.plan {
        if id != &step.id {
            errors.push(format!("plan key '{id}' holds step '{}'", step.id));
        }
        for dep in &step.depends_on {
            if !runtime.plan.contains_key(dep) {
                errors.push(format!("{id}: unknown dependency '{dep}'"));
            }
        }
        if step.max_attempts == 0 {
            errors.push(format!("{id}: max_attempts must be > 0"));
        }
        if step.attempt > step.max_attempts {
            errors.push(format!(
                "{id}: attempt {} exceeds max_attempts {}",
                step.attempt, step.max_attempts
            ));
        }
    }

    let mut seen = HashSet::new();
    for id in &runtime.completed_ids {
        if !seen.insert(id.as_str()) {
            errors.push(format!("completed id '{id}' appears twice"));
        }
        match runtime.step(id) {
            None => errors.push(format!("completed id '{id}' is not in the plan")),
            Some(step) if step.status != StepStatus::Done => {
                errors.push(format!("completed id '{id}' is not done"));
            }
            Some(_) => {}
        }
    }

    let mut queued = HashSet::new();
    for id in &runtime.ready_queue {
        if !queued.insert(id.as_str()) {
            errors.push(format!("queued id '{id}' appears twice"));
        }
        match runtime.step(id) {
            None => errors.push(format!("queued id '{id}' is not in the plan")),
            Some(step) if step.status.is_terminal() => {
                errors.push(format!("queued id '{id}' is already {:?}", step.status));
            }
            Some(_) => {}
        }
    }

    errors
}

/// Check a user's task list: unique ids, no self-parenting, and finished
/// tasks carry a start time.
pub fn validate_tasks(tasks: &[AutoTask]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for task in tasks {
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate task id '{}'", task.id));
        }
        if task.parent_id.as_deref() == Some(task.id.as_str()) {
            errors.push(format!("task '{}' is its own parent", task.id));
        }
        if task.finished_at.is_some() && task.started_at.is_none() {
            errors.push(format!("task '{}' finished without starting", task.id));
        }
    }
    errors
}
