//! Deterministic task and step selection.

use crate::core::error::StepError;
use crate::core::hierarchy::{belongs_to, root_of};
use crate::core::types::{StepStatus, TaskRuntime};
use crate::task::{AutoTask, TaskStatus};

/// Result of choosing the next task to work on.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection<'a> {
    Task(&'a AutoTask),
    /// The active group has no `undone` sub-task left.
    GroupExhausted { main_task_id: String },
    /// Nothing qualifies for selection.
    Idle,
}

/// Pick the next task from `tasks` (store order).
///
/// With an active group (`active_root` is the id of its main task) only that
/// group's `undone` sub-tasks qualify. Without one, an `undone` sub-task of an
/// already started group is preferred over starting a new main task.
pub fn select_task<'a>(tasks: &'a [AutoTask], active_root: Option<&str>) -> Selection<'a> {
    if let Some(root_id) = active_root {
        return match tasks
            .iter()
            .find(|task| task.is_undone() && belongs_to(tasks, task, root_id))
        {
            Some(task) => Selection::Task(task),
            None => Selection::GroupExhausted {
                main_task_id: root_id.to_string(),
            },
        };
    }

    let resumed = tasks.iter().find(|task| {
        task.is_undone()
            && !task.is_main()
            && root_of(tasks, &task.id)
                .map(|root| root.status != TaskStatus::Undone)
                .unwrap_or(false)
    });
    if let Some(task) = resumed {
        return Selection::Task(task);
    }

    match tasks.iter().find(|task| task.is_main() && task.is_undone()) {
        Some(task) => Selection::Task(task),
        None => Selection::Idle,
    }
}

/// Result of looking for the next runnable step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeue {
    Step(String),
    /// The ready queue is empty.
    Exhausted,
    /// Every queued step waits on a failed dependency.
    Stalled { blocked: Vec<String> },
}

/// Find the first queued step whose dependencies are all `done`.
///
/// Steps whose dependency has `failed` or is itself blocked are skipped as
/// blocked. The queue is topologically ordered, so one pass sees every
/// blocker before its dependents. A dependency that is still pending or
/// running at that point breaks queue ordering and is reported as
/// [`StepError::DependencyNotSatisfied`].
pub fn next_ready_step(runtime: &TaskRuntime) -> Result<Dequeue, StepError> {
    if runtime.ready_queue.is_empty() {
        return Ok(Dequeue::Exhausted);
    }

    let mut blocked = Vec::new();
    'queue: for id in &runtime.ready_queue {
        let step = runtime
            .step(id)
            .ok_or_else(|| StepError::UnknownStep(id.clone()))?;
        for dep in &step.depends_on {
            if blocked.contains(dep) {
                blocked.push(id.clone());
                continue 'queue;
            }
            let dep_step = runtime
                .step(dep)
                .ok_or_else(|| StepError::UnknownStep(dep.clone()))?;
            match dep_step.status {
                StepStatus::Done => {}
                StepStatus::Failed => {
                    blocked.push(id.clone());
                    continue 'queue;
                }
                StepStatus::Pending | StepStatus::Running => {
                    return Err(StepError::DependencyNotSatisfied {
                        step: id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        return Ok(Dequeue::Step(id.clone()));
    }

    Ok(Dequeue::Stalled { blocked })
}
