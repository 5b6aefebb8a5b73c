//! Task selection across invocations.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::core::hierarchy::root_of;
use crate::core::selector::{Selection, select_task};
use crate::core::types::TaskRuntime;
use crate::io::store::TaskStore;
use crate::task::TaskUpdate;

/// Result of [`fetch_next_task`].
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// A task was selected and its start time stamped.
    Started(TaskRuntime),
    /// The active group has no `undone` sub-task left.
    GroupExhausted { main_task_id: String },
    /// Nothing left to do for this user.
    Idle,
}

/// Choose the next task for `user_id`.
///
/// `active` is the runtime of the task this invocation worked on last, if
/// any; it pins selection to that task's group. A store failure or a broken
/// parent chain above the active task is returned as an error.
#[instrument(skip_all, fields(user_id = %user_id, active = active.map(|rt| rt.task_id.as_str())))]
pub fn fetch_next_task<S: TaskStore>(
    store: &S,
    user_id: &str,
    active: Option<&TaskRuntime>,
) -> Result<FetchOutcome> {
    let tasks = store
        .list_user_tasks(user_id)
        .with_context(|| format!("load tasks for user '{user_id}'"))?;

    let active_root = match active {
        Some(runtime) => Some(root_of(&tasks, &runtime.task_id)?.id.clone()),
        None => None,
    };

    match select_task(&tasks, active_root.as_deref()) {
        Selection::Task(task) => {
            let now = Utc::now();
            store
                .update_task(
                    &task.id,
                    &TaskUpdate {
                        started_at: Some(now),
                        ..TaskUpdate::default()
                    },
                )
                .with_context(|| format!("stamp start of task '{}'", task.id))?;
            info!(task_id = %task.id, title = %task.title, main = task.is_main(), "selected task");
            Ok(FetchOutcome::Started(TaskRuntime::from_task(task, now)))
        }
        Selection::GroupExhausted { main_task_id } => {
            debug!(main_task_id = %main_task_id, "group exhausted");
            Ok(FetchOutcome::GroupExhausted { main_task_id })
        }
        Selection::Idle => {
            debug!("no task qualifies");
            Ok(FetchOutcome::Idle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::HierarchyError;
    use crate::io::store::MemoryTaskStore;
    use crate::task::{AutoTask, TaskStatus};

    fn sub(id: &str, parent: &str) -> AutoTask {
        let mut task = AutoTask::new(id, "u1", id, "");
        task.parent_id = Some(parent.to_string());
        task
    }

    #[test]
    fn selection_stamps_start_but_keeps_status() {
        let store = MemoryTaskStore::new(vec![AutoTask::new("m1", "u1", "Main", "")]);
        let outcome = fetch_next_task(&store, "u1", None).expect("fetch");
        let FetchOutcome::Started(runtime) = outcome else {
            panic!("expected a started task");
        };
        assert_eq!(runtime.task_id, "m1");
        assert!(runtime.plan.is_empty());
        let stored = store.task("m1").expect("task");
        assert_eq!(stored.started_at, Some(runtime.started_at));
        assert_eq!(stored.status, TaskStatus::Undone);
    }

    #[test]
    fn other_users_tasks_are_invisible() {
        let store = MemoryTaskStore::new(vec![AutoTask::new("m1", "u2", "Main", "")]);
        assert_eq!(
            fetch_next_task(&store, "u1", None).expect("fetch"),
            FetchOutcome::Idle
        );
    }

    #[test]
    fn active_runtime_pins_the_group() {
        let mut main = AutoTask::new("m1", "u1", "Main", "");
        main.status = TaskStatus::Done;
        let store = MemoryTaskStore::new(vec![
            main.clone(),
            AutoTask::new("m2", "u1", "Next", ""),
            sub("s1", "m1"),
        ]);
        let active = TaskRuntime::from_task(&main, Utc::now());

        let FetchOutcome::Started(runtime) =
            fetch_next_task(&store, "u1", Some(&active)).expect("fetch")
        else {
            panic!("expected sub-task");
        };
        assert_eq!(runtime.task_id, "s1");
        assert_eq!(runtime.parent_id.as_deref(), Some("m1"));

        let mut done = store.task("s1").expect("s1");
        done.status = TaskStatus::Done;
        let store = MemoryTaskStore::new(vec![main, AutoTask::new("m2", "u1", "Next", ""), done]);
        assert_eq!(
            fetch_next_task(&store, "u1", Some(&runtime)).expect("fetch"),
            FetchOutcome::GroupExhausted {
                main_task_id: "m1".to_string()
            }
        );
    }

    #[test]
    fn broken_chain_above_active_task_is_fatal() {
        let orphan = sub("s1", "gone");
        let store = MemoryTaskStore::new(vec![orphan.clone()]);
        let active = TaskRuntime::from_task(&orphan, Utc::now());
        let err = fetch_next_task(&store, "u1", Some(&active)).expect_err("broken");
        assert!(matches!(
            err.downcast_ref::<HierarchyError>(),
            Some(HierarchyError::BrokenParent { .. })
        ));
    }
}
