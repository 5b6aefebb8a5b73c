//! Task-level results and group-level reports.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::core::error::OrchestratorError;
use crate::core::hierarchy::{group_in_tree_order, walk_to_root};
use crate::core::invariants::validate_runtime;
use crate::core::types::{GroupSection, TaskResult, TaskRuntime};
use crate::io::completion::{Completion, ReportRequest, TaskSummaryRequest};
use crate::io::store::TaskStore;
use crate::task::{AutoTask, StepLogEntry, TaskStatus, TaskUpdate};

/// Summary used when the narrative service fails.
pub const PLACEHOLDER_SUMMARY: &str = "Task completed; no summary is available.";

/// Report used when the document service fails.
pub const PLACEHOLDER_REPORT: &str = "# Report unavailable\n\nThe group finished, but its report could not be generated.";

/// Seal a fully completed runtime with its task-level result.
///
/// Calling it again once a result exists changes nothing and makes no
/// service call.
#[instrument(skip_all, fields(task_id = %runtime.task_id))]
pub fn finalize_task<C: Completion>(
    runtime: &mut TaskRuntime,
    completion: &C,
) -> Result<(), OrchestratorError> {
    if runtime.result.is_some() {
        return Ok(());
    }
    if !runtime.ready_queue.is_empty() || runtime.completed_ids.len() != runtime.plan.len() {
        return Err(OrchestratorError::NotReadyToFinalize {
            task: runtime.task_id.clone(),
            completed: runtime.completed_ids.len(),
            total: runtime.plan.len(),
        });
    }

    let violations = validate_runtime(runtime);
    if !violations.is_empty() {
        warn!(violations = ?violations, "runtime invariants violated at finalization");
    }

    let steps = runtime.completed_records();
    let summary = match completion.summarize_task(&TaskSummaryRequest {
        title: &runtime.title,
        description: &runtime.description,
        steps: &steps,
    }) {
        Ok(summary) if !summary.trim().is_empty() => summary,
        Ok(_) => {
            warn!("narrative service returned an empty summary");
            PLACEHOLDER_SUMMARY.to_string()
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "narrative service failed");
            PLACEHOLDER_SUMMARY.to_string()
        }
    };

    runtime.result = Some(TaskResult {
        completed: true,
        summary,
        steps,
    });
    runtime.finished_at = Some(Utc::now());
    info!(steps = runtime.completed_ids.len(), "task finalized");
    Ok(())
}

/// Write a finalized runtime's result back to its task.
pub fn persist_task_result<S: TaskStore>(store: &S, runtime: &TaskRuntime) -> Result<AutoTask> {
    let result = runtime
        .result
        .as_ref()
        .ok_or_else(|| OrchestratorError::NotReadyToFinalize {
            task: runtime.task_id.clone(),
            completed: runtime.completed_ids.len(),
            total: runtime.plan.len(),
        })?;
    let output = serde_json::to_value(result).context("serialize task result")?;
    store
        .update_task(
            &runtime.task_id,
            &TaskUpdate {
                status: Some(TaskStatus::Done),
                finished_at: Some(runtime.finished_at.unwrap_or_else(Utc::now)),
                output: Some(output),
                log_append: vec![StepLogEntry::task(format!(
                    "completed {} step(s)",
                    runtime.completed_ids.len()
                ))],
                ..TaskUpdate::default()
            },
        )
        .with_context(|| format!("persist result of task '{}'", runtime.task_id))
}

/// Report written for an exhausted group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReport {
    pub main_task_id: String,
    /// Task ids in report order: main task first.
    pub chain: Vec<String>,
    pub sections: Vec<GroupSection>,
    pub report: String,
    /// True when the placeholder document was used.
    pub degraded: bool,
}

/// Output the main task keeps once its group report is written.
fn main_task_output(report: &str, previous: Option<&Value>) -> Value {
    let task_result = match previous {
        Some(Value::Object(map)) if map.contains_key("report") => {
            map.get("task_result").cloned().unwrap_or(Value::Null)
        }
        Some(value) => value.clone(),
        None => Value::Null,
    };
    json!({ "report": report, "task_result": task_result })
}

/// Build and persist the report for the group containing `from_task_id`.
///
/// Walks up from the just-finished task to its main task, then reports on the
/// whole group in tree order: each task after its parent, siblings in
/// creation order. A broken or looping parent chain is fatal and surfaces as
/// [`crate::core::error::HierarchyError`].
#[instrument(skip_all, fields(user_id = %user_id, from = %from_task_id))]
pub fn aggregate_group<S: TaskStore, C: Completion>(
    store: &S,
    completion: &C,
    user_id: &str,
    from_task_id: &str,
) -> Result<GroupReport> {
    let tasks = store
        .list_user_tasks(user_id)
        .with_context(|| format!("load tasks for user '{user_id}'"))?;

    let walked = walk_to_root(&tasks, from_task_id)?;
    let Some(main) = walked.last().copied() else {
        return Err(OrchestratorError::NoActiveTask.into());
    };

    let chain: Vec<&AutoTask> = group_in_tree_order(&tasks, &main.id);
    let sections: Vec<GroupSection> = chain.iter().map(|task| GroupSection::from_task(task)).collect();

    let (report, degraded) = match completion.write_report(&ReportRequest {
        main_title: &main.title,
        sections: &sections,
    }) {
        Ok(report) => (report, false),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "document service failed");
            (PLACEHOLDER_REPORT.to_string(), true)
        }
    };

    store
        .update_task(
            &main.id,
            &TaskUpdate {
                output: Some(main_task_output(&report, main.output.as_ref())),
                log_append: vec![StepLogEntry::task(format!(
                    "group report written for {} task(s)",
                    sections.len()
                ))],
                ..TaskUpdate::default()
            },
        )
        .with_context(|| format!("persist report on main task '{}'", main.id))?;

    info!(main_task_id = %main.id, members = sections.len(), degraded, "group aggregated");
    Ok(GroupReport {
        main_task_id: main.id.clone(),
        chain: chain.iter().map(|task| task.id.clone()).collect(),
        sections,
        report,
        degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::HierarchyError;
    use crate::core::types::{PlanStep, StepOutput, StepStatus};
    use crate::io::store::MemoryTaskStore;
    use crate::test_support::{ScriptedCompletion, main_task, step_spec, sub_task};

    fn completed_runtime() -> TaskRuntime {
        let task = AutoTask::new("t1", "u1", "Digest", "weekly");
        let mut runtime = TaskRuntime::from_task(&task, Utc::now());
        for id in ["a", "b"] {
            let mut step = PlanStep::from_spec(step_spec(id, "search", &[]), 2);
            step.status = StepStatus::Done;
            step.output = Some(StepOutput {
                result: json!({ "from": id }),
                quality_score: 0.9,
            });
            runtime.plan.insert(id.to_string(), step);
        }
        runtime.completed_ids = vec!["b".to_string(), "a".to_string()];
        runtime
    }

    #[test]
    fn finalize_records_steps_in_completion_order() {
        let mut runtime = completed_runtime();
        let completion = ScriptedCompletion::new();
        finalize_task(&mut runtime, &completion).expect("finalize");

        let result = runtime.result.as_ref().expect("result");
        assert!(result.completed);
        let ids: Vec<&str> = result.steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(result.steps[0].output, json!({"from": "b"}));
        assert!(runtime.finished_at.is_some());
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut runtime = completed_runtime();
        let completion = ScriptedCompletion::new();
        finalize_task(&mut runtime, &completion).expect("first");
        let sealed = runtime.clone();
        finalize_task(&mut runtime, &completion).expect("second");
        assert_eq!(runtime, sealed);
        assert_eq!(completion.task_summary_calls(), 1);
    }

    #[test]
    fn finalize_refuses_incomplete_runtime() {
        let mut runtime = completed_runtime();
        runtime.completed_ids.pop();
        let err = finalize_task(&mut runtime, &ScriptedCompletion::new()).expect_err("incomplete");
        assert_eq!(
            err,
            OrchestratorError::NotReadyToFinalize {
                task: "t1".to_string(),
                completed: 1,
                total: 2
            }
        );
        assert!(runtime.result.is_none());
    }

    #[test]
    fn narrative_failure_uses_placeholder() {
        let mut runtime = completed_runtime();
        let completion = ScriptedCompletion::new().failing_task_summary();
        finalize_task(&mut runtime, &completion).expect("finalize");
        assert_eq!(
            runtime.result.expect("result").summary,
            PLACEHOLDER_SUMMARY
        );
    }

    #[test]
    fn persist_marks_task_done_with_result() {
        let store = MemoryTaskStore::new(vec![AutoTask::new("t1", "u1", "Digest", "weekly")]);
        let mut runtime = completed_runtime();
        finalize_task(&mut runtime, &ScriptedCompletion::new()).expect("finalize");
        persist_task_result(&store, &runtime).expect("persist");

        let stored = store.task("t1").expect("task");
        assert_eq!(stored.status, TaskStatus::Done);
        assert_eq!(stored.finished_at, runtime.finished_at);
        assert_eq!(stored.output.expect("output")["completed"], json!(true));
    }

    #[test]
    fn report_covers_group_in_tree_order() {
        let mut main = main_task("m", "Main");
        main.output = Some(json!({"completed": true, "summary": "main done"}));
        let store = MemoryTaskStore::new(vec![
            main,
            sub_task("s1", "m", "First"),
            sub_task("s2", "s1", "Nested"),
            sub_task("s3", "m", "Flat"),
        ]);
        let completion = ScriptedCompletion::new();

        let report = aggregate_group(&store, &completion, "u1", "s2").expect("report");
        assert_eq!(report.chain, vec!["m", "s1", "s2", "s3"]);
        assert!(!report.degraded);

        let requests = completion.report_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "Main");
        assert_eq!(requests[0].1.len(), 4);

        let output = store.task("m").expect("main").output.expect("output");
        assert_eq!(output["report"], json!(report.report));
        assert_eq!(output["task_result"]["summary"], json!("main done"));
    }

    #[test]
    fn report_lists_flat_siblings_in_creation_order() {
        let store = MemoryTaskStore::new(vec![
            main_task("m", "Main"),
            sub_task("s1", "m", "First"),
            sub_task("s2", "m", "Second"),
        ]);
        let completion = ScriptedCompletion::new();

        let report = aggregate_group(&store, &completion, "u1", "s2").expect("report");
        assert_eq!(report.chain, vec!["m", "s1", "s2"]);
        let titles: Vec<String> = completion.report_requests()[0]
            .1
            .iter()
            .map(|section| section.title.clone())
            .collect();
        assert_eq!(titles, vec!["Main", "First", "Second"]);
    }

    #[test]
    fn repeated_report_keeps_original_task_result() {
        let store = MemoryTaskStore::new(vec![main_task("m", "Main"), sub_task("s1", "m", "Sub")]);
        let completion = ScriptedCompletion::new();
        store
            .update_task(
                "m",
                &TaskUpdate {
                    output: Some(json!({"summary": "first"})),
                    ..TaskUpdate::default()
                },
            )
            .expect("seed output");
        aggregate_group(&store, &completion, "u1", "s1").expect("first report");
        aggregate_group(&store, &completion, "u1", "s1").expect("second report");

        let output = store.task("m").expect("main").output.expect("output");
        assert_eq!(output["task_result"], json!({"summary": "first"}));
    }

    #[test]
    fn report_failure_uses_placeholder() {
        let store = MemoryTaskStore::new(vec![main_task("m", "Main")]);
        let completion = ScriptedCompletion::new().failing_report();
        let report = aggregate_group(&store, &completion, "u1", "m").expect("report");
        assert!(report.degraded);
        assert_eq!(report.report, PLACEHOLDER_REPORT);
        assert_eq!(report.chain, vec!["m"]);
    }

    #[test]
    fn broken_chain_is_fatal() {
        let store = MemoryTaskStore::new(vec![sub_task("s1", "gone", "Orphan")]);
        let err = aggregate_group(&store, &ScriptedCompletion::new(), "u1", "s1")
            .expect_err("broken");
        assert!(matches!(
            err.downcast_ref::<HierarchyError>(),
            Some(HierarchyError::BrokenParent { .. })
        ));
    }
}
