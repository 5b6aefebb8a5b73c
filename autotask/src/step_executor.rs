//! One-step-at-a-time execution with the retry and quality policy.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::error::StepError;
use crate::core::evaluate::{clamp_score, evaluate_step as apply_policy};
use crate::core::sanitize::sanitize_input;
use crate::core::selector::{Dequeue, next_ready_step};
use crate::core::types::{
    PlanStep, PriorOutput, StepOutcome, StepOutput, StepStatus, StepSummary, TaskRuntime,
};
use crate::io::completion::{Completion, InputRequest, StepSummaryRequest};
use crate::io::store::TaskStore;
use crate::io::tools::ToolRegistry;
use crate::task::{StepLogEntry, TaskUpdate};

/// Hand out the next runnable step and mark it `running`.
pub fn dequeue_ready_step(runtime: &mut TaskRuntime) -> Result<Dequeue, StepError> {
    let next = next_ready_step(runtime)?;
    if let Dequeue::Step(id) = &next {
        runtime.start_step(id)?;
        debug!(step_id = %id, "dequeued step");
    }
    Ok(next)
}

/// Outputs of `step`'s dependencies in declaration order.
fn prior_outputs(runtime: &TaskRuntime, step: &PlanStep) -> Vec<PriorOutput> {
    step.depends_on
        .iter()
        .filter_map(|dep| runtime.step(dep))
        .map(|dep| PriorOutput {
            step_id: dep.id.clone(),
            tool: dep.tool.clone(),
            output: dep
                .output
                .as_ref()
                .map(|output| output.result.clone())
                .unwrap_or(Value::Null),
        })
        .collect()
}

fn format_invoke_summarize<T: ToolRegistry, C: Completion>(
    step: &PlanStep,
    prior: &[PriorOutput],
    tools: &T,
    completion: &C,
    input_slot: &mut Option<Value>,
) -> Result<StepSummary> {
    let formatted = completion
        .format_input(&InputRequest {
            step_id: &step.id,
            tool: &step.tool,
            objective: &step.objective,
            prior,
        })
        .context("format tool input")?;
    let input = sanitize_input(formatted);
    *input_slot = Some(input.clone());

    let raw = tools
        .invoke(&step.tool, &input)
        .with_context(|| format!("invoke tool '{}'", step.tool))?;

    completion
        .summarize_step(&StepSummaryRequest {
            step_id: &step.id,
            tool: &step.tool,
            objective: &step.objective,
            input: &input,
            result: &raw,
        })
        .context("summarize tool result")
}

/// Run the `running` step `id` once.
///
/// Derives the tool input from the dependencies' outputs, invokes the tool
/// and scores the result. The step ends provisionally `done`; the retry
/// policy in [`evaluate_step`] has the final word. A failure while
/// formatting, invoking or summarizing marks the step `failed` with an
/// `{"error": ...}` output and quality zero, and is returned as a message
/// rather than an error.
#[instrument(skip_all, fields(step_id = %id))]
pub fn run_step<T: ToolRegistry, C: Completion>(
    runtime: &mut TaskRuntime,
    id: &str,
    tools: &T,
    completion: &C,
) -> Result<Option<String>, StepError> {
    let step = runtime
        .step(id)
        .ok_or_else(|| StepError::UnknownStep(id.to_string()))?;
    if step.status != StepStatus::Running {
        return Err(StepError::StepNotRunning(id.to_string()));
    }
    let step = step.clone();
    let prior = prior_outputs(runtime, &step);

    let mut input = None;
    let attempt = format_invoke_summarize(&step, &prior, tools, completion, &mut input);

    let step = runtime
        .step_mut(id)
        .ok_or_else(|| StepError::UnknownStep(id.to_string()))?;
    step.input = input;
    match attempt {
        Ok(summary) => {
            let quality_score = clamp_score(summary.quality_score);
            info!(tool = %step.tool, attempt = step.attempt, quality_score, "step ran");
            step.output = Some(StepOutput {
                result: summary.output,
                quality_score,
            });
            step.status = StepStatus::Done;
            Ok(None)
        }
        Err(err) => {
            let message = format!("step '{id}' ({}): {err:#}", step.tool);
            warn!(tool = %step.tool, attempt = step.attempt, err = %message, "step failed");
            step.output = Some(StepOutput {
                result: json!({ "error": format!("{err:#}") }),
                quality_score: 0.0,
            });
            step.status = StepStatus::Failed;
            Ok(Some(message))
        }
    }
}

fn status_word(outcome: StepOutcome) -> &'static str {
    match outcome {
        StepOutcome::Success => "done",
        StepOutcome::Retry => "retrying",
        StepOutcome::Fail => "failed",
    }
}

/// Apply the retry policy to step `id` and append the result to the task's
/// step log.
#[instrument(skip_all, fields(step_id = %id))]
pub fn evaluate_step<S: TaskStore>(
    runtime: &mut TaskRuntime,
    id: &str,
    quality_threshold: f64,
    store: &S,
) -> Result<StepOutcome> {
    let outcome = apply_policy(runtime, id, quality_threshold)?;
    let step = runtime
        .step(id)
        .ok_or_else(|| StepError::UnknownStep(id.to_string()))?;

    let message = format!(
        "{}: {} (attempt {}/{}, quality {:.2})",
        step.tool,
        status_word(outcome),
        step.attempt,
        step.max_attempts,
        step.quality_score()
    );
    debug!(outcome = ?outcome, "step evaluated");
    store
        .update_task(
            &runtime.task_id,
            &TaskUpdate::log(StepLogEntry::step(&step.id, &step.tool, message)),
        )
        .with_context(|| format!("append step log for task '{}'", runtime.task_id))?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::build_plan;
    use crate::io::store::MemoryTaskStore;
    use crate::task::AutoTask;
    use crate::test_support::{ScriptedCompletion, ScriptedTools, step_spec};
    use chrono::Utc;

    fn runtime(specs: Vec<crate::core::types::StepSpec>) -> TaskRuntime {
        let task = AutoTask::new("t1", "u1", "Digest", "");
        let mut runtime = TaskRuntime::from_task(&task, Utc::now());
        let plan = build_plan(
            specs,
            &["search".to_string(), "mail".to_string()],
            2,
        )
        .expect("plan");
        runtime.plan = plan.steps;
        runtime.ready_queue = plan.order;
        runtime
    }

    #[test]
    fn dequeue_marks_running() {
        let mut runtime = runtime(vec![step_spec("a", "search", &[])]);
        assert_eq!(
            dequeue_ready_step(&mut runtime),
            Ok(Dequeue::Step("a".to_string()))
        );
        assert_eq!(runtime.step("a").expect("a").status, StepStatus::Running);
    }

    #[test]
    fn run_step_passes_prior_outputs_and_sanitized_input() {
        let mut runtime = runtime(vec![step_spec("a", "search", &[]), step_spec("b", "mail", &["a"])]);
        let tools = ScriptedTools::new();
        let completion = ScriptedCompletion::new()
            .with_input("b", json!({" \"to\" ": "me"}))
            .with_output("a", json!({"hits": 2}));

        dequeue_ready_step(&mut runtime).expect("dequeue a");
        assert_eq!(run_step(&mut runtime, "a", &tools, &completion), Ok(None));
        apply_policy(&mut runtime, "a", 0.5).expect("evaluate a");

        dequeue_ready_step(&mut runtime).expect("dequeue b");
        assert_eq!(run_step(&mut runtime, "b", &tools, &completion), Ok(None));

        let b = runtime.step("b").expect("b");
        assert_eq!(b.input, Some(json!({"to": "me"})));
        assert_eq!(b.status, StepStatus::Done);
        let prior = completion.input_priors("b");
        assert_eq!(prior.len(), 1);
        assert_eq!(prior[0].output, json!({"hits": 2}));
        assert_eq!(tools.invocations(), vec!["search".to_string(), "mail".to_string()]);
    }

    #[test]
    fn tool_failure_marks_step_failed_with_error_output() {
        let mut runtime = runtime(vec![step_spec("a", "search", &[])]);
        let tools = ScriptedTools::new().failing("search", 1);
        let completion = ScriptedCompletion::new();

        dequeue_ready_step(&mut runtime).expect("dequeue");
        let message = run_step(&mut runtime, "a", &tools, &completion)
            .expect("run")
            .expect("step-local error");
        assert!(message.contains("invoke tool 'search'"));

        let a = runtime.step("a").expect("a");
        assert_eq!(a.status, StepStatus::Failed);
        assert_eq!(a.quality_score(), 0.0);
        let output = a.output.as_ref().expect("output");
        assert!(output.result["error"].is_string());
    }

    #[test]
    fn scores_are_clamped() {
        let mut runtime = runtime(vec![step_spec("a", "search", &[])]);
        let completion = ScriptedCompletion::new().with_scores("a", &[3.5]);
        dequeue_ready_step(&mut runtime).expect("dequeue");
        run_step(&mut runtime, "a", &ScriptedTools::new(), &completion).expect("run");
        assert_eq!(runtime.step("a").expect("a").quality_score(), 1.0);
    }

    #[test]
    fn run_step_requires_running_status() {
        let mut runtime = runtime(vec![step_spec("a", "search", &[])]);
        assert_eq!(
            run_step(&mut runtime, "a", &ScriptedTools::new(), &ScriptedCompletion::new()),
            Err(StepError::StepNotRunning("a".to_string()))
        );
    }

    #[test]
    fn evaluation_appends_step_log() {
        let task = AutoTask::new("t1", "u1", "Digest", "");
        let store = MemoryTaskStore::new(vec![task]);
        let mut runtime = runtime(vec![step_spec("a", "search", &[])]);
        let completion = ScriptedCompletion::new().with_scores("a", &[0.2]);

        dequeue_ready_step(&mut runtime).expect("dequeue");
        run_step(&mut runtime, "a", &ScriptedTools::new(), &completion).expect("run");
        let outcome = evaluate_step(&mut runtime, "a", 0.5, &store).expect("evaluate");
        assert_eq!(outcome, StepOutcome::Retry);

        let log = store.task("t1").expect("task").step_log;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].step_id.as_deref(), Some("a"));
        assert_eq!(log[0].message, "search: retrying (attempt 1/2, quality 0.20)");
    }
}
