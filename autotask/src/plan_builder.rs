//! Expansion of a selected task into an executable plan.

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::plan::build_plan;
use crate::core::types::TaskRuntime;
use crate::io::completion::{Completion, PlanRequest};
use crate::io::store::TaskStore;
use crate::io::tools::ToolRegistry;
use crate::task::{StepLogEntry, TaskUpdate};

/// Build the plan for `runtime` unless it already has one.
///
/// Asks the planner for steps limited to the tools `user_id` may use, then
/// validates and orders them. On success the plan is logged on the task, whose
/// status stays `undone` until it is finalized or stalls, so a run that halts
/// mid-plan is picked up again by the next invocation. Any failure leaves the
/// runtime's plan empty and the stored task untouched; plan validation
/// failures surface as [`crate::core::error::PlanError`].
#[instrument(skip_all, fields(task_id = %runtime.task_id))]
pub fn initialize_plan<S: TaskStore, T: ToolRegistry, C: Completion>(
    runtime: &mut TaskRuntime,
    user_id: &str,
    store: &S,
    tools: &T,
    completion: &C,
    max_attempts: u32,
) -> Result<()> {
    if !runtime.plan.is_empty() {
        return Ok(());
    }

    let allowed = tools
        .list_allowed_tools(user_id)
        .with_context(|| format!("list tools for user '{user_id}'"))?;
    let specs = completion
        .plan_steps(&PlanRequest {
            title: &runtime.title,
            description: &runtime.description,
            tools: &allowed,
        })
        .with_context(|| format!("request plan for task '{}'", runtime.task_id))?;

    let plan = build_plan(specs, &allowed, max_attempts)?;
    let step_count = plan.order.len();

    store
        .update_task(
            &runtime.task_id,
            &TaskUpdate::log(StepLogEntry::task(format!(
                "plan ready: {}",
                plan.order.join(" -> ")
            ))),
        )
        .with_context(|| format!("log plan for task '{}'", runtime.task_id))?;

    runtime.plan = plan.steps;
    runtime.ready_queue = plan.order;
    info!(steps = step_count, "plan initialized");
    Ok(())
}
