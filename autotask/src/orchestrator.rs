//! The per-invocation orchestration state machine.
//!
//! One call to [`Orchestrator::run_once`] selects work, plans it, runs its
//! steps one at a time and finalizes it, repeating until a group is reported,
//! nothing is left to do, or a fatal error halts the invocation. Only task
//! store writes survive between invocations.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::aggregator::{aggregate_group, finalize_task, persist_task_result};
use crate::core::error::{HierarchyError, OrchestratorError, PlanError, StepError};
use crate::core::selector::Dequeue;
use crate::core::types::{BgState, RunOutcome, RunReport, StepOutcome, StepStatus, TaskRuntime};
use crate::io::completion::Completion;
use crate::io::config::OrchestratorConfig;
use crate::io::store::TaskStore;
use crate::io::tools::ToolRegistry;
use crate::plan_builder::initialize_plan;
use crate::scheduler::{FetchOutcome, fetch_next_task};
use crate::step_executor::{dequeue_ready_step, evaluate_step, run_step};
use crate::task::{StepLogEntry, TaskStatus, TaskUpdate};

/// Next transition of the state machine.
#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Fetch,
    Plan,
    Dequeue,
    Run(String),
    Evaluate(String),
    Finalize,
    /// Report the group containing this task.
    Aggregate(String),
    Finish(RunOutcome),
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Fetch => "fetch",
            Phase::Plan => "plan",
            Phase::Dequeue => "dequeue",
            Phase::Run(_) => "run",
            Phase::Evaluate(_) => "evaluate",
            Phase::Finalize => "finalize",
            Phase::Aggregate(_) => "aggregate",
            Phase::Finish(_) => "finish",
        }
    }
}

/// Short label for the log line of a halting error.
fn error_kind(err: &anyhow::Error) -> &'static str {
    if err.downcast_ref::<PlanError>().is_some() {
        "plan"
    } else if err.downcast_ref::<StepError>().is_some() {
        "step"
    } else if err.downcast_ref::<HierarchyError>().is_some() {
        "hierarchy"
    } else if err.downcast_ref::<OrchestratorError>().is_some() {
        "orchestrator"
    } else {
        "io"
    }
}

fn active(state: &mut BgState) -> Result<&mut TaskRuntime, OrchestratorError> {
    state.current.as_mut().ok_or(OrchestratorError::NoActiveTask)
}

/// Drives tasks for one user through their collaborators.
pub struct Orchestrator<'a, S, T, C> {
    store: &'a S,
    tools: &'a T,
    completion: &'a C,
    config: OrchestratorConfig,
}

impl<'a, S: TaskStore, T: ToolRegistry, C: Completion> Orchestrator<'a, S, T, C> {
    pub fn new(store: &'a S, tools: &'a T, completion: &'a C, config: OrchestratorConfig) -> Self {
        Self {
            store,
            tools,
            completion,
            config,
        }
    }

    /// Run one invocation for `user_id` until it finishes.
    ///
    /// Never returns an error: fatal failures end up in
    /// [`RunReport::error`] with [`RunOutcome::Halted`], and leave the
    /// persisted task status as it was.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub fn run_once(&self, user_id: &str) -> RunReport {
        let mut state = BgState::new(user_id);
        let mut completed_tasks = Vec::new();
        let mut iterations = 0u32;
        let mut phase = Phase::Fetch;

        let outcome = loop {
            if let Phase::Finish(outcome) = phase {
                break outcome;
            }
            if iterations >= self.config.iteration_limit {
                let err = OrchestratorError::IterationLimitExceeded(self.config.iteration_limit);
                warn!(err = %err, phase = phase.name(), "halting run");
                state.halt(err.to_string());
                break RunOutcome::Halted;
            }
            iterations += 1;
            debug!(phase = phase.name(), iteration = iterations, "transition");

            match self.advance(&mut state, phase, &mut completed_tasks) {
                Ok(next) => phase = next,
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(kind = error_kind(&err), err = %message, "halting run");
                    state.halt(message);
                    break RunOutcome::Halted;
                }
            }
        };
        state.finished = true;

        info!(
            outcome = ?outcome,
            iterations,
            completed = completed_tasks.len(),
            "run finished"
        );
        RunReport {
            finished: state.finished,
            error: state.error,
            active_task: state.current.as_ref().map(TaskRuntime::snapshot),
            outcome,
            completed_tasks,
            iterations,
        }
    }

    fn advance(
        &self,
        state: &mut BgState,
        phase: Phase,
        completed_tasks: &mut Vec<String>,
    ) -> Result<Phase> {
        match phase {
            Phase::Fetch => {
                let fetched = fetch_next_task(self.store, &state.user_id, state.current.as_ref())?;
                Ok(match fetched {
                    FetchOutcome::Started(runtime) => {
                        state.current = Some(runtime);
                        state.current_step = None;
                        Phase::Plan
                    }
                    FetchOutcome::GroupExhausted { main_task_id } => {
                        let from = state
                            .current
                            .as_ref()
                            .map(|runtime| runtime.task_id.clone())
                            .unwrap_or(main_task_id);
                        Phase::Aggregate(from)
                    }
                    FetchOutcome::Idle => Phase::Finish(RunOutcome::Idle),
                })
            }
            Phase::Plan => {
                let user_id = state.user_id.clone();
                let runtime = active(state)?;
                initialize_plan(
                    runtime,
                    &user_id,
                    self.store,
                    self.tools,
                    self.completion,
                    self.config.max_attempts,
                )?;
                Ok(Phase::Dequeue)
            }
            Phase::Dequeue => {
                let next = dequeue_ready_step(active(state)?)?;
                match next {
                    Dequeue::Step(id) => {
                        state.current_step = Some(id.clone());
                        Ok(Phase::Run(id))
                    }
                    Dequeue::Exhausted => {
                        if active(state)?.is_complete() {
                            return Ok(Phase::Finalize);
                        }
                        self.stall(state, Vec::new())?;
                        Ok(Phase::Fetch)
                    }
                    Dequeue::Stalled { blocked } => {
                        self.stall(state, blocked)?;
                        Ok(Phase::Fetch)
                    }
                }
            }
            Phase::Run(id) => {
                let runtime = active(state)?;
                if let Some(message) = run_step(runtime, &id, self.tools, self.completion)? {
                    state.record_error(message);
                }
                Ok(Phase::Evaluate(id))
            }
            Phase::Evaluate(id) => {
                let runtime = active(state)?;
                let outcome =
                    evaluate_step(runtime, &id, self.config.quality_threshold, self.store)?;
                match outcome {
                    StepOutcome::Success => Ok(Phase::Dequeue),
                    StepOutcome::Retry => {
                        runtime.start_step(&id)?;
                        Ok(Phase::Run(id))
                    }
                    StepOutcome::Fail => {
                        let attempts = runtime.step(&id).map(|step| step.attempt + 1).unwrap_or(0);
                        state.record_error(format!(
                            "step '{id}' failed after {attempts} attempt(s)"
                        ));
                        Ok(Phase::Dequeue)
                    }
                }
            }
            Phase::Finalize => {
                let runtime = active(state)?;
                finalize_task(runtime, self.completion)?;
                persist_task_result(self.store, runtime)?;
                let title = runtime.title.clone();
                state.last_completed_title = Some(title.clone());
                state.current_step = None;
                completed_tasks.push(title);
                Ok(Phase::Fetch)
            }
            Phase::Aggregate(from) => {
                let report = aggregate_group(self.store, self.completion, &state.user_id, &from)?;
                state.current = None;
                state.current_step = None;
                state.finished = true;
                Ok(Phase::Finish(RunOutcome::GroupCompleted {
                    main_task_id: report.main_task_id,
                }))
            }
            Phase::Finish(outcome) => Ok(Phase::Finish(outcome)),
        }
    }

    /// Give up on the active task without finalizing it.
    ///
    /// The task is written `doing`; scheduling moves on to the rest of its group.
    fn stall(&self, state: &mut BgState, blocked: Vec<String>) -> Result<()> {
        let runtime = active(state)?;
        let failed: Vec<String> = runtime
            .plan
            .values()
            .filter(|step| step.status == StepStatus::Failed)
            .map(|step| format!("{} ({})", step.id, step.tool))
            .collect();
        let mut message = format!(
            "task '{}' stalled: failed steps [{}]",
            runtime.task_id,
            failed.join(", ")
        );
        if !blocked.is_empty() {
            message.push_str(&format!("; blocked steps [{}]", blocked.join(", ")));
        }

        warn!(task_id = %runtime.task_id, failed = failed.len(), blocked = blocked.len(), "task stalled");
        self.store.update_task(
            &runtime.task_id,
            &TaskUpdate {
                status: Some(TaskStatus::Doing),
                log_append: vec![StepLogEntry::task(message.clone())],
                ..TaskUpdate::default()
            },
        )?;
        state.current_step = None;
        state.record_error(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::MemoryTaskStore;
    use crate::task::AutoTask;
    use crate::test_support::{ScriptedCompletion, ScriptedTools, main_task, step_spec};

    fn orchestrator<'a>(
        store: &'a MemoryTaskStore,
        tools: &'a ScriptedTools,
        completion: &'a ScriptedCompletion,
    ) -> Orchestrator<'a, MemoryTaskStore, ScriptedTools, ScriptedCompletion> {
        Orchestrator::new(store, tools, completion, OrchestratorConfig::default())
    }

    #[test]
    fn empty_backlog_finishes_idle_without_error() {
        let store = MemoryTaskStore::new(Vec::<AutoTask>::new());
        let tools = ScriptedTools::new();
        let completion = ScriptedCompletion::new();
        let report = orchestrator(&store, &tools, &completion).run_once("u1");
        assert!(report.finished);
        assert_eq!(report.error, None);
        assert_eq!(report.outcome, RunOutcome::Idle);
        assert_eq!(report.iterations, 1);
    }

    #[test]
    fn single_task_runs_to_its_group_report() {
        let store = MemoryTaskStore::new(vec![main_task("m", "Digest")]);
        let tools = ScriptedTools::new();
        let completion = ScriptedCompletion::new().with_plan(
            "Digest",
            vec![step_spec("a", "search", &[]), step_spec("b", "mail", &["a"])],
        );
        let report = orchestrator(&store, &tools, &completion).run_once("u1");

        assert_eq!(report.error, None);
        assert_eq!(
            report.outcome,
            RunOutcome::GroupCompleted {
                main_task_id: "m".to_string()
            }
        );
        assert_eq!(report.completed_tasks, vec!["Digest".to_string()]);
        assert!(report.active_task.is_none());

        let stored = store.task("m").expect("task");
        assert_eq!(stored.status, TaskStatus::Done);
        let output = stored.output.expect("output");
        assert!(output["report"].is_string());
        assert_eq!(output["task_result"]["completed"], serde_json::json!(true));
    }

    #[test]
    fn iteration_limit_halts() {
        let store = MemoryTaskStore::new(vec![main_task("m", "Digest")]);
        let tools = ScriptedTools::new();
        let completion = ScriptedCompletion::new()
            .with_plan("Digest", vec![step_spec("a", "search", &[])]);
        let config = OrchestratorConfig {
            iteration_limit: 3,
            ..OrchestratorConfig::default()
        };
        let report = Orchestrator::new(&store, &tools, &completion, config).run_once("u1");

        assert_eq!(report.outcome, RunOutcome::Halted);
        assert_eq!(report.iterations, 3);
        assert_eq!(
            report.error.as_deref(),
            Some("iteration limit of 3 transitions exceeded")
        );
        let active = report.active_task.expect("active task");
        assert_eq!(active.task_id, "m");
    }

    #[test]
    fn phase_names_are_stable() {
        assert_eq!(Phase::Evaluate("a".to_string()).name(), "evaluate");
        assert_eq!(Phase::Finish(RunOutcome::Idle).name(), "finish");
    }
}
