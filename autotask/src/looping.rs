//! Multi-invocation helper for `autotask loop`.

use tracing::{info, instrument};

use crate::core::types::{RunOutcome, RunReport};
use crate::io::completion::Completion;
use crate::io::store::TaskStore;
use crate::io::tools::ToolRegistry;
use crate::orchestrator::Orchestrator;

/// Reason why [`run_until_finished`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Nothing is left to do for the user.
    Finished,
    /// An invocation halted with a fatal error.
    Halted { error: String },
    /// `max_runs` invocations ran and work may remain.
    MaxRunsExceeded { max_runs: u32 },
}

/// Summary of a loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub runs: u32,
    /// Titles of every task finalized across the loop, in order.
    pub completed_tasks: Vec<String>,
    pub stop: LoopStop,
}

/// Call `run_once` until the user's backlog is empty, a run halts, or
/// `max_runs` invocations have been made.
///
/// A run that completes a group is followed by another run; `on_run` sees
/// every report as it arrives.
#[instrument(skip_all, fields(user_id = %user_id, max_runs = max_runs))]
pub fn run_until_finished<S, T, C, F>(
    orchestrator: &Orchestrator<'_, S, T, C>,
    user_id: &str,
    max_runs: u32,
    mut on_run: F,
) -> LoopOutcome
where
    S: TaskStore,
    T: ToolRegistry,
    C: Completion,
    F: FnMut(&RunReport),
{
    let mut runs = 0u32;
    let mut completed_tasks = Vec::new();
    loop {
        if runs >= max_runs {
            info!(runs, "run limit reached");
            return LoopOutcome {
                runs,
                completed_tasks,
                stop: LoopStop::MaxRunsExceeded { max_runs },
            };
        }

        let report = orchestrator.run_once(user_id);
        runs += 1;
        on_run(&report);
        completed_tasks.extend(report.completed_tasks.iter().cloned());

        match report.outcome {
            RunOutcome::GroupCompleted { .. } => {}
            RunOutcome::Idle => {
                return LoopOutcome {
                    runs,
                    completed_tasks,
                    stop: LoopStop::Finished,
                };
            }
            RunOutcome::Halted => {
                return LoopOutcome {
                    runs,
                    completed_tasks,
                    stop: LoopStop::Halted {
                        error: report.error.unwrap_or_default(),
                    },
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::OrchestratorConfig;
    use crate::io::store::MemoryTaskStore;
    use crate::test_support::{
        ScriptedCompletion, ScriptedTools, UnreachableStore, main_task, step_spec,
    };

    #[test]
    fn loop_runs_every_group_then_stops_idle() {
        let store = MemoryTaskStore::new(vec![main_task("m1", "First"), main_task("m2", "Second")]);
        let tools = ScriptedTools::new();
        let completion = ScriptedCompletion::new()
            .with_plan("First", vec![step_spec("a", "search", &[])])
            .with_plan("Second", vec![step_spec("a", "mail", &[])]);
        let orchestrator =
            Orchestrator::new(&store, &tools, &completion, OrchestratorConfig::default());

        let mut outcomes = Vec::new();
        let outcome = run_until_finished(&orchestrator, "u1", 10, |report| {
            outcomes.push(report.outcome.clone());
        });

        assert_eq!(outcome.stop, LoopStop::Finished);
        assert_eq!(outcome.runs, 3);
        assert_eq!(outcome.completed_tasks, vec!["First", "Second"]);
        assert_eq!(outcomes.last(), Some(&RunOutcome::Idle));
    }

    #[test]
    fn loop_respects_max_runs() {
        let store = MemoryTaskStore::new(vec![main_task("m1", "First"), main_task("m2", "Second")]);
        let tools = ScriptedTools::new();
        let completion = ScriptedCompletion::new()
            .with_plan("First", vec![step_spec("a", "search", &[])])
            .with_plan("Second", vec![step_spec("a", "search", &[])]);
        let orchestrator =
            Orchestrator::new(&store, &tools, &completion, OrchestratorConfig::default());

        let outcome = run_until_finished(&orchestrator, "u1", 1, |_| {});
        assert_eq!(outcome.stop, LoopStop::MaxRunsExceeded { max_runs: 1 });
        assert_eq!(outcome.completed_tasks, vec!["First"]);
    }

    #[test]
    fn loop_stops_on_halt() {
        let store = UnreachableStore;
        let tools = ScriptedTools::new();
        let completion = ScriptedCompletion::new();
        let orchestrator =
            Orchestrator::new(&store, &tools, &completion, OrchestratorConfig::default());

        let outcome = run_until_finished(&orchestrator, "u1", 5, |_| {});
        assert_eq!(outcome.runs, 1);
        let LoopStop::Halted { error } = outcome.stop else {
            panic!("expected a halted loop");
        };
        assert!(error.contains("store unreachable"));
    }
}
