//! Typed error taxonomy for orchestration.
//!
//! The orchestrator downcasts `anyhow::Error` values to these types to decide
//! whether a failure halts the invocation or stays local to a step.

use thiserror::Error;

/// Errors raised while turning a planner response into an executable plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("step '{step}' uses tool '{tool}' which is not permitted")]
    UnknownTool { step: String, tool: String },

    #[error("cyclic dependency: ordered {ordered} of {total} steps")]
    CyclicDependency { ordered: usize, total: usize },

    #[error("planner returned no steps")]
    EmptyPlan,
}

/// Errors raised by the step executor. All of them halt the invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("step '{step}' is ready but dependency '{dependency}' is not done")]
    DependencyNotSatisfied { step: String, dependency: String },

    #[error("unknown step id: {0}")]
    UnknownStep(String),

    #[error("step '{0}' is not running")]
    StepNotRunning(String),
}

/// Errors raised while walking the task hierarchy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task '{task}' references missing parent '{parent}'")]
    BrokenParent { task: String, parent: String },

    #[error("parent chain of task '{0}' loops back on itself")]
    ParentCycle(String),
}

/// Errors raised by the orchestration state machine itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("task '{task}' is not ready to finalize: {completed} of {total} steps completed")]
    NotReadyToFinalize {
        task: String,
        completed: usize,
        total: usize,
    },

    #[error("iteration limit of {0} transitions exceeded")]
    IterationLimitExceeded(u32),

    #[error("no active task")]
    NoActiveTask,
}
