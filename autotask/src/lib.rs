//! Background orchestrator for user-owned automation tasks.
//!
//! Each invocation picks the next task for a user, asks a planner to break it
//! into tool steps, runs those steps one at a time with a retry and quality
//! policy, and writes the task-level result back to the store. Once every
//! sub-task of a group is done, a group report lands on the main task.
//!
//! - **[`core`]**: Pure, deterministic logic (plan graph, selection, retry
//!   policy, hierarchy walks, invariants). No I/O.
//! - **[`io`]**: Side-effecting adapters (config, task store, tool processes,
//!   prompt rendering, text generation).
//!
//! Orchestration modules ([`scheduler`], [`plan_builder`], [`step_executor`],
//! [`aggregator`], [`orchestrator`], [`looping`]) coordinate core logic with
//! the collaborator traits.

pub mod aggregator;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod orchestrator;
pub mod plan_builder;
pub mod scheduler;
pub mod step_executor;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
