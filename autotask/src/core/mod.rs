//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod error;
pub mod evaluate;
pub mod hierarchy;
pub mod invariants;
pub mod plan;
pub mod sanitize;
pub mod selector;
pub mod types;
