//! Side-effecting adapters behind the orchestrator's collaborator traits.

pub mod completion;
pub mod config;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod schema;
pub mod store;
pub mod tools;
