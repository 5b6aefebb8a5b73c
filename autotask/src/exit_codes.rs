//! Stable exit codes for autotask CLI commands.

/// Command succeeded; `run` completed a group.
pub const OK: i32 = 0;
/// Command failed due to invalid config, task file or arguments.
pub const INVALID: i32 = 1;
/// `run` or `loop` found nothing left to do for the user.
pub const IDLE: i32 = 2;
/// `run` or `loop` halted on a fatal error.
pub const HALTED: i32 = 3;
