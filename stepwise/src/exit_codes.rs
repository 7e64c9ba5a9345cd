//! Stable exit codes for stepwise CLI commands.

/// Command succeeded or the process ran to completion.
pub const OK: i32 = 0;
/// Invalid process, scene or config, or any other error.
pub const INVALID: i32 = 1;
/// `stepwise run` stopped on an invalid transition.
pub const HALTED: i32 = 3;
/// `stepwise run` hit `max_ticks` before the process completed.
pub const TICK_LIMIT: i32 = 4;
