//! Stable exit codes for coder CLI commands.

/// The session stopped gracefully (submit, exit, budget, no user input), or
/// the command succeeded.
pub const OK: i32 = 0;
/// Invalid configuration, unreadable input, or another setup error.
pub const INVALID: i32 = 1;
/// The session ended on an environment or model failure.
pub const EARLY_EXIT: i32 = 2;
/// `coder replay` found a log that the transition function does not produce.
pub const REPLAY_MISMATCH: i32 = 3;
