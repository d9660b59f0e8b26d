//! Stable exit codes for the evolver CLI.

/// Run completed with the target reached or the supervisor declaring done.
pub const OK: i32 = 0;
/// Invalid input/config, or an infrastructure failure ended the run.
pub const INVALID: i32 = 1;
/// Run exhausted its iteration budget without reaching the target.
pub const BUDGET_EXHAUSTED: i32 = 2;
