//! Stable exit codes for conductor CLI commands.

/// Command succeeded, the task completed, or the checked action is allowed.
pub const OK: i32 = 0;
/// Invalid input or configuration, or any other error before a run started.
pub const INVALID: i32 = 1;
/// The task ended in failure, or the checked action was denied.
pub const FAILED: i32 = 2;
/// The run was cancelled or hit its wall-clock timeout.
pub const INTERRUPTED: i32 = 3;
