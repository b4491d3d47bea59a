//! Process exit codes for one-shot commands.

/// Request finished (chat, show, done, analysis or a written file).
pub const OK: i32 = 0;
/// The request ended in an error, or the command itself failed.
pub const ERROR: i32 = 1;
/// The operator declined a confirmation or gave no input.
pub const DECLINED: i32 = 2;
/// The follow-up bound was reached without a final answer.
pub const LIMIT: i32 = 3;
