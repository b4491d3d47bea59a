//! AI-driven script orchestration agent.
//!
//! An operator request goes to a completion model, which answers with a
//! structured action document. The agent validates the document and acts on
//! it: it replies, asks for input, writes a file, or confirms, runs and
//! analyzes a generated script.
//!
//! - **[`core`]**: Pure, deterministic logic (document model, validation, the
//!   wire codec, package extraction). No I/O.
//! - **[`io`]**: Side-effecting adapters (config, child processes, sandbox,
//!   console, history, completion client). Isolated behind traits where the
//!   engine needs fakes.
//!
//! Orchestration modules ([`engine`], [`session`], [`plan`]) coordinate the two
//! to implement CLI commands.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod plan;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
