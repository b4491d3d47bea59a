//! Side-effecting adapters: filesystem, child processes, terminal and network.

pub mod completion;
pub mod config;
pub mod console;
pub mod history;
pub mod packages;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod system_info;
