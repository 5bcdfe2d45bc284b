//! Embedded Lua runner: host allocator, allow-listed standard libraries,
//! and a panic hook that escapes back to the host instead of aborting.

pub mod config;
pub mod error;
pub mod libs;
pub mod memory;
pub mod runner;
pub mod state;

pub use config::{default_config_path, Config, OutputMode};
pub use error::ScriptError;
pub use libs::allowed_libraries;
pub use memory::{AllocStats, BlockAllocator};
pub use runner::{execute, Report};
pub use state::{ExecutionContext, Interpreter};
