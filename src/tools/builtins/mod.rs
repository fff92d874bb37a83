//! Built-in tools compiled into the daemon.
//!
//! These are registered once at startup and are immutable: the
//! self-extension tools refuse to update or delete them.

pub mod author;
pub mod memory;
pub mod run_script;
pub mod tasks;

use crate::tools::ToolRegistry;

/// Register every built-in tool on `registry`.
pub fn register_all(registry: &ToolRegistry) {
    author::register(registry);
    memory::register(registry);
    tasks::register(registry);
    run_script::register(registry);
}
