//! moltbot — chat-driven agent daemon that writes and schedules its own tools.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod chat;
pub mod config;
pub mod memory;
pub mod models;
pub mod scheduler;
pub mod store;
pub mod tools;
pub mod utils;

/// Return the moltbot home directory.
///
/// Resolution order:
/// 1. `MOLTBOT_HOME` environment variable
/// 2. `$HOME/.moltbot`
pub fn moltbot_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("MOLTBOT_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".moltbot")
    }
}
