//! Configuration system for pollmux.
//!
//! A single YAML file with three sections:
//! 1. poll - cycle interval, cooldown, long-poll wait hint, backlog skip
//! 2. sessions - idle eviction and identifier extraction
//! 3. transport - remote API base URL and token

use std::path::PathBuf;

pub use self::global::{PollSection, PollmuxConfig, SessionsSection, TransportSection};

mod global;

/// Project-local config file name.
pub const PROJECT_CONFIG_FILE: &str = ".pollmux.yml";

/// Per-user config file (~/.config/pollmux/pollmux.yml).
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pollmux").join("pollmux.yml"))
}

/// Load configuration from the standard search paths.
pub fn load_config(explicit_path: Option<&PathBuf>) -> eyre::Result<PollmuxConfig> {
    PollmuxConfig::load(explicit_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_config_path_file_name() {
        if let Some(path) = user_config_path() {
            assert!(path.ends_with("pollmux/pollmux.yml"));
        }
    }
}
