//! Configuration loading from TOML files and environment variables.
//!
//! Config is loaded in this order of precedence (highest wins):
//! 1. Environment variables (`DUET_CHAT_URL`, `DUET_STATS_URL`,
//!    `DUET_API_KEY`, `DUET_API_TIMEOUT_SECS`)
//! 2. TOML file specified via --config CLI flag
//! 3. ./duet.toml in the current directory
//! 4. $XDG_CONFIG_HOME/duet/duet.toml (or ~/.config/duet/duet.toml)
//! 5. Built-in defaults

use std::path::PathBuf;

mod defaults;
mod env;
mod loader;
mod sources;
mod types;

pub use loader::{load_config, load_config_with_source};
pub use sources::ConfigSource;
pub use types::{ApiConfig, Config, DisplayConfig, SessionConfig, StatsConfig};

/// Configuration payload plus the source it was read from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: ConfigSource,
}

/// Root directory holding per-application config folders.
pub fn config_root_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".config"))
        .or_else(dirs::config_dir)
}
