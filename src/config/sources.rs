//! Config-file source discovery.
//!
//! Source order implements the precedence contract:
//! explicit path > local file > global file > built-in defaults.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Config loaded from explicit `--config` path.
    Explicit(PathBuf),
    /// Config loaded from local `./duet.toml`.
    Local,
    /// Config loaded from `<config root>/duet/duet.toml`.
    Global(PathBuf),
    /// No file found; runtime defaults were used.
    BuiltInDefaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit(path) | Self::Global(path) => write!(f, "{}", path.display()),
            Self::Local => write!(f, "./duet.toml"),
            Self::BuiltInDefaults => write!(f, "built-in defaults"),
        }
    }
}

/// Read config text from the highest-precedence available source.
pub(super) fn read_config_text_with_sources<FRead, FRoot>(
    path_override: Option<&str>,
    read_file: &FRead,
    config_root: &FRoot,
) -> Result<(String, ConfigSource), ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FRoot: Fn() -> Option<PathBuf>,
{
    // 1) Explicit override path from CLI takes absolute precedence; a missing
    // file is an error rather than a silent fallback.
    if let Some(p) = path_override {
        let path = PathBuf::from(p);
        let text = read_file(&path)?;
        return Ok((text, ConfigSource::Explicit(path)));
    }

    // 2) Local config.
    if let Ok(text) = read_file(Path::new("duet.toml")) {
        return Ok((text, ConfigSource::Local));
    }
    // 3) Global config.
    if let Some(dir) = config_root() {
        let global = dir.join("duet").join("duet.toml");
        if let Ok(text) = read_file(&global) {
            return Ok((text, ConfigSource::Global(global)));
        }
    }

    // 4) Nothing found; caller will parse empty config into defaults.
    Ok((String::new(), ConfigSource::BuiltInDefaults))
}
