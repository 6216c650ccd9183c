//! XDG Base Directory lookup for the global config file.

use std::path::PathBuf;

/// `$XDG_CONFIG_HOME`, falling back to `$HOME/.config`.
pub fn config_home() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config"))
}

/// `<config home>/bfscope/config.toml`
pub fn global_config_file() -> Option<PathBuf> {
    config_home().map(|dir| dir.join("bfscope").join("config.toml"))
}
