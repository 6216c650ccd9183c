//! ConfigLoader facade delegating to the merge service.

use super::merge::service::MergeService;
use super::BfscopeConfig;
use config::ConfigError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, the global config file if present, then the environment.
    pub fn load() -> Result<BfscopeConfig, ConfigError> {
        MergeService::load()
    }

    /// Defaults, `path` (which must exist), then the environment.
    pub fn load_from_file(path: &Path) -> Result<BfscopeConfig, ConfigError> {
        MergeService::load_from_file(path)
    }

    /// [`load_from_file`](Self::load_from_file) when a path is given, else [`load`](Self::load).
    pub fn load_with(path: Option<&Path>) -> Result<BfscopeConfig, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load(),
        }
    }
}
