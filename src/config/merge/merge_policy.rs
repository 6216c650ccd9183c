//! Base layer of every configuration build: the built-in defaults.

use crate::config::BfscopeConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Builder seeded with [`BfscopeConfig::default`], so later sources only
/// need to name the keys they override.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = Config::try_from(&BfscopeConfig::default())?;
    Ok(Config::builder().add_source(defaults))
}
