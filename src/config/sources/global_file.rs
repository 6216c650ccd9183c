//! Global config file source: `$XDG_CONFIG_HOME/bfscope/config.toml`

use crate::config::paths::xdg_root;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};

/// Add the global config file to the builder when one can be located.
/// A missing file is not an error.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    match xdg_root::global_config_file() {
        Some(path) => Ok(builder.add_source(File::from(path).required(false))),
        None => Ok(builder),
    }
}
