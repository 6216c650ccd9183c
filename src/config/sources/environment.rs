//! Environment variable source: BFSCOPE__* prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Add environment variable overlay to builder.
///
/// `BFSCOPE__BACKPLANE__REDIS_HOST` sets `backplane.redis_host`. The double
/// underscore after the prefix keeps these apart from the `BFSCOPE_LOG*`
/// logging overrides.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(builder.add_source(
        Environment::with_prefix("BFSCOPE")
            .separator("__")
            .try_parsing(true),
    ))
}
