//! MergeService: orchestrates sources, applies merge policy, deserializes to BfscopeConfig.

use crate::config::sources::{environment, global_file};
use crate::config::BfscopeConfig;
use config::{ConfigError, File};
use std::path::Path;

use super::merge_policy;

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Precedence: defaults (lowest) -> global file -> environment (highest).
    pub fn load() -> Result<BfscopeConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = environment::add_to_builder(builder)?;

        builder.build()?.try_deserialize()
    }

    /// Precedence: defaults (lowest) -> `path` -> environment (highest).
    pub fn load_from_file(path: &Path) -> Result<BfscopeConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = builder.add_source(File::from(path).required(true));
        let builder = environment::add_to_builder(builder)?;

        builder.build()?.try_deserialize()
    }
}
