//! Tooling & Integration Layer
//!
//! The `bfscope` command line and the text rendering it prints.

pub mod cli;
pub mod format;

pub use cli::{Cli, CliContext, Commands};
