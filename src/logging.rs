//! Logging System
//!
//! Structured logging through `tracing`. Level, format and destination come
//! from [`LoggingConfig`] and can be overridden per process with the
//! `BFSCOPE_LOG*` environment variables. Logs default to stderr so they never
//! interleave with command output on stdout.

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const ENV_FILTER: &str = "BFSCOPE_LOG";
const ENV_FORMAT: &str = "BFSCOPE_LOG_FORMAT";
const ENV_OUTPUT: &str = "BFSCOPE_LOG_OUTPUT";
const ENV_MODULES: &str = "BFSCOPE_LOG_MODULES";
const ENV_FILE: &str = "BFSCOPE_LOG_FILE";

/// Resolve the log file path with precedence: CLI, `BFSCOPE_LOG_FILE`, config file, default.
///
/// The default lives in the platform state directory from `ProjectDirs`.
pub fn resolve_log_file_path(
    cli_file: Option<PathBuf>,
    config_file: Option<PathBuf>,
) -> Result<PathBuf, ApiError> {
    let from_env = std::env::var_os(ENV_FILE).map(PathBuf::from);
    [cli_file, from_env, config_file]
        .into_iter()
        .flatten()
        .find(|p| !p.as_os_str().is_empty())
        .map_or_else(default_log_file_path, Ok)
}

fn default_log_file_path() -> Result<PathBuf, ApiError> {
    let project_dirs = directories::ProjectDirs::from("", "", "bfscope").ok_or_else(|| {
        ApiError::ConfigError("Could not determine platform directories for log file".to_string())
    })?;
    // Only Linux has a state dir; elsewhere fall back to local data.
    let dir = project_dirs
        .state_dir()
        .unwrap_or_else(|| project_dirs.data_local_dir());
    Ok(dir.join("bfscope.log"))
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,

    /// trace, debug, info, warn, error, off
    pub level: String,

    /// json or text
    pub format: String,

    /// stdout, stderr, file, file+stderr, both
    pub output: String,

    /// Log file when output includes file; `None` uses the platform default.
    pub file: Option<PathBuf>,

    /// ANSI colors for text written to a terminal stream.
    pub color: bool,

    /// Per-module levels, e.g. `bfscope::poller = "debug"`.
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "warn".to_string(),
            format: "text".to_string(),
            output: "stderr".to_string(),
            file: None,
            color: true,
            modules: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

/// Initialize the global subscriber.
///
/// Priority order (highest to lowest):
/// 1. Environment variables (`BFSCOPE_LOG`, `BFSCOPE_LOG_FORMAT`, ...)
/// 2. `config`
/// 3. Defaults
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), ApiError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);

    if !config.enabled {
        return Registry::default()
            .with(EnvFilter::new("off"))
            .try_init()
            .map_err(|e| ApiError::ConfigError(format!("Failed to install log subscriber: {}", e)));
    }

    let filter = build_env_filter(config)?;
    let format = determine_format(config)?;
    let output = determine_output(config)?;
    let writer = make_writer(&output, config.file.clone())?;
    let ansi = config.color && format == LogFormat::Text && !output.file;

    let registry = Registry::default().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .try_init(),
    };
    installed.map_err(|e| ApiError::ConfigError(format!("Failed to install log subscriber: {}", e)))
}

/// Build environment filter from config or environment variables
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ApiError> {
    if let Ok(filter) = EnvFilter::try_from_env(ENV_FILTER) {
        return Ok(filter);
    }
    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::new(&config.level);
    let from_env = std::env::var(ENV_MODULES).unwrap_or_default();
    let env_modules = from_env
        .split(',')
        .filter_map(|spec| spec.split_once('='))
        .map(|(module, level)| (module.trim(), level.trim()));
    let modules = config
        .modules
        .iter()
        .map(|(module, level)| (module.as_str(), level.as_str()))
        .chain(env_modules);

    for (module, level) in modules {
        let directive = format!("{}={}", module, level)
            .parse::<Directive>()
            .map_err(|e| {
                ApiError::ConfigError(format!("Invalid log directive {}={}: {}", module, level, e))
            })?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

fn determine_format(config: &LoggingConfig) -> Result<LogFormat, ApiError> {
    let format = std::env::var(ENV_FORMAT)
        .ok()
        .filter(|f| f == "json" || f == "text")
        .unwrap_or_else(|| config.format.clone());
    match format.as_str() {
        "json" => Ok(LogFormat::Json),
        "text" => Ok(LogFormat::Text),
        other => Err(ApiError::ConfigError(format!(
            "Invalid log format: {} (must be 'json' or 'text')",
            other
        ))),
    }
}

/// Output destinations
#[derive(Debug)]
struct OutputDestinations {
    stdout: bool,
    stderr: bool,
    file: bool,
}

fn determine_output(config: &LoggingConfig) -> Result<OutputDestinations, ApiError> {
    match std::env::var(ENV_OUTPUT) {
        Ok(output) => parse_output_destinations(&output),
        Err(_) => parse_output_destinations(&config.output),
    }
}

fn parse_output_destinations(output: &str) -> Result<OutputDestinations, ApiError> {
    let (stdout, stderr, file) = match output {
        "stdout" => (true, false, false),
        "stderr" => (false, true, false),
        "file" => (false, false, true),
        "file+stderr" => (false, true, true),
        "both" => (true, true, false),
        _ => {
            return Err(ApiError::ConfigError(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr', 'file', 'file+stderr', or 'both')",
                output
            )))
        }
    };
    Ok(OutputDestinations {
        stdout,
        stderr,
        file,
    })
}

fn open_log_file(path: &Path) -> Result<File, ApiError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ApiError::ConfigError(format!("Failed to create log directory: {}", e)))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ApiError::ConfigError(format!("Failed to open log file {:?}: {}", path, e)))
}

fn make_writer(
    output: &OutputDestinations,
    config_file: Option<PathBuf>,
) -> Result<BoxMakeWriter, ApiError> {
    if output.file {
        let path = resolve_log_file_path(None, config_file)?;
        let file = Arc::new(open_log_file(&path)?);
        return Ok(if output.stderr {
            BoxMakeWriter::new(file.and(std::io::stderr))
        } else {
            BoxMakeWriter::new(file)
        });
    }
    Ok(match (output.stdout, output.stderr) {
        (true, true) => BoxMakeWriter::new(std::io::stdout.and(std::io::stderr)),
        (true, false) => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    })
}
