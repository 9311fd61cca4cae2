//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use netsentry_config::ConfigError;
use netsentry_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const INPUT: i32 = 4;
    pub const ANOMALIES: i32 = 5;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Input ────────────────────────────────────────────────────────

    #[error("Could not read {source_name}: {reason}")]
    #[diagnostic(
        code(netsentry::invalid_input),
        help(
            "Expected a JSON array.\n\
             analyze: flow objects (sourceAddr, destPort, byteCount, ...) or\n\
             connection rows (src-address, dst-address, protocol, ...)"
        )
    )]
    InvalidInput { source_name: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(netsentry::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration at {path} is invalid: {source}")]
    #[diagnostic(
        code(netsentry::config),
        help(
            "Inspect the effective values with: netsentry config show\n\
             Environment overrides use NETSENTRY_<SECTION>__<KEY>."
        )
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(netsentry::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    // ── Detection ────────────────────────────────────────────────────

    #[error("{count} anomalies detected")]
    #[diagnostic(code(netsentry::anomalies_detected))]
    AnomaliesDetected { count: usize },

    // ── Engine ───────────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(code(netsentry::core))]
    Core(#[from] CoreError),

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(netsentry::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::Core(CoreError::Validation { .. }) => exit_code::USAGE,
            Self::Config { .. } | Self::ConfigExists { .. } => exit_code::CONFIG,
            Self::InvalidInput { .. } => exit_code::INPUT,
            Self::AnomaliesDetected { .. } => exit_code::ANOMALIES,
            Self::Core(_) | Self::Io(_) | Self::Render(_) => exit_code::GENERAL,
        }
    }

    pub fn config(path: &std::path::Path, source: ConfigError) -> Self {
        Self::Config {
            path: path.display().to_string(),
            source,
        }
    }
}
