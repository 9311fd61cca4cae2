//! CLI-side configuration: resolves the file from `--config` and merges
//! `GlobalOpts` overrides on top of the shared config crate.

use std::path::PathBuf;

pub use netsentry_config::{Config, config_path, load_config_from, save_config_to};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;

/// `--config` if given, otherwise the platform config path.
pub fn resolve_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

/// Load file + environment without validating.
pub fn load(global: &GlobalOpts) -> Result<(Config, PathBuf), CliError> {
    let path = resolve_path(global);
    let cfg = load_config_from(&path).map_err(|e| CliError::config(&path, e))?;
    Ok((cfg, path))
}

/// Load and validate; commands that build an engine go through here.
pub fn load_validated(global: &GlobalOpts) -> Result<(Config, PathBuf), CliError> {
    let (cfg, path) = load(global)?;
    cfg.validate().map_err(|e| CliError::config(&path, e))?;
    Ok((cfg, path))
}

/// `--output` wins over `defaults.output`; an unknown configured format
/// falls back to table.
pub fn output_format(global: &GlobalOpts, cfg: &Config) -> OutputFormat {
    global.output.unwrap_or(match cfg.defaults.output.as_str() {
        "json" => OutputFormat::Json,
        "json-compact" => OutputFormat::JsonCompact,
        "yaml" => OutputFormat::Yaml,
        "plain" => OutputFormat::Plain,
        _ => OutputFormat::Table,
    })
}
