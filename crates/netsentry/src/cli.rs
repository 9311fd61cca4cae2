//! Clap derive structures for the `netsentry` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use netsentry_core::Scenario;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// netsentry -- traffic anomaly analysis and fleet tooling
#[derive(Debug, Parser)]
#[command(
    name = "netsentry",
    version,
    about = "Analyze network traffic for port scans, DoS and brute-force attempts",
    long_about = "Operator tooling for the netsentry monitoring engine.\n\n\
        Runs flow analysis, synthetic attack scenarios, interface health\n\
        scoring and role classification locally, without a device connection.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "NETSENTRY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format [default: from config, else table]
    #[arg(long, short = 'o', global = true)]
    pub output: Option<OutputFormat>,

    /// Log line format on stderr
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Log Enums ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run flows or a raw connection table through the anomaly detectors
    #[command(alias = "a")]
    Analyze(AnalyzeArgs),

    /// Generate a synthetic attack and report detection results
    #[command(alias = "sim")]
    Simulate(SimulateArgs),

    /// Score interface health from counters or precomputed rates
    Health(HealthArgs),

    /// Assign device roles from capabilities and identification signals
    Classify(ClassifyArgs),

    /// Inspect and create the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Analyze ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// JSON file with an array of flows or connection-tracking rows ("-" for stdin)
    pub input: String,

    /// Device id to attribute connection-tracking rows to
    #[arg(long, default_value = "0")]
    pub device: u64,

    /// Exit with code 5 when any anomaly is detected
    #[arg(long)]
    pub fail_on_anomaly: bool,
}

// ── Simulate ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Scenarios to run (portScan, dosAttack, bruteForce); all when omitted
    #[arg(value_parser = parse_scenario)]
    pub scenarios: Vec<Scenario>,

    /// Anchor time for generated flows (RFC 3339); now when omitted
    #[arg(long)]
    pub start: Option<chrono::DateTime<chrono::Utc>>,

    /// Device id stamped on generated flows
    #[arg(long, default_value = "0")]
    pub device: u64,
}

fn parse_scenario(raw: &str) -> Result<Scenario, String> {
    raw.parse().map_err(|_| {
        format!("unknown scenario '{raw}' (expected portScan, dosAttack or bruteForce)")
    })
}

// ── Health ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct HealthArgs {
    /// JSON file with an array of interface readings ("-" for stdin)
    #[arg(conflicts_with_all = ["error_rate", "drop_rate", "utilization"])]
    pub input: Option<String>,

    /// Percentage of packets errored
    #[arg(long, default_value = "0")]
    pub error_rate: f64,

    /// Percentage of packets dropped
    #[arg(long, default_value = "0")]
    pub drop_rate: f64,

    /// Link utilization percentage
    #[arg(long, default_value = "0")]
    pub utilization: f64,
}

// ── Classify ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// JSON file with an array of device descriptions ("-" for stdin)
    pub input: String,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration (file + environment)
    Show,

    /// Print the config file path
    Path,

    /// Write a config file populated with the defaults
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
