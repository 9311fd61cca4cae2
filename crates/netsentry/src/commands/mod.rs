//! Command dispatch: bridges CLI args -> engine calls -> output formatting.

pub mod analyze;
pub mod classify;
pub mod config_cmd;
pub mod health;
pub mod simulate;
pub mod util;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch an engine-backed command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Analyze(args) => analyze::handle(args, global).await,
        Command::Simulate(args) => simulate::handle(args, global).await,
        Command::Health(args) => health::handle(args, global),
        Command::Classify(args) => classify::handle(&args, global),
        Command::Config(args) => config_cmd::handle(args, global),
        // Completions never reach dispatch.
        Command::Completions(_) => Err(CliError::Validation {
            field: "command".into(),
            reason: "completions are generated before dispatch".into(),
        }),
    }
}
