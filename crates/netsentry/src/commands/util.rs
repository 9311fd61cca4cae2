//! Shared helpers for command handlers.

use std::io::Read;

use serde::de::DeserializeOwned;

use crate::error::CliError;

/// A document read from a file path or from stdin (`-`).
pub struct Input {
    pub name: String,
    pub contents: String,
}

pub fn read_input(source: &str) -> Result<Input, CliError> {
    if source == "-" {
        let mut contents = String::new();
        std::io::stdin().read_to_string(&mut contents)?;
        return Ok(Input {
            name: "stdin".into(),
            contents,
        });
    }
    let contents = std::fs::read_to_string(source).map_err(|e| CliError::InvalidInput {
        source_name: source.into(),
        reason: e.to_string(),
    })?;
    Ok(Input {
        name: source.into(),
        contents,
    })
}

impl Input {
    pub fn invalid(&self, reason: impl Into<String>) -> CliError {
        CliError::InvalidInput {
            source_name: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Parse the whole document as a JSON array of `T`.
    pub fn json_array<T: DeserializeOwned>(&self) -> Result<Vec<T>, CliError> {
        serde_json::from_str(&self.contents).map_err(|e| self.invalid(e.to_string()))
    }
}
