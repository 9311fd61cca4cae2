// ── Core error types ──
//
// Every failure the engine reports funnels through `CoreError`. Device
// transport failures of any cause collapse into `Connectivity`; callers
// never see protocol-level detail beyond the message string.

use thiserror::Error;

use crate::model::DeviceId;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Input errors ─────────────────────────────────────────────────
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Device {device_id} unreachable: {reason}")]
    Connectivity { device_id: DeviceId, reason: String },

    #[error("All collection methods exhausted for device {device_id}: {reason}")]
    Collection { device_id: DeviceId, reason: String },

    #[error("Malformed {record} record: {reason}")]
    Parse { record: String, reason: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: DeviceId },

    // ── Collaborator errors ──────────────────────────────────────────
    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn parse(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            record: record.into(),
            reason: reason.into(),
        }
    }

    /// Whether the scheduler should retry the failed job with backoff.
    ///
    /// Validation and configuration problems never heal on their own.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation { .. } | Self::Config { .. })
    }

    /// Whether this failure came from talking to (or interpreting) a device.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            Self::Connectivity { .. } | Self::Collection { .. } | Self::Parse { .. } | Self::Timeout { .. }
        )
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
