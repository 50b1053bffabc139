//! Core error types for opsfleet-core

use opsfleet_exec::ErrorKind;
use thiserror::Error;

/// Errors raised by registry operations
///
/// These are the only errors that reject a mutation; per-machine run failures
/// are reported inside each `Output`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Machine name already registered
    #[error("machine already exists: {0}")]
    MachineAlreadyExists(String),

    /// A required string field is empty
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    /// Port outside 1-65535
    #[error("port must be between 1 and 65535, got {0}")]
    InvalidPort(u32),

    /// Machine not found in registry
    #[error("machine not found: {0}")]
    MachineNotFound(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Classify the error on the same scale as per-machine failures
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::MachineNotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Configuration,
        }
    }
}
