//! Result types for command execution

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::error::{ErrorKind, ExecError};

/// Outcome of running one command on one machine
#[derive(Debug, Clone, Serialize)]
pub struct Output {
    /// Machine the command targeted
    pub machine: String,
    /// Combined stdout and stderr, kept even when the command failed
    pub output: String,
    /// Whether the command ran and exited 0
    pub success: bool,
    /// Failure detail
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ExecError>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Time taken, connection included
    pub duration: Duration,
}

fn serialize_error<S: Serializer>(error: &Option<ExecError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

impl Output {
    /// Successful run
    pub fn succeeded(
        machine: impl Into<String>,
        output: impl Into<String>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            machine: machine.into(),
            output: output.into(),
            success: true,
            error: None,
            started_at,
            duration,
        }
    }

    /// Failed run; command failures carry their captured output along
    pub fn failed(
        machine: impl Into<String>,
        error: ExecError,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        let output = match &error {
            ExecError::CommandFailed { output, .. } => output.clone(),
            _ => String::new(),
        };
        Self {
            machine: machine.into(),
            output,
            success: false,
            error: Some(error),
            started_at,
            duration,
        }
    }

    /// Failure reported without a timed run behind it
    pub fn aborted(machine: impl Into<String>, error: ExecError) -> Self {
        Self::failed(machine, error, Utc::now(), Duration::ZERO)
    }

    /// Slot for a target that is not registered
    pub fn not_found(machine: impl Into<String>) -> Self {
        let machine = machine.into();
        let error = ExecError::MachineNotFound(machine.clone());
        Self::aborted(machine, error)
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(ExecError::kind)
    }
}
