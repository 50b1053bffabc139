//! Error types for opsfleet-exec

use std::time::Duration;

use thiserror::Error;

/// Host trust decision failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrustError {
    /// Stored key differs from the key presented by the server
    #[error("host identity changed for {host}: expected {expected}, got {presented}")]
    HostKeyChanged {
        /// Host identity as written in the store
        host: String,
        /// Key(s) on record, `<algorithm> <base64>`
        expected: String,
        /// Key presented during the handshake
        presented: String,
    },

    /// No key on record and auto-add is disabled
    #[error("host not trusted: {host} has no entry in {path}")]
    HostNotTrusted {
        /// Host identity as written in the store
        host: String,
        /// Store file that was consulted
        path: String,
    },

    /// Presented key is listed under `@revoked`
    #[error("host key revoked for {host}: {presented}")]
    HostKeyRevoked {
        /// Host identity as written in the store
        host: String,
        /// Key presented during the handshake
        presented: String,
    },

    /// Reading or appending the store file failed
    #[error("known hosts store error: {0}")]
    Store(String),
}

/// Coarse classification of [`ExecError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Connection,
    Trust,
    Authentication,
    Session,
    Command,
    NotFound,
    Internal,
}

/// Errors that can occur while running a command on one machine
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Invalid or incomplete machine configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failed to connect to remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection attempt timed out
    #[error("connection timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Host key was rejected by the trust store
    #[error("host key rejected: {0}")]
    Trust(#[from] TrustError),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Keyboard-interactive prompt that is not a password request
    #[error("authentication failed: unsupported keyboard-interactive prompt: {0:?}")]
    UnsupportedPrompt(String),

    /// SSH key error
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// Session channel could not be opened
    #[error("session failed: {0}")]
    SessionFailed(String),

    /// Command exited non-zero; captured output is kept
    #[error("command failed with status {}: {output}", display_status(.status))]
    CommandFailed {
        /// Remote exit status, `None` when the channel closed without one
        status: Option<u32>,
        /// Combined stdout and stderr
        output: String,
    },

    /// Target name is not registered
    #[error("machine not found: {0}")]
    MachineNotFound(String),

    /// The task running the command died before reporting
    #[error("task failed: {0}")]
    TaskFailed(String),
}

fn display_status(status: &Option<u32>) -> String {
    status.map_or_else(|| "unknown".to_string(), |s| s.to_string())
}

impl ExecError {
    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Config(_) => ErrorKind::Configuration,
            ExecError::ConnectionFailed(_) | ExecError::Timeout { .. } => ErrorKind::Connection,
            ExecError::Trust(_) => ErrorKind::Trust,
            ExecError::AuthenticationFailed(_)
            | ExecError::UnsupportedPrompt(_)
            | ExecError::SshKeyError(_) => ErrorKind::Authentication,
            ExecError::SessionFailed(_) => ErrorKind::Session,
            ExecError::CommandFailed { .. } => ErrorKind::Command,
            ExecError::MachineNotFound(_) => ErrorKind::NotFound,
            ExecError::TaskFailed(_) => ErrorKind::Internal,
        }
    }
}
