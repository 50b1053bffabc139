//! Error types for the inventory client

use thiserror::Error;

/// Errors that can occur while fetching the machine inventory
#[derive(Error, Debug)]
pub enum InventoryError {
    /// HTTP request failed (connection, timeout, TLS)
    #[error("inventory request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Inventory returned a non-success status
    #[error("inventory returned status {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, if any
        message: String,
    },

    /// Response body did not match the expected shape
    #[error("failed to decode inventory response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Invalid inventory URL
    #[error("invalid inventory URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type for inventory operations
pub type Result<T> = std::result::Result<T, InventoryError>;
