//! Operator-wide trust and connection settings

use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;

/// Default per-machine connection timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings shared by every machine an operator registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Known-hosts store consulted on every connection
    pub known_hosts_path: PathBuf,
    /// Record unknown hosts on first connection instead of rejecting them
    pub add_to_known_hosts: bool,
    /// Per-machine connection timeout
    pub timeout: Duration,
}

impl OperatorConfig {
    /// Create config with an explicit store path, auto-add off
    pub fn new(known_hosts_path: impl Into<PathBuf>) -> Self {
        Self {
            known_hosts_path: known_hosts_path.into(),
            add_to_known_hosts: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create config using `~/.ssh/known_hosts`
    ///
    /// # Errors
    /// Returns `CoreError::Config` if the home directory cannot be determined.
    pub fn with_default_known_hosts() -> Result<Self, CoreError> {
        let home = dirs::home_dir().ok_or_else(|| {
            CoreError::Config(
                "failed to determine user home directory for default known_hosts path"
                    .to_string(),
            )
        })?;
        Ok(Self::new(home.join(".ssh").join("known_hosts")))
    }

    #[must_use]
    pub fn with_add_to_known_hosts(mut self, enabled: bool) -> Self {
        self.add_to_known_hosts = enabled;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check settings that cannot be expressed in the types
    ///
    /// # Errors
    /// Returns `CoreError::Config` if the timeout is zero.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.timeout.is_zero() {
            return Err(CoreError::Config(
                "connection timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = path.into();
        self
    }
}
