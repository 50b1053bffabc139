//! SSH client capability consumed by `Machine`
//!
//! The wire protocol lives behind these traits. `RusshTransport` is the real
//! implementation; tests plug in scripted ones.

use std::time::Duration;

use async_trait::async_trait;

use crate::credential::AuthMethod;
use crate::error::ExecError;
use crate::known_hosts::HostKeyChecker;

/// Where and how long to dial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialTarget {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl DialTarget {
    /// `host:port` address, bracketing IPv6 literals
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Raw result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    /// stdout and stderr in arrival order
    pub output: Vec<u8>,
    /// `None` when the channel closed without reporting a status
    pub exit_status: Option<u32>,
}

impl RemoteOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Dials remote hosts
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and complete the transport handshake
    ///
    /// The implementation must run `checker` against the server's host key and
    /// abort with `ExecError::Trust` before any authentication when it fails.
    async fn dial(
        &self,
        target: &DialTarget,
        checker: HostKeyChecker,
    ) -> Result<Box<dyn Connection>, ExecError>;

    fn transport_type(&self) -> &'static str;
}

/// An established, not yet authenticated, connection
#[async_trait]
pub trait Connection: Send {
    /// Offer `methods` in order until one is accepted
    async fn authenticate(&mut self, username: &str, methods: &[AuthMethod])
    -> Result<(), ExecError>;

    /// Open a fresh channel for a single command
    async fn open_session(&mut self) -> Result<Box<dyn Session>, ExecError>;

    /// Release the connection; never fails
    async fn close(&mut self);
}

/// A channel that runs exactly one command
#[async_trait]
pub trait Session: Send {
    async fn run_combined(self: Box<Self>, command: &str) -> Result<RemoteOutput, ExecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_formatting() {
        let mut target = DialTarget {
            host: "10.0.0.5".to_string(),
            port: 22,
            timeout: Duration::from_secs(10),
        };
        assert_eq!(target.address(), "10.0.0.5:22");

        target.host = "fe80::1".to_string();
        target.port = 2222;
        assert_eq!(target.address(), "[fe80::1]:2222");
    }
}
