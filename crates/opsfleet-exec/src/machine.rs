//! A single connection target that runs one command per connection

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::credential::{AuthMethod, Credential};
use crate::error::ExecError;
use crate::known_hosts::{HostKeyChecker, KnownHosts};
use crate::result::Output;
use crate::traits::{Connection, DialTarget, Transport};

/// Phases of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Dialing,
    Authenticating,
    SessionOpen,
    Executing,
    Succeeded,
    Failed,
    Closed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Dialing => "dialing",
            RunPhase::Authenticating => "authenticating",
            RunPhase::SessionOpen => "session-open",
            RunPhase::Executing => "executing",
            RunPhase::Succeeded => "succeeded",
            RunPhase::Failed => "failed",
            RunPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Host trust settings threaded into every machine
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    /// Shared known-hosts store
    pub known_hosts: Arc<KnownHosts>,
    /// Record unknown hosts on first connection
    pub auto_add: bool,
    /// Connection timeout
    pub timeout: Duration,
}

/// A remote machine
///
/// Identity fields are fixed at creation. Every run opens its own connection,
/// so concurrent runs of the same machine share nothing mutable.
#[derive(Clone)]
pub struct Machine {
    name: String,
    username: String,
    host: String,
    port: u16,
    credential: Option<Credential>,
    trust: TrustPolicy,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credential", &self.credential)
            .field("trust", &self.trust)
            .field("transport", &self.transport.transport_type())
            .finish()
    }
}

impl Machine {
    /// Create a machine; field validation is the registry's job
    pub fn new(
        name: impl Into<String>,
        username: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        credential: Option<Credential>,
        trust: TrustPolicy,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            username: username.into(),
            host: host.into(),
            port,
            credential,
            trust,
            transport,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    #[must_use]
    pub fn trust(&self) -> &TrustPolicy {
        &self.trust
    }

    /// Set or replace the credential used by the next run
    pub fn set_credential(&mut self, credential: Credential) {
        self.credential = Some(credential);
    }

    /// Use password authentication
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.credential = Some(Credential::password(password.into()));
        self
    }

    /// Use private key authentication
    #[must_use]
    pub fn with_private_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.credential = Some(Credential::private_key(key));
        self
    }

    fn phase(&self, phase: RunPhase) {
        debug!(machine = %self.name, phase = %phase, "run phase");
    }

    /// Run `command` and report the outcome as an [`Output`]
    #[instrument(skip(self), fields(machine = %self.name, host = %self.host))]
    pub async fn run(&self, command: &str) -> Output {
        let started_at = Utc::now();
        let start = Instant::now();

        match self.try_run(command).await {
            Ok(output) => Output::succeeded(&self.name, output, started_at, start.elapsed()),
            Err(e) => Output::failed(&self.name, e, started_at, start.elapsed()),
        }
    }

    /// Run `command` and return its combined output
    ///
    /// One call is one attempt: connect, check the host key, authenticate,
    /// open a channel, run, close.
    ///
    /// # Errors
    /// - `ExecError::Config` if no credential is set (nothing is dialed)
    /// - `ExecError::SshKeyError` if the private key cannot be parsed
    /// - `ExecError::ConnectionFailed` / `ExecError::Timeout` on dial failure
    /// - `ExecError::Trust` if the host key is rejected
    /// - `ExecError::AuthenticationFailed` / `ExecError::UnsupportedPrompt`
    /// - `ExecError::SessionFailed` if no channel can be opened
    /// - `ExecError::CommandFailed` on non-zero exit, carrying the output
    pub async fn try_run(&self, command: &str) -> Result<String, ExecError> {
        self.phase(RunPhase::Idle);

        let credential = self.credential.as_ref().ok_or_else(|| {
            ExecError::Config(format!(
                "machine '{}': credential not set",
                self.name
            ))
        })?;
        let methods = credential.auth_methods(&self.username, &self.host)?;

        let target = DialTarget {
            host: self.host.clone(),
            port: self.port,
            timeout: self.trust.timeout,
        };
        let checker = HostKeyChecker::new(
            self.trust.known_hosts.clone(),
            &self.host,
            self.port,
            self.trust.auto_add,
        );

        self.phase(RunPhase::Dialing);
        let mut connection = match self.transport.dial(&target, checker).await {
            Ok(connection) => connection,
            Err(e) => {
                self.phase(RunPhase::Failed);
                warn!(machine = %self.name, error = %e, "connection failed");
                return Err(e);
            }
        };

        let result = self
            .execute(connection.as_mut(), &methods, command)
            .await;
        if result.is_err() {
            self.phase(RunPhase::Failed);
        }

        connection.close().await;
        self.phase(RunPhase::Closed);

        result
    }

    async fn execute(
        &self,
        connection: &mut dyn Connection,
        methods: &[AuthMethod],
        command: &str,
    ) -> Result<String, ExecError> {
        self.phase(RunPhase::Authenticating);
        connection.authenticate(&self.username, methods).await?;

        self.phase(RunPhase::SessionOpen);
        let session = connection.open_session().await?;

        self.phase(RunPhase::Executing);
        debug!(machine = %self.name, command = %command, "executing remote command");
        let remote = session.run_combined(command).await?;
        let output = String::from_utf8_lossy(&remote.output).into_owned();

        if remote.success() {
            self.phase(RunPhase::Succeeded);
            info!(machine = %self.name, "command succeeded");
            Ok(output)
        } else {
            warn!(
                machine = %self.name,
                status = ?remote.exit_status,
                "command failed"
            );
            Err(ExecError::CommandFailed {
                status: remote.exit_status,
                output,
            })
        }
    }
}
