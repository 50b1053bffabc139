//! SSH transport using russh crate

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, KeyboardInteractiveAuthResponse};
use russh::keys::{PrivateKeyWithHashAlg, ssh_key};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::credential::{AuthMethod, PasswordResponder, Prompt};
use crate::error::{ExecError, TrustError};
use crate::known_hosts::{HostKey, HostKeyChecker};
use crate::traits::{Connection, DialTarget, RemoteOutput, Session, Transport};

/// Upper bound on keyboard-interactive info request rounds
const MAX_INTERACTIVE_ROUNDS: usize = 8;

#[derive(Debug, thiserror::Error)]
enum HandlerError {
    #[error(transparent)]
    Ssh(#[from] russh::Error),
    #[error(transparent)]
    Trust(#[from] TrustError),
}

/// SSH client handler for russh
///
/// Host keys are checked against the known-hosts store before authentication.
#[derive(Debug)]
struct SshClientHandler {
    checker: HostKeyChecker,
}

impl client::Handler for SshClientHandler {
    type Error = HandlerError;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let key = HostKey::from_public_key(server_public_key)?;
        let decision = self.checker.check(&key).await?;
        debug!(host = %self.checker.identity(), decision = ?decision, "host key accepted");
        Ok(true)
    }
}

/// Transport that dials real SSH servers
#[derive(Debug, Clone, Default)]
pub struct RusshTransport {
    config: Arc<client::Config>,
}

impl RusshTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom russh client configuration
    #[must_use]
    pub fn with_config(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Transport for RusshTransport {
    #[instrument(skip(self, checker), fields(host = %target.host, port = target.port))]
    async fn dial(
        &self,
        target: &DialTarget,
        checker: HostKeyChecker,
    ) -> Result<Box<dyn Connection>, ExecError> {
        debug!(timeout = ?target.timeout, "connecting to SSH");

        let handler = SshClientHandler { checker };
        let connect = client::connect(
            self.config.clone(),
            (target.host.as_str(), target.port),
            handler,
        );

        let handle = match timeout(target.timeout, connect).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(HandlerError::Trust(e))) => return Err(ExecError::Trust(e)),
            Ok(Err(HandlerError::Ssh(e))) => {
                return Err(ExecError::ConnectionFailed(format!(
                    "failed to connect to {}: {e}",
                    target.address()
                )));
            }
            Err(_) => {
                return Err(ExecError::Timeout {
                    timeout: target.timeout,
                });
            }
        };

        info!(host = %target.host, "SSH transport established");

        Ok(Box::new(RusshConnection {
            handle: Some(handle),
            host: target.host.clone(),
        }))
    }

    fn transport_type(&self) -> &'static str {
        "russh"
    }
}

struct RusshConnection {
    handle: Option<client::Handle<SshClientHandler>>,
    host: String,
}

impl RusshConnection {
    fn handle(&mut self) -> Result<&mut client::Handle<SshClientHandler>, ExecError> {
        self.handle
            .as_mut()
            .ok_or_else(|| ExecError::SessionFailed("connection already closed".to_string()))
    }

    async fn try_password(&mut self, username: &str, password: &str) -> Result<bool, ExecError> {
        let result = self
            .handle()?
            .authenticate_password(username, password)
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;
        Ok(result.success())
    }

    async fn try_keyboard_interactive(
        &mut self,
        username: &str,
        responder: &PasswordResponder,
    ) -> Result<bool, ExecError> {
        let handle = self.handle()?;
        let mut response = handle
            .authenticate_keyboard_interactive_start(username, None::<String>)
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

        for _ in 0..MAX_INTERACTIVE_ROUNDS {
            match response {
                KeyboardInteractiveAuthResponse::Success => return Ok(true),
                KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
                KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                    let prompts: Vec<Prompt> = prompts
                        .into_iter()
                        .map(|p| Prompt::new(p.prompt, p.echo))
                        .collect();
                    let answers = responder.answer(&prompts)?;
                    response = handle
                        .authenticate_keyboard_interactive_respond(answers)
                        .await
                        .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;
                }
            }
        }

        warn!(host = %self.host, "too many keyboard-interactive rounds");
        Ok(false)
    }

    async fn try_public_key(
        &mut self,
        username: &str,
        key: &Arc<russh::keys::PrivateKey>,
    ) -> Result<bool, ExecError> {
        let handle = self.handle()?;
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let result = handle
            .authenticate_publickey(username, PrivateKeyWithHashAlg::new(key.clone(), hash_alg))
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;
        Ok(result.success())
    }
}

#[async_trait]
impl Connection for RusshConnection {
    #[instrument(skip(self, methods), fields(host = %self.host))]
    async fn authenticate(
        &mut self,
        username: &str,
        methods: &[AuthMethod],
    ) -> Result<(), ExecError> {
        for method in methods {
            debug!(method = method.name(), "trying authentication method");
            let accepted = match method {
                AuthMethod::Password(password) => {
                    self.try_password(username, password.expose()).await?
                }
                AuthMethod::KeyboardInteractive(responder) => {
                    self.try_keyboard_interactive(username, responder).await?
                }
                AuthMethod::PublicKey(key) => self.try_public_key(username, key).await?,
            };
            if accepted {
                info!(host = %self.host, method = method.name(), "SSH authenticated");
                return Ok(());
            }
        }

        let tried: Vec<_> = methods.iter().map(AuthMethod::name).collect();
        Err(ExecError::AuthenticationFailed(format!(
            "no method accepted (tried: {})",
            tried.join(", ")
        )))
    }

    async fn open_session(&mut self) -> Result<Box<dyn Session>, ExecError> {
        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| ExecError::SessionFailed(e.to_string()))?;
        Ok(Box::new(RusshSession { channel }))
    }

    async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
            {
                debug!(host = %self.host, error = %e, "error while disconnecting");
            }
            info!(host = %self.host, "SSH disconnected");
        }
    }
}

struct RusshSession {
    channel: Channel<client::Msg>,
}

#[async_trait]
impl Session for RusshSession {
    async fn run_combined(mut self: Box<Self>, command: &str) -> Result<RemoteOutput, ExecError> {
        self.channel
            .exec(true, command)
            .await
            .map_err(|e| ExecError::SessionFailed(e.to_string()))?;

        let mut output = Vec::new();
        let mut exit_status = None;

        // Exit status may arrive after EOF, so read until the channel closes
        while let Some(msg) = self.channel.wait().await {
            match msg {
                ChannelMsg::Data { data } | ChannelMsg::ExtendedData { data, .. } => {
                    output.extend_from_slice(&data);
                }
                ChannelMsg::ExitStatus { exit_status: status } => {
                    exit_status = Some(status);
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(RemoteOutput {
            output,
            exit_status,
        })
    }
}
