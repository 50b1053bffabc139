//! Credentials and the authentication methods they offer

use std::fmt;
use std::sync::Arc;

use russh::keys::{PrivateKey, decode_secret_key};
use tracing::{debug, warn};

use crate::error::ExecError;

/// Password that never shows up in `Debug` output or logs
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the secret value
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// How a machine proves its identity to the remote side
#[derive(Clone)]
pub enum Credential {
    /// Password, also used to answer keyboard-interactive password prompts
    Password(Secret),
    /// Raw private key material (OpenSSH or PEM encoded)
    PrivateKey(Vec<u8>),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Credential::Password(***)"),
            Credential::PrivateKey(bytes) => {
                write!(f, "Credential::PrivateKey({} bytes)", bytes.len())
            }
        }
    }
}

impl Credential {
    pub fn password(password: impl Into<Secret>) -> Self {
        Credential::Password(password.into())
    }

    pub fn private_key(key: impl Into<Vec<u8>>) -> Self {
        Credential::PrivateKey(key.into())
    }

    /// Build the ordered list of authentication methods to offer
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if the private key cannot be parsed.
    /// A broken key never falls back to another method.
    pub fn auth_methods(&self, username: &str, host: &str) -> Result<Vec<AuthMethod>, ExecError> {
        match self {
            Credential::Password(password) => Ok(vec![
                AuthMethod::Password(password.clone()),
                AuthMethod::KeyboardInteractive(PasswordResponder::new(
                    password.clone(),
                    username,
                    host,
                )),
            ]),
            Credential::PrivateKey(raw) => {
                let pem = std::str::from_utf8(raw)
                    .map_err(|_| ExecError::SshKeyError("key is not valid UTF-8".to_string()))?;
                let key = decode_secret_key(pem, None).map_err(|e| {
                    warn!(error = %e, "failed to parse private key");
                    ExecError::SshKeyError(format!("failed to parse SSH key: {e}"))
                })?;
                Ok(vec![AuthMethod::PublicKey(Arc::new(key))])
            }
        }
    }
}

/// One authentication attempt offered to the server, in order
#[derive(Clone)]
pub enum AuthMethod {
    Password(Secret),
    KeyboardInteractive(PasswordResponder),
    PublicKey(Arc<PrivateKey>),
}

impl AuthMethod {
    /// SSH method name, for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::KeyboardInteractive(_) => "keyboard-interactive",
            AuthMethod::PublicKey(_) => "publickey",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthMethod({})", self.name())
    }
}

/// A keyboard-interactive prompt as sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub echo: bool,
}

impl Prompt {
    pub fn new(text: impl Into<String>, echo: bool) -> Self {
        Self {
            text: text.into(),
            echo,
        }
    }
}

/// Answers keyboard-interactive prompts that ask for the password
///
/// Anything that does not look like a password request fails the attempt
/// instead of guessing.
#[derive(Debug, Clone)]
pub struct PasswordResponder {
    password: Secret,
    user: String,
    host: String,
}

impl PasswordResponder {
    pub fn new(password: Secret, user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            password,
            user: user.into(),
            host: host.into(),
        }
    }

    fn is_password_prompt(&self, prompt: &Prompt) -> bool {
        if prompt.echo {
            return false;
        }
        let text = prompt.text.trim();
        text.eq_ignore_ascii_case("password:")
            || text == format!("{}@{}'s password:", self.user, self.host)
    }

    /// Produce one answer per prompt
    ///
    /// # Errors
    /// Returns `ExecError::UnsupportedPrompt` for the first prompt that is not a
    /// password request with echo disabled.
    pub fn answer(&self, prompts: &[Prompt]) -> Result<Vec<String>, ExecError> {
        prompts
            .iter()
            .map(|prompt| {
                if self.is_password_prompt(prompt) {
                    debug!(prompt = %prompt.text, "answering password prompt");
                    Ok(self.password.expose().to_string())
                } else {
                    Err(ExecError::UnsupportedPrompt(prompt.text.clone()))
                }
            })
            .collect()
    }
}
