//! Loading private key material for `Credential::PrivateKey`

use std::env;
use std::path::Path;

use tracing::{debug, warn};

use crate::credential::Credential;

/// Key loading errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key path cannot be empty")]
    EmptyPath,

    #[error("key file is empty: {0}")]
    EmptyKey(String),

    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read a private key file into a credential
///
/// Surrounding whitespace in `path` is ignored. Group or world readable key
/// files are accepted with a warning.
///
/// # Errors
/// Returns `KeyError` if the path is blank, unreadable, or the file is empty.
pub fn read_key_file(path: impl AsRef<str>) -> Result<Credential, KeyError> {
    let path = path.as_ref().trim();
    if path.is_empty() {
        return Err(KeyError::EmptyPath);
    }

    let path = Path::new(path);
    warn_on_open_permissions(path);

    let key = std::fs::read(path)?;
    if key.is_empty() {
        return Err(KeyError::EmptyKey(path.display().to_string()));
    }

    debug!(path = %path.display(), "loaded private key");
    Ok(Credential::PrivateKey(key))
}

/// Read base64-encoded private key material from an environment variable
///
/// # Errors
/// Returns `KeyError` if the variable is unset, not base64, or decodes to nothing.
pub fn key_from_env(var_name: &str) -> Result<Credential, KeyError> {
    use base64::Engine;

    let encoded = env::var(var_name).map_err(|_| KeyError::EnvNotSet(var_name.to_string()))?;
    let key = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| KeyError::InvalidBase64)?;
    if key.is_empty() {
        return Err(KeyError::EmptyKey(var_name.to_string()));
    }
    Ok(Credential::PrivateKey(key))
}

#[cfg(unix)]
fn warn_on_open_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = std::fs::metadata(path)
        && metadata.permissions().mode() & 0o77 != 0
    {
        warn!(path = %path.display(), "key file permissions too open (should be 600)");
    }
}

#[cfg(not(unix))]
fn warn_on_open_permissions(_path: &Path) {}
