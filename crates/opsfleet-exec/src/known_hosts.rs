//! Trust-on-first-use host key store
//!
//! The store is a line-oriented file, one `<hostname> <key-algorithm> <base64-key>`
//! entry per line. Entries are only ever appended: a key that differs from the
//! one on record is always rejected, whatever the auto-add setting.
//!
//! Hashed host names written by `HashKnownHosts yes` are matched, and keys
//! listed under `@revoked` are refused even when a plain entry trusts them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use russh::keys::PublicKey;
use sha1::Sha1;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::TrustError;

/// Identity string used for store lookups
///
/// Port 22 uses the bare host, any other port the OpenSSH `[host]:port` form.
#[must_use]
pub fn host_identity(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{host}]:{port}")
    }
}

/// Public host key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    algorithm: String,
    key: Vec<u8>,
}

impl HostKey {
    pub fn new(algorithm: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm: algorithm.into(),
            key: key.into(),
        }
    }

    /// Parse the `<algorithm> <base64>` pair of a store line
    ///
    /// # Errors
    /// Returns `TrustError::Store` if the key is not valid base64.
    pub fn parse(algorithm: &str, encoded: &str) -> Result<Self, TrustError> {
        let key = STANDARD
            .decode(encoded)
            .map_err(|e| TrustError::Store(format!("invalid base64 key: {e}")))?;
        Ok(Self::new(algorithm, key))
    }

    /// Convert a key presented by a russh handshake
    ///
    /// # Errors
    /// Returns `TrustError::Store` if the key cannot be encoded.
    pub fn from_public_key(key: &PublicKey) -> Result<Self, TrustError> {
        let openssh = key
            .to_openssh()
            .map_err(|e| TrustError::Store(format!("failed to encode host key: {e}")))?;
        let mut fields = openssh.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(algorithm), Some(encoded)) => Self::parse(algorithm, encoded),
            _ => Err(TrustError::Store(format!(
                "unexpected host key encoding: {openssh}"
            ))),
        }
    }

    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    #[must_use]
    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Base64 form as written to the store
    #[must_use]
    pub fn encoded(&self) -> String {
        STANDARD.encode(&self.key)
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, self.encoded())
    }
}

/// One parsed line of the store
///
/// Host patterns are plain identities, OpenSSH hashed names
/// (`|1|<salt>|<hmac-sha1>`) or `*` for every host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownHostEntry {
    /// Host patterns the key applies to (comma-separated on disk)
    pub hosts: Vec<String>,
    pub key: HostKey,
    /// Line carried the `@revoked` marker
    pub revoked: bool,
}

impl KnownHostEntry {
    #[must_use]
    pub fn matches_host(&self, identity: &str) -> bool {
        self.hosts
            .iter()
            .any(|pattern| pattern_matches(pattern, identity))
    }
}

fn pattern_matches(pattern: &str, identity: &str) -> bool {
    match pattern.strip_prefix("|1|") {
        Some(hashed) => hashed_matches(hashed, identity),
        None => pattern == "*" || pattern == identity,
    }
}

/// Check `<salt>|<hash>` against HMAC-SHA1(salt, identity)
fn hashed_matches(hashed: &str, identity: &str) -> bool {
    let Some((salt, hash)) = hashed.split_once('|') else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (STANDARD.decode(salt), STANDARD.decode(hash)) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(&salt) else {
        return false;
    };
    mac.update(identity.as_bytes());
    mac.verify_slice(&hash).is_ok()
}

/// Parse a single store line, skipping anything that is not a host key entry
fn parse_line(line: &str) -> Option<KnownHostEntry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut fields = line.split_whitespace();
    let mut revoked = false;
    if line.starts_with('@') {
        // @cert-authority keys sign host certificates, they are not host keys
        if fields.next()? != "@revoked" {
            return None;
        }
        revoked = true;
    }
    let (hosts, algorithm, encoded) = (fields.next()?, fields.next()?, fields.next()?);

    match HostKey::parse(algorithm, encoded) {
        Ok(key) => Some(KnownHostEntry {
            hosts: hosts.split(',').map(str::to_string).collect(),
            key,
            revoked,
        }),
        Err(e) => {
            warn!(line = %line, error = %e, "skipping malformed known_hosts line");
            None
        }
    }
}

/// Outcome of an accepted host key check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// Key matched an existing entry
    Known,
    /// Host was unknown and has been appended
    Added,
}

/// Persisted host key store shared by every machine of an operator
///
/// The file is re-read on every check so out-of-band edits are honoured.
/// Check-and-append runs under a lock so concurrent first connections to the
/// same host record it once.
#[derive(Debug)]
pub struct KnownHosts {
    path: PathBuf,
    lock: Mutex<()>,
}

impl KnownHosts {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<Vec<KnownHostEntry>, TrustError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content.lines().filter_map(parse_line).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(TrustError::Store(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// List all parsed entries
    ///
    /// # Errors
    /// Returns `TrustError::Store` if the file exists but cannot be read.
    pub async fn entries(&self) -> Result<Vec<KnownHostEntry>, TrustError> {
        let _guard = self.lock.lock().await;
        self.read_entries().await
    }

    /// Trusted (non-revoked) keys on record for a host identity
    ///
    /// # Errors
    /// Returns `TrustError::Store` if the file exists but cannot be read.
    pub async fn lookup(&self, identity: &str) -> Result<Vec<HostKey>, TrustError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|e| !e.revoked && e.matches_host(identity))
            .map(|e| e.key)
            .collect())
    }

    /// Decide whether `presented` may be trusted for `identity`
    ///
    /// # Errors
    /// - `TrustError::HostKeyRevoked` if the key is listed under `@revoked`
    /// - `TrustError::HostKeyChanged` if keys are on record and none match
    /// - `TrustError::HostNotTrusted` if nothing is on record and `auto_add` is off
    /// - `TrustError::Store` on I/O failure
    #[instrument(skip(self, presented), fields(path = %self.path.display()))]
    pub async fn verify(
        &self,
        identity: &str,
        presented: &HostKey,
        auto_add: bool,
    ) -> Result<TrustDecision, TrustError> {
        let _guard = self.lock.lock().await;

        let (revoked, known): (Vec<_>, Vec<_>) = self
            .read_entries()
            .await?
            .into_iter()
            .filter(|e| e.matches_host(identity))
            .partition(|e| e.revoked);

        if revoked.iter().any(|e| e.key == *presented) {
            warn!(host = %identity, presented = %presented, "host key is revoked");
            return Err(TrustError::HostKeyRevoked {
                host: identity.to_string(),
                presented: presented.to_string(),
            });
        }
        let known: Vec<HostKey> = known.into_iter().map(|e| e.key).collect();

        if known.iter().any(|k| k == presented) {
            debug!(host = %identity, "host key matches known_hosts entry");
            return Ok(TrustDecision::Known);
        }

        if !known.is_empty() {
            let expected = known
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            warn!(
                host = %identity,
                presented = %presented,
                "host key does not match known_hosts entry, possible interception"
            );
            return Err(TrustError::HostKeyChanged {
                host: identity.to_string(),
                expected,
                presented: presented.to_string(),
            });
        }

        if !auto_add {
            return Err(TrustError::HostNotTrusted {
                host: identity.to_string(),
                path: self.path.display().to_string(),
            });
        }

        self.append(identity, presented).await?;
        info!(host = %identity, key = %presented, "added new host to known_hosts");
        Ok(TrustDecision::Added)
    }

    async fn append(&self, identity: &str, key: &HostKey) -> Result<(), TrustError> {
        let store_err =
            |e: std::io::Error| TrustError::Store(format!("failed to write {}: {e}", self.path.display()));

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(store_err)?;
        }

        // Previous content may lack a trailing newline after a manual edit
        let needs_newline = match tokio::fs::read(&self.path).await {
            Ok(content) => content.last().is_some_and(|b| *b != b'\n'),
            Err(_) => false,
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(store_err)?;

        let mut line = String::new();
        if needs_newline {
            line.push('\n');
        }
        line.push_str(&format!("{identity} {key}\n"));

        file.write_all(line.as_bytes()).await.map_err(store_err)?;
        file.flush().await.map_err(store_err)?;
        Ok(())
    }
}

/// Per-connection host key check
///
/// Built fresh for every connection attempt and handed to the transport, which
/// must call [`HostKeyChecker::check`] during the handshake.
#[derive(Debug, Clone)]
pub struct HostKeyChecker {
    store: Arc<KnownHosts>,
    identity: String,
    auto_add: bool,
}

impl HostKeyChecker {
    pub fn new(store: Arc<KnownHosts>, host: &str, port: u16, auto_add: bool) -> Self {
        Self {
            store,
            identity: host_identity(host, port),
            auto_add,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Check the key presented by the server
    ///
    /// # Errors
    /// Returns a `TrustError` when the connection must not proceed.
    pub async fn check(&self, presented: &HostKey) -> Result<TrustDecision, TrustError> {
        self.store
            .verify(&self.identity, presented, self.auto_add)
            .await
    }
}
