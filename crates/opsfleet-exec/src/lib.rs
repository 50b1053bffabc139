//! opsfleet-exec: Per-machine remote execution
//!
//! Provides the credential model, the trust-on-first-use known-hosts store, the
//! SSH transport seam (with a russh implementation) and the `Machine` type that
//! runs exactly one command per connection.

pub mod credential;
pub mod error;
pub mod keys;
pub mod known_hosts;
pub mod machine;
pub mod result;
pub mod ssh;
pub mod traits;

pub use credential::{AuthMethod, Credential, PasswordResponder, Secret};
pub use error::{ErrorKind, ExecError, TrustError};
pub use keys::{KeyError, key_from_env, read_key_file};
pub use known_hosts::{HostKey, HostKeyChecker, KnownHostEntry, KnownHosts, host_identity};
pub use machine::{Machine, RunPhase, TrustPolicy};
pub use result::Output;
pub use ssh::RusshTransport;
pub use traits::{Connection, DialTarget, RemoteOutput, Session, Transport};
