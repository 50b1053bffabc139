//! Configuration file loading and types
//!
//! ```toml
//! [operator]
//! known_hosts = "~/.ssh/known_hosts"
//! add_to_known_hosts = true
//! timeout_secs = 10
//! log_level = "info"
//!
//! [inventory]
//! url = "http://inventory.local/api/collections/machines/records"
//! username = "ops"
//! key_path = "~/.ssh/id_ed25519"
//!
//! [[machine]]
//! name = "web1"
//! user = "ops"
//! host = "10.0.0.5"
//! password_env = "WEB1_PASSWORD"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Result, WrapErr, bail};
use opsfleet_core::{Credential, MachineSpec, OperatorConfig};
use opsfleet_exec::{key_from_env, read_key_file};
use serde::Deserialize;

/// Top-level configuration for the opsfleet CLI
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Trust and connection settings
    #[serde(default)]
    pub operator: OperatorSection,
    /// Optional inventory endpoint
    pub inventory: Option<InventorySection>,
    /// Statically configured machines
    #[serde(default)]
    pub machine: Vec<MachineEntry>,
}

/// `[operator]` section
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorSection {
    /// Known-hosts file, defaults to `~/.ssh/known_hosts`
    pub known_hosts: Option<String>,
    #[serde(default)]
    pub add_to_known_hosts: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for OperatorSection {
    fn default() -> Self {
        Self {
            known_hosts: None,
            add_to_known_hosts: false,
            timeout_secs: default_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

/// `[inventory]` section
#[derive(Debug, Clone, Deserialize)]
pub struct InventorySection {
    pub url: String,
    /// SSH user for every inventory machine
    #[serde(default = "default_user")]
    pub username: String,
    #[serde(default = "default_port")]
    pub port: u32,
    #[serde(flatten)]
    pub auth: AuthSettings,
}

/// One `[[machine]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct MachineEntry {
    pub name: String,
    #[serde(default = "default_user")]
    pub user: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u32,
    #[serde(flatten)]
    pub auth: AuthSettings,
}

/// Where a machine's credential comes from; at most one may be set
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSettings {
    /// Inline password
    pub password: Option<String>,
    /// Environment variable holding the password
    pub password_env: Option<String>,
    /// Private key file
    pub key_path: Option<String>,
    /// Environment variable holding a base64 private key
    pub key_env: Option<String>,
}

impl AuthSettings {
    /// Resolve into a credential, `None` when nothing is configured
    ///
    /// # Errors
    /// Returns error if more than one source is set or the source cannot be read.
    pub fn resolve(&self) -> Result<Option<Credential>> {
        let configured = [
            self.password.is_some(),
            self.password_env.is_some(),
            self.key_path.is_some(),
            self.key_env.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if configured > 1 {
            bail!("only one of password, password_env, key_path or key_env may be set");
        }

        if let Some(password) = &self.password {
            return Ok(Some(Credential::password(password.as_str())));
        }
        if let Some(var) = &self.password_env {
            let password = std::env::var(var)
                .wrap_err_with(|| format!("password variable {var} is not set"))?;
            return Ok(Some(Credential::password(password)));
        }
        if let Some(path) = &self.key_path {
            let path = expand_home(path);
            let credential = read_key_file(path.to_string_lossy())
                .wrap_err_with(|| format!("failed to load key {}", path.display()))?;
            return Ok(Some(credential));
        }
        if let Some(var) = &self.key_env {
            let credential =
                key_from_env(var).wrap_err_with(|| format!("failed to load key from {var}"))?;
            return Ok(Some(credential));
        }
        Ok(None)
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u32 {
    22
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).wrap_err_with(|| format!("failed to parse {}", path.display()))
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns error if the text is not a valid configuration
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `OPSFLEET_CONFIG`, `./opsfleet.toml` or the user config dir
    ///
    /// Returns `None` when no config file exists.
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be loaded
    pub fn load_default() -> Result<Option<Self>> {
        if let Ok(path) = std::env::var("OPSFLEET_CONFIG") {
            return Self::load(Path::new(&path)).map(Some);
        }

        let mut paths = vec![PathBuf::from("opsfleet.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("opsfleet").join("opsfleet.toml"));
        }
        Self::load_first(&paths)
    }

    /// Load the first of `paths` that exists
    fn load_first(paths: &[PathBuf]) -> Result<Option<Self>> {
        match paths.iter().find(|path| path.exists()) {
            Some(path) => Self::load(path).map(Some),
            None => Ok(None),
        }
    }

    /// Operator settings, resolving the default known-hosts path if unset
    ///
    /// # Errors
    /// Returns error if no known-hosts path is configured and there is no home
    /// directory to default to, or if `timeout_secs` is zero
    pub fn operator_config(&self) -> Result<OperatorConfig> {
        let config = match &self.operator.known_hosts {
            Some(path) => OperatorConfig::new(expand_home(path)),
            None => OperatorConfig::with_default_known_hosts()?,
        };
        let config = config
            .with_add_to_known_hosts(self.operator.add_to_known_hosts)
            .with_timeout(Duration::from_secs(self.operator.timeout_secs));
        config.validate()?;
        Ok(config)
    }

    /// Registration specs for the `[[machine]]` entries, in file order
    ///
    /// # Errors
    /// Returns error if any entry's credential cannot be resolved
    pub fn machine_specs(&self) -> Result<Vec<MachineSpec>> {
        self.machine
            .iter()
            .map(|entry| {
                let spec = MachineSpec::new(&entry.name, &entry.user, &entry.host, entry.port);
                let credential = entry
                    .auth
                    .resolve()
                    .wrap_err_with(|| format!("machine {}", entry.name))?;
                Ok(match credential {
                    Some(credential) => spec.with_credential(credential),
                    None => spec,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert!(config.machine.is_empty());
        assert!(config.inventory.is_none());
        assert!(!config.operator.add_to_known_hosts);
        assert_eq!(config.operator.timeout_secs, 10);
        assert_eq!(config.operator.log_level, "info");
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
            [operator]
            known_hosts = "/tmp/opsfleet_known_hosts"
            add_to_known_hosts = true
            timeout_secs = 3
            log_level = "debug"

            [inventory]
            url = "http://localhost:8090/api/collections/machines/records"
            username = "ops"
            port = 2222

            [[machine]]
            name = "web1"
            user = "ops"
            host = "10.0.0.5"
            password = "secret"

            [[machine]]
            name = "db1"
            host = "10.0.0.6"
            port = 2200
            "#,
        )
        .unwrap();

        let operator = config.operator_config().unwrap();
        assert_eq!(
            operator.known_hosts_path,
            PathBuf::from("/tmp/opsfleet_known_hosts")
        );
        assert!(operator.add_to_known_hosts);
        assert_eq!(operator.timeout, Duration::from_secs(3));

        let inventory = config.inventory.as_ref().unwrap();
        assert_eq!(inventory.username, "ops");
        assert_eq!(inventory.port, 2222);

        let specs = config.machine_specs().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "web1");
        assert!(matches!(specs[0].credential, Some(Credential::Password(_))));
        assert_eq!(specs[1].username, "root");
        assert_eq!(specs[1].port, 2200);
        assert!(specs[1].credential.is_none());
    }

    #[test]
    fn test_conflicting_credentials_rejected() {
        let auth = AuthSettings {
            password: Some("pw".into()),
            key_path: Some("/tmp/key".into()),
            ..AuthSettings::default()
        };
        assert!(auth.resolve().is_err());
    }

    #[test]
    fn test_key_path_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_test");
        std::fs::write(&path, "not checked until connect").unwrap();

        let auth = AuthSettings {
            key_path: Some(path.display().to_string()),
            ..AuthSettings::default()
        };
        assert!(matches!(
            auth.resolve().unwrap(),
            Some(Credential::PrivateKey(_))
        ));
    }

    #[test]
    fn test_missing_key_file() {
        let auth = AuthSettings {
            key_path: Some("/nonexistent/opsfleet/id_test".into()),
            ..AuthSettings::default()
        };
        assert!(auth.resolve().is_err());
    }

    #[test]
    fn test_missing_password_env() {
        let auth = AuthSettings {
            password_env: Some("OPSFLEET_TEST_UNSET_PASSWORD_VARIABLE".into()),
            ..AuthSettings::default()
        };
        assert!(auth.resolve().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opsfleet.toml");
        std::fs::write(&path, "[[machine]]\nname = \"a\"\nhost = \"h\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.machine[0].name, "a");
        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = Config::parse(
            "[operator]\nknown_hosts = \"/tmp/kh\"\ntimeout_secs = 0\n",
        )
        .unwrap();
        let err = config.operator_config().unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_load_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("opsfleet.toml");

        assert!(Config::load_first(&[missing.clone()]).unwrap().is_none());

        std::fs::write(&present, "[operator]\nlog_level = \"debug\"\n").unwrap();
        let config = Config::load_first(&[missing, present]).unwrap().unwrap();
        assert_eq!(config.operator.log_level, "debug");
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/key"), PathBuf::from("/etc/key"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.ssh/id"), home.join(".ssh/id"));
        }
    }
}
