use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use opsfleet_core::*;
use opsfleet_exec::{
    AuthMethod, Connection, DialTarget, HostKey, HostKeyChecker, RemoteOutput, Session,
    Transport, TrustError,
};

/// Behaviour of one mock host
#[derive(Clone)]
struct MockHost {
    host_key: HostKey,
    password: String,
    output: String,
    exit_status: u32,
    delay: Duration,
}

impl MockHost {
    fn new(password: &str, output: &str) -> Self {
        Self {
            host_key: HostKey::new("ssh-ed25519", b"default-host-key".to_vec()),
            password: password.to_string(),
            output: output.to_string(),
            exit_status: 0,
            delay: Duration::ZERO,
        }
    }
}

/// Transport serving a fixed set of hosts keyed by address
#[derive(Default)]
struct MockTransport {
    hosts: HashMap<String, MockHost>,
    dials: AtomicUsize,
}

impl MockTransport {
    fn with_host(mut self, host: &str, mock: MockHost) -> Self {
        self.hosts.insert(host.to_string(), mock);
        self
    }
}

struct MockConnection {
    host: MockHost,
}

struct MockSession {
    host: MockHost,
}

#[async_trait]
impl Transport for MockTransport {
    async fn dial(
        &self,
        target: &DialTarget,
        checker: HostKeyChecker,
    ) -> Result<Box<dyn Connection>, ExecError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let host = self.hosts.get(&target.host).cloned().ok_or_else(|| {
            ExecError::ConnectionFailed(format!("no route to {}", target.address()))
        })?;
        tokio::time::sleep(host.delay).await;
        checker.check(&host.host_key).await?;
        Ok(Box::new(MockConnection { host }))
    }

    fn transport_type(&self) -> &'static str {
        "mock"
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn authenticate(
        &mut self,
        _username: &str,
        methods: &[AuthMethod],
    ) -> Result<(), ExecError> {
        for method in methods {
            if let AuthMethod::Password(p) = method
                && p.expose() == self.host.password
            {
                return Ok(());
            }
        }
        Err(ExecError::AuthenticationFailed(
            "no method accepted".to_string(),
        ))
    }

    async fn open_session(&mut self) -> Result<Box<dyn Session>, ExecError> {
        Ok(Box::new(MockSession {
            host: self.host.clone(),
        }))
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl Session for MockSession {
    async fn run_combined(self: Box<Self>, _command: &str) -> Result<RemoteOutput, ExecError> {
        Ok(RemoteOutput {
            output: self.host.output.clone().into_bytes(),
            exit_status: Some(self.host.exit_status),
        })
    }
}

fn config(dir: &TempDir, auto_add: bool) -> OperatorConfig {
    OperatorConfig::new(dir.path().join("known_hosts"))
        .with_add_to_known_hosts(auto_add)
        .with_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn test_single_machine_password_run() {
    let dir = TempDir::new().unwrap();
    let transport = MockTransport::default().with_host("10.0.0.5", MockHost::new("secret", "linux\n"));
    let mut op = Operator::with_transport(config(&dir, true), Arc::new(transport));

    op.register(
        "web1",
        "ops",
        "10.0.0.5",
        22,
        Some(Credential::password("secret")),
    )
    .unwrap();

    let results = op.run("id").await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].machine, "web1");
    assert_eq!(results[0].output, "linux\n");
    assert!(results[0].success);
    assert!(results[0].error.is_none());
}

#[tokio::test]
async fn test_duplicate_registration_keeps_registry() {
    let dir = TempDir::new().unwrap();
    let mut op = Operator::with_transport(config(&dir, true), Arc::new(MockTransport::default()));

    op.register("a", "ops", "10.0.0.1", 22, None).unwrap();
    let err = op.register("a", "ops", "10.0.0.1", 22, None).unwrap_err();

    assert!(matches!(err, CoreError::MachineAlreadyExists(_)));
    assert_eq!(op.len(), 1);
}

#[tokio::test]
async fn test_changed_host_key_rejected_for_any_auto_add() {
    for auto_add in [true, false] {
        let dir = TempDir::new().unwrap();
        let k1 = HostKey::new("ssh-ed25519", b"K1".to_vec());
        std::fs::write(dir.path().join("known_hosts"), format!("10.0.0.9 {k1}\n")).unwrap();

        let mut host = MockHost::new("secret", "ok\n");
        host.host_key = HostKey::new("ssh-ed25519", b"K2".to_vec());
        let transport = MockTransport::default().with_host("10.0.0.9", host);
        let mut op = Operator::with_transport(config(&dir, auto_add), Arc::new(transport));
        op.register("db", "ops", "10.0.0.9", 22, Some(Credential::password("secret")))
            .unwrap();

        let results = op.run("id").await;

        assert!(!results[0].success);
        assert!(matches!(
            results[0].error,
            Some(ExecError::Trust(TrustError::HostKeyChanged { .. }))
        ));
        let entries = op.known_hosts().entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, k1);
    }
}

#[tokio::test]
async fn test_first_use_appends_one_entry() {
    let dir = TempDir::new().unwrap();
    let k3 = HostKey::new("ssh-ed25519", b"K3".to_vec());
    let mut host = MockHost::new("secret", "ok\n");
    host.host_key = k3.clone();
    let transport = MockTransport::default().with_host("10.0.0.9", host);
    let mut op = Operator::with_transport(config(&dir, true), Arc::new(transport));
    op.register("db", "ops", "10.0.0.9", 22, Some(Credential::password("secret")))
        .unwrap();

    assert!(op.run("id").await[0].success);
    let path = dir.path().join("known_hosts");
    let after_first = std::fs::read_to_string(&path).unwrap();
    assert_eq!(after_first, format!("10.0.0.9 ssh-ed25519 {}\n", k3.encoded()));

    assert!(op.run("id").await[0].success);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), after_first);
}

#[tokio::test]
async fn test_unknown_host_rejected_without_auto_add() {
    let dir = TempDir::new().unwrap();
    let transport = MockTransport::default().with_host("10.0.0.9", MockHost::new("secret", "ok\n"));
    let mut op = Operator::with_transport(config(&dir, false), Arc::new(transport));
    op.register("db", "ops", "10.0.0.9", 22, Some(Credential::password("secret")))
        .unwrap();

    let results = op.run("id").await;

    assert_eq!(results[0].error_kind(), Some(ErrorKind::Trust));
    assert!(!dir.path().join("known_hosts").exists());
}

#[tokio::test]
async fn test_one_auth_failure_does_not_affect_others() {
    let dir = TempDir::new().unwrap();
    let transport = MockTransport::default()
        .with_host("10.0.0.1", MockHost::new("pw-a", "uid=a\n"))
        .with_host("10.0.0.2", MockHost::new("pw-b", "uid=b\n"))
        .with_host("10.0.0.3", MockHost::new("pw-c", "uid=c\n"));
    let mut op = Operator::with_transport(config(&dir, true), Arc::new(transport));
    op.register("a", "ops", "10.0.0.1", 22, Some(Credential::password("pw-a")))
        .unwrap();
    op.register("b", "ops", "10.0.0.2", 22, Some(Credential::password("wrong")))
        .unwrap();
    op.register("c", "ops", "10.0.0.3", 22, Some(Credential::password("pw-c")))
        .unwrap();

    let results = op.run("id").await;

    let names: Vec<_> = results.iter().map(|o| o.machine.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert!(results[0].success);
    assert_eq!(results[0].output, "uid=a\n");
    assert_eq!(results[1].error_kind(), Some(ErrorKind::Authentication));
    assert!(results[2].success);
    assert_eq!(results[2].output, "uid=c\n");
    assert!(!FleetReport::from(results).all_succeeded());
}

#[tokio::test]
async fn test_command_failure_keeps_output_and_isolated() {
    let dir = TempDir::new().unwrap();
    let mut failing = MockHost::new("pw", "partial\n");
    failing.exit_status = 1;
    let transport = MockTransport::default()
        .with_host("10.0.0.1", failing)
        .with_host("10.0.0.2", MockHost::new("pw", "fine\n"));
    let mut op = Operator::with_transport(config(&dir, true), Arc::new(transport));
    op.register("bad", "ops", "10.0.0.1", 22, Some(Credential::password("pw")))
        .unwrap();
    op.register("good", "ops", "10.0.0.2", 22, Some(Credential::password("pw")))
        .unwrap();

    let results = op.run("false").await;

    assert_eq!(results[0].error_kind(), Some(ErrorKind::Command));
    assert_eq!(results[0].output, "partial\n");
    assert!(results[1].success);
    assert_eq!(results[1].output, "fine\n");
}

#[tokio::test]
async fn test_fleet_latency_is_slowest_not_sum() {
    let dir = TempDir::new().unwrap();
    let mut transport = MockTransport::default();
    let mut op_specs = Vec::new();
    for (i, delay_ms) in [300u64, 100, 200, 300, 100].iter().enumerate() {
        let address = format!("10.0.1.{i}");
        let mut host = MockHost::new("pw", &format!("host-{i}\n"));
        host.delay = Duration::from_millis(*delay_ms);
        transport = transport.with_host(&address, host);
        op_specs.push(
            MachineSpec::new(format!("m{i}"), "ops", address, 22)
                .with_credential(Credential::password("pw")),
        );
    }
    let mut op = Operator::with_transport(config(&dir, true), Arc::new(transport));
    op.register_all(op_specs).unwrap();

    let start = Instant::now();
    let results = op.run("hostname").await;
    let elapsed = start.elapsed();

    assert_eq!(results.len(), 5);
    for (i, output) in results.iter().enumerate() {
        assert_eq!(output.machine, format!("m{i}"));
        assert_eq!(output.output, format!("host-{i}\n"));
    }
    // Sequential execution would take 1000ms
    assert!(elapsed < Duration::from_millis(800), "took {elapsed:?}");
}

#[tokio::test]
async fn test_run_on_subset_with_missing_target() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(
        MockTransport::default()
            .with_host("10.0.0.1", MockHost::new("pw", "one\n"))
            .with_host("10.0.0.2", MockHost::new("pw", "two\n")),
    );
    let mut op = Operator::with_transport(config(&dir, true), transport.clone());
    op.register("one", "ops", "10.0.0.1", 22, Some(Credential::password("pw")))
        .unwrap();
    op.register("two", "ops", "10.0.0.2", 22, Some(Credential::password("pw")))
        .unwrap();

    let results = op.run_on("uptime", &["two", "ghost", "one"]).await;

    let names: Vec<_> = results.iter().map(|o| o.machine.as_str()).collect();
    assert_eq!(names, vec!["two", "ghost", "one"]);
    assert_eq!(results[0].output, "two\n");
    assert_eq!(results[1].error_kind(), Some(ErrorKind::NotFound));
    assert_eq!(results[2].output, "one\n");
    assert_eq!(transport.dials.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unset_credential_reported_without_dialing() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::default().with_host("10.0.0.1", MockHost::new("pw", "")));
    let mut op = Operator::with_transport(config(&dir, true), transport.clone());
    op.register("nocred", "ops", "10.0.0.1", 22, None).unwrap();

    let results = op.run("id").await;

    assert_eq!(results[0].error_kind(), Some(ErrorKind::Configuration));
    assert_eq!(transport.dials.load(Ordering::SeqCst), 0);

    op.set_credential("nocred", Credential::password("pw")).unwrap();
    assert!(op.run("id").await[0].success);
}

#[tokio::test]
async fn test_unreachable_host_is_connection_error() {
    let dir = TempDir::new().unwrap();
    let mut op = Operator::with_transport(config(&dir, true), Arc::new(MockTransport::default()));
    op.register("gone", "ops", "10.9.9.9", 22, Some(Credential::password("pw")))
        .unwrap();

    let results = op.run("id").await;
    assert_eq!(results[0].error_kind(), Some(ErrorKind::Connection));
}

#[tokio::test]
async fn test_empty_fleet_returns_no_results() {
    let dir = TempDir::new().unwrap();
    let op = Operator::with_transport(config(&dir, true), Arc::new(MockTransport::default()));
    assert!(op.run("id").await.is_empty());
}
