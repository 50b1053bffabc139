//! `Operator`: machine registry and fleet-wide command runner

use std::fmt;
use std::sync::Arc;

use opsfleet_exec::{
    Credential, ExecError, KnownHosts, Machine, Output, RusshTransport, Transport, TrustPolicy,
};
use tracing::{error, info, instrument, warn};

use crate::config::OperatorConfig;
use crate::error::CoreError;

/// Everything needed to register one machine
#[derive(Debug, Clone)]
pub struct MachineSpec {
    pub name: String,
    pub username: String,
    pub host: String,
    pub port: u32,
    pub credential: Option<Credential>,
}

impl MachineSpec {
    pub fn new(
        name: impl Into<String>,
        username: impl Into<String>,
        host: impl Into<String>,
        port: u32,
    ) -> Self {
        Self {
            name: name.into(),
            username: username.into(),
            host: host.into(),
            port,
            credential: None,
        }
    }

    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Check required fields, returning the port as `u16`
    fn validate(&self) -> Result<u16, CoreError> {
        if self.name.is_empty() {
            return Err(CoreError::EmptyField("name"));
        }
        if self.username.is_empty() {
            return Err(CoreError::EmptyField("username"));
        }
        if self.host.is_empty() {
            return Err(CoreError::EmptyField("host"));
        }
        match u16::try_from(self.port) {
            Ok(port) if port != 0 => Ok(port),
            _ => Err(CoreError::InvalidPort(self.port)),
        }
    }
}

/// Registry of uniquely named machines
///
/// Registry order is registration order, and `run` reports results in that
/// order.
pub struct Operator {
    machines: Vec<Machine>,
    config: OperatorConfig,
    known_hosts: Arc<KnownHosts>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("machines", &self.machine_names())
            .field("config", &self.config)
            .field("transport", &self.transport.transport_type())
            .finish_non_exhaustive()
    }
}

impl Operator {
    /// Create an operator that connects over SSH
    #[must_use]
    pub fn new(config: OperatorConfig) -> Self {
        Self::with_transport(config, Arc::new(RusshTransport::new()))
    }

    /// Create an operator with a custom transport
    #[must_use]
    pub fn with_transport(config: OperatorConfig, transport: Arc<dyn Transport>) -> Self {
        let known_hosts = Arc::new(KnownHosts::new(config.known_hosts_path.clone()));
        Self {
            machines: Vec::new(),
            config,
            known_hosts,
            transport,
        }
    }

    #[must_use]
    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Shared known-hosts store
    #[must_use]
    pub fn known_hosts(&self) -> &Arc<KnownHosts> {
        &self.known_hosts
    }

    #[must_use]
    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    #[must_use]
    pub fn machine(&self, name: &str) -> Option<&Machine> {
        self.machines.iter().find(|m| m.name() == name)
    }

    #[must_use]
    pub fn machine_names(&self) -> Vec<&str> {
        self.machines.iter().map(Machine::name).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    fn contains(&self, name: &str) -> bool {
        self.machines.iter().any(|m| m.name() == name)
    }

    fn trust_policy(&self) -> TrustPolicy {
        TrustPolicy {
            known_hosts: self.known_hosts.clone(),
            auto_add: self.config.add_to_known_hosts,
            timeout: self.config.timeout,
        }
    }

    fn build(&self, spec: MachineSpec, port: u16) -> Machine {
        Machine::new(
            spec.name,
            spec.username,
            spec.host,
            port,
            spec.credential,
            self.trust_policy(),
            self.transport.clone(),
        )
    }

    /// Register a machine
    ///
    /// Nothing is changed when an error is returned.
    ///
    /// # Errors
    /// - `CoreError::EmptyField` if name, username or host is empty
    /// - `CoreError::InvalidPort` if port is outside 1-65535
    /// - `CoreError::MachineAlreadyExists` if the name is taken
    pub fn register(
        &mut self,
        name: impl Into<String>,
        username: impl Into<String>,
        host: impl Into<String>,
        port: u32,
        credential: Option<Credential>,
    ) -> Result<&Machine, CoreError> {
        let spec = MachineSpec {
            name: name.into(),
            username: username.into(),
            host: host.into(),
            port,
            credential,
        };
        self.register_spec(spec)
    }

    /// Register a machine from a spec
    ///
    /// # Errors
    /// Same as [`Operator::register`].
    pub fn register_spec(&mut self, spec: MachineSpec) -> Result<&Machine, CoreError> {
        let port = spec.validate()?;
        if self.contains(&spec.name) {
            return Err(CoreError::MachineAlreadyExists(spec.name));
        }

        info!(machine = %spec.name, host = %spec.host, port, "registered machine");
        let name = spec.name.clone();
        let machine = self.build(spec, port);
        self.machines.push(machine);
        self.machines
            .last()
            .ok_or(CoreError::MachineNotFound(name))
    }

    /// Register a batch of machines, all or nothing
    ///
    /// Returns the number of machines added.
    ///
    /// # Errors
    /// Returns the first validation error; duplicates within the batch count
    /// as `CoreError::MachineAlreadyExists`. The registry is unchanged on error.
    pub fn register_all(&mut self, specs: Vec<MachineSpec>) -> Result<usize, CoreError> {
        let mut ports = Vec::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            ports.push(spec.validate()?);
            let duplicate_in_batch = specs[..i].iter().any(|s| s.name == spec.name);
            if duplicate_in_batch || self.contains(&spec.name) {
                return Err(CoreError::MachineAlreadyExists(spec.name.clone()));
            }
        }

        let count = specs.len();
        for (spec, port) in specs.into_iter().zip(ports) {
            let machine = self.build(spec, port);
            self.machines.push(machine);
        }

        info!(count, total = self.machines.len(), "registered machine batch");
        Ok(count)
    }

    /// Remove a machine from the registry
    ///
    /// # Errors
    /// Returns `CoreError::MachineNotFound` if no machine has that name.
    pub fn remove(&mut self, name: &str) -> Result<Machine, CoreError> {
        let index = self
            .machines
            .iter()
            .position(|m| m.name() == name)
            .ok_or_else(|| CoreError::MachineNotFound(name.to_string()))?;
        info!(machine = %name, "removed machine");
        Ok(self.machines.remove(index))
    }

    /// Set or replace a machine's credential before the next run
    ///
    /// # Errors
    /// Returns `CoreError::MachineNotFound` if no machine has that name.
    pub fn set_credential(&mut self, name: &str, credential: Credential) -> Result<(), CoreError> {
        let machine = self
            .machines
            .iter_mut()
            .find(|m| m.name() == name)
            .ok_or_else(|| CoreError::MachineNotFound(name.to_string()))?;
        machine.set_credential(credential);
        Ok(())
    }

    /// Run `command` on every registered machine
    #[instrument(skip(self), fields(machines = self.machines.len()))]
    pub async fn run(&self, command: &str) -> Vec<Output> {
        let targets = self
            .machines
            .iter()
            .map(|m| (m.name().to_string(), Some(m.clone())))
            .collect();
        fan_out(command, targets).await
    }

    /// Run `command` on the named machines, in the given order
    ///
    /// Unknown names get a `MachineNotFound` result in their slot.
    #[instrument(skip(self, names))]
    pub async fn run_on<S: AsRef<str>>(&self, command: &str, names: &[S]) -> Vec<Output> {
        let targets = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                let machine = self.machine(name).cloned();
                if machine.is_none() {
                    warn!(machine = %name, "target not registered");
                }
                (name.to_string(), machine)
            })
            .collect();
        fan_out(command, targets).await
    }
}

/// Start one task per target and wait for all of them
///
/// Handles are awaited in target order, so slot `i` always holds target `i`'s
/// result regardless of completion order.
async fn fan_out(command: &str, targets: Vec<(String, Option<Machine>)>) -> Vec<Output> {
    let command: Arc<str> = Arc::from(command);
    let total = targets.len();

    let handles: Vec<_> = targets
        .into_iter()
        .map(|(name, machine)| {
            let handle = machine.map(|machine| {
                let command = command.clone();
                tokio::spawn(async move { machine.run(&command).await })
            });
            (name, handle)
        })
        .collect();

    let mut outputs = Vec::with_capacity(total);
    for (name, handle) in handles {
        let output = match handle {
            None => Output::not_found(name),
            Some(handle) => match handle.await {
                Ok(output) => output,
                Err(e) => {
                    error!(machine = %name, error = %e, "task panicked");
                    Output::aborted(name, ExecError::TaskFailed(e.to_string()))
                }
            },
        };
        outputs.push(output);
    }

    let failed = outputs.iter().filter(|o| !o.success).count();
    info!(total, succeeded = total - failed, failed, "fleet run finished");

    outputs
}

/// Summary helpers over a fleet run
#[derive(Debug, Clone)]
pub struct FleetReport {
    outputs: Vec<Output>,
}

impl FleetReport {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outputs.iter().all(|o| o.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Output> {
        self.outputs.iter().filter(|o| !o.success)
    }
}

impl From<Vec<Output>> for FleetReport {
    fn from(outputs: Vec<Output>) -> Self {
        Self { outputs }
    }
}
