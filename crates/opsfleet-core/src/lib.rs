//! opsfleet-core: Machine registry and fleet runner
//!
//! The `Operator` owns a set of uniquely named machines and fans a command out
//! to all or some of them concurrently, returning one `Output` per target in
//! target order.

pub mod config;
pub mod error;
pub mod operator;

pub use config::{DEFAULT_TIMEOUT, OperatorConfig};
pub use error::CoreError;
pub use operator::{FleetReport, MachineSpec, Operator};

pub use opsfleet_exec::{Credential, ErrorKind, ExecError, Machine, Output};
