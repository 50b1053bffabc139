//! opsfleet-inventory: HTTP client for the machine inventory
//!
//! The inventory is a record-listing endpoint returning
//! `{"items": [{"id": .., "ip": .., "hostname": ..}]}`. Records are turned into
//! [`MachineSpec`](opsfleet_core::MachineSpec)s and registered as one batch.
//!
//! ```no_run
//! use opsfleet_core::{Credential, Operator, OperatorConfig};
//! use opsfleet_inventory::InventoryClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = InventoryClient::new("http://inventory.local/api/collections/machines/records")?;
//! let records = client.fetch().await?;
//!
//! let mut operator = Operator::new(OperatorConfig::with_default_known_hosts()?);
//! let specs = records
//!     .iter()
//!     .map(|r| r.to_spec("ops", 22, Some(Credential::password("secret"))))
//!     .collect();
//! operator.register_all(specs)?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;

pub use client::{DEFAULT_REQUEST_TIMEOUT, InventoryClient, MachineRecord};
pub use error::{InventoryError, Result};
