//! HTTP client for the machine inventory

use std::time::Duration;

use opsfleet_core::{Credential, MachineSpec};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::{InventoryError, Result};

/// Request timeout applied by [`InventoryClient::new`]
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One machine as listed by the inventory
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MachineRecord {
    pub id: String,
    pub ip: String,
    #[serde(default)]
    pub hostname: String,
}

impl MachineRecord {
    /// Registry name: the hostname, or the record id when it has none
    #[must_use]
    pub fn name(&self) -> &str {
        if self.hostname.is_empty() {
            &self.id
        } else {
            &self.hostname
        }
    }

    /// Build a registration spec for this record
    #[must_use]
    pub fn to_spec(
        &self,
        username: impl Into<String>,
        port: u32,
        credential: Option<Credential>,
    ) -> MachineSpec {
        let spec = MachineSpec::new(self.name(), username, self.ip.clone(), port);
        match credential {
            Some(credential) => spec.with_credential(credential),
            None => spec,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecordList {
    items: Vec<MachineRecord>,
}

/// Client for the inventory listing endpoint
#[derive(Debug, Clone)]
pub struct InventoryClient {
    client: Client,
    url: Url,
}

impl InventoryClient {
    /// Create a client with the default request timeout
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(url: impl AsRef<str>) -> Result<Self> {
        let client = Client::builder().timeout(DEFAULT_REQUEST_TIMEOUT).build()?;
        Self::with_client(url, client)
    }

    /// Create a client with a custom `reqwest::Client`
    ///
    /// # Errors
    /// Returns an error if the URL is invalid.
    pub fn with_client(url: impl AsRef<str>, client: Client) -> Result<Self> {
        let url = Url::parse(url.as_ref())?;
        Ok(Self { client, url })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fetch every machine record
    ///
    /// The whole response must decode; a single malformed record fails the
    /// fetch.
    ///
    /// # Errors
    /// - `InventoryError::Http` if the request fails
    /// - `InventoryError::Status` on a non-success status
    /// - `InventoryError::Decode` if the body is not a record list
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn fetch(&self) -> Result<Vec<MachineRecord>> {
        let response = self.client.get(self.url.clone()).send().await?;

        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(InventoryError::Status { status, message });
        }

        let body = response.bytes().await?;
        debug!(bytes = body.len(), "received inventory response");
        let list: RecordList = serde_json::from_slice(&body)?;

        info!(count = list.items.len(), "fetched inventory");
        Ok(list.items)
    }
}
