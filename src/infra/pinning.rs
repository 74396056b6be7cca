//! Content-addressed storage seam (IPFS pinning).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A document to pin, as received from the client.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Label attached to a pin; only used for bookkeeping on the pinning service.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PinMetadata {
    pub name: String,
    pub keyvalues: BTreeMap<String, String>,
}

impl PinMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyvalues: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.keyvalues.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinReceipt {
    #[serde(rename = "IpfsHash")]
    pub ipfs_hash: String,
    #[serde(rename = "PinSize", default)]
    pub pin_size: u64,
    #[serde(rename = "Timestamp", default)]
    pub timestamp: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Pinning: Send + Sync {
    async fn pin_file(&self, file: FileUpload, metadata: PinMetadata) -> anyhow::Result<PinReceipt>;

    async fn pin_json(
        &self,
        document: JsonValue,
        metadata: PinMetadata,
    ) -> anyhow::Result<PinReceipt>;

    /// `None` when the gateway does not know the hash.
    async fn fetch_json(&self, ipfs_hash: &str) -> anyhow::Result<Option<JsonValue>>;

    /// Checks that the configured credentials are accepted.
    async fn ping(&self) -> anyhow::Result<()>;

    fn gateway_url(&self, ipfs_hash: &str) -> String;
}
