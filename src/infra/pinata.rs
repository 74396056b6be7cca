//! Pinata implementation of [`Pinning`].

use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value as JsonValue};

use super::pinning::{FileUpload, PinMetadata, PinReceipt, Pinning};

#[derive(Debug, Clone)]
pub struct PinataSettings {
    pub api_key: String,
    pub secret_key: String,
    pub api_url: String,
    pub gateway_url: String,
}

pub struct PinataClient {
    http: reqwest::Client,
    settings: PinataSettings,
}

impl PinataClient {
    pub fn new(settings: PinataSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("pinata_api_key", &self.settings.api_key)
            .header("pinata_secret_api_key", &self.settings.secret_key)
    }

    fn options() -> JsonValue {
        json!({ "cidVersion": 1 })
    }
}

async fn into_receipt(response: reqwest::Response, what: &str) -> anyhow::Result<PinReceipt> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!("Pinata {} failed: HTTP {} {}", what, status, body));
    }
    response
        .json::<PinReceipt>()
        .await
        .with_context(|| format!("unexpected Pinata {} response", what))
}

#[async_trait]
impl Pinning for PinataClient {
    async fn pin_file(&self, file: FileUpload, metadata: PinMetadata) -> anyhow::Result<PinReceipt> {
        let size = file.bytes.len();
        let part = Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.content_type)
            .context("invalid document content type")?;
        let form = Form::new()
            .part("file", part)
            .text("pinataMetadata", serde_json::to_string(&metadata)?)
            .text("pinataOptions", Self::options().to_string());

        let response = self
            .authorized(self.http.post(self.endpoint("/pinning/pinFileToIPFS")))
            .multipart(form)
            .send()
            .await
            .context("Pinata file upload request failed")?;
        let receipt = into_receipt(response, "file upload").await?;
        tracing::debug!(ipfs_hash = %receipt.ipfs_hash, size, "pinned file");
        Ok(receipt)
    }

    async fn pin_json(
        &self,
        document: JsonValue,
        metadata: PinMetadata,
    ) -> anyhow::Result<PinReceipt> {
        let body = json!({
            "pinataContent": document,
            "pinataMetadata": metadata,
            "pinataOptions": Self::options(),
        });
        let response = self
            .authorized(self.http.post(self.endpoint("/pinning/pinJSONToIPFS")))
            .json(&body)
            .send()
            .await
            .context("Pinata JSON upload request failed")?;
        let receipt = into_receipt(response, "JSON upload").await?;
        tracing::debug!(ipfs_hash = %receipt.ipfs_hash, "pinned JSON document");
        Ok(receipt)
    }

    async fn fetch_json(&self, ipfs_hash: &str) -> anyhow::Result<Option<JsonValue>> {
        let response = self
            .http
            .get(self.gateway_url(ipfs_hash))
            .send()
            .await
            .context("IPFS gateway request failed")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .context("IPFS gateway returned an error")?;
        let document = response
            .json::<JsonValue>()
            .await
            .context("pinned content is not JSON")?;
        Ok(Some(document))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.authorized(self.http.get(self.endpoint("/data/testAuthentication")))
            .send()
            .await
            .context("Pinata authentication request failed")?
            .error_for_status()
            .context("Pinata rejected the configured credentials")?;
        Ok(())
    }

    fn gateway_url(&self, ipfs_hash: &str) -> String {
        format!(
            "{}/ipfs/{}",
            self.settings.gateway_url.trim_end_matches('/'),
            ipfs_hash
        )
    }
}
