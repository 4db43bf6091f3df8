//! HTTP client for the file API (WaterButler): tree copies and folder listings.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::core::file_api::{CopyRequest, CopyResponse, FileApi};
use crate::core::nodes::{FileKind, FileRecord};
use crate::error::{ArchiverError, Result};

#[derive(Deserialize)]
struct Listing {
    data: Vec<Entry>,
}

#[derive(Deserialize)]
struct Entry {
    attributes: Attributes,
}

#[derive(Deserialize)]
struct Attributes {
    kind: FileKind,
    path: String,
    materialized: String,
    #[serde(default)]
    size: Option<u64>,
}

pub struct WaterButlerClient {
    base_url: String,
    client: reqwest::Client,
}

impl WaterButlerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn resource_url(&self, nid: &str, provider: &str, path: &str) -> String {
        format!("{}/v1/resources/{nid}/providers/{provider}{path}", self.base_url)
    }

    /// List one folder.
    pub async fn list_folder(
        &self,
        nid: &str,
        provider: &str,
        path: &str,
        cookie: &str,
    ) -> Result<Vec<FileRecord>> {
        let res = self
            .client
            .get(self.resource_url(nid, provider, path))
            .query(&[("cookie", cookie), ("meta", "")])
            .send()
            .await?;

        let status = res.status();
        let body = read_body(res).await?;
        if !status.is_success() {
            return Err(ArchiverError::transport(Some(status.as_u16()), body));
        }

        let listing: Listing = serde_json::from_value(body)?;
        Ok(listing
            .data
            .into_iter()
            .map(|entry| FileRecord {
                kind: entry.attributes.kind,
                path: entry.attributes.path,
                materialized_path: entry.attributes.materialized,
                size: entry.attributes.size,
            })
            .collect())
    }

    /// Walk the whole tree of a provider, folders included, depth first.
    pub async fn list_tree(&self, nid: &str, provider: &str, cookie: &str) -> Result<Vec<FileRecord>> {
        let mut records = Vec::new();
        let mut folders = vec!["/".to_string()];

        while let Some(folder) = folders.pop() {
            debug!(nid = %nid, provider = %provider, folder = %folder, "Listing folder");
            for record in self.list_folder(nid, provider, &folder, cookie).await? {
                if record.kind == FileKind::Folder {
                    folders.push(record.path.clone());
                }
                records.push(record);
            }
        }

        Ok(records)
    }
}

/// Response body as JSON; non-JSON bodies are wrapped as `{"error": text}`.
async fn read_body(res: reqwest::Response) -> Result<Value> {
    let text = res.text().await?;
    if text.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "error": text })))
}

#[async_trait]
impl FileApi for WaterButlerClient {
    async fn copy(&self, url: &str, request: &CopyRequest) -> Result<CopyResponse> {
        let res = self.client.post(url).json(request).send().await?;
        let status = res.status().as_u16();
        let body = read_body(res).await?;
        Ok(CopyResponse { status, body })
    }
}
