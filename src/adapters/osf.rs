//! Node adapter backed by the OSF JSON API, with file trees read through the
//! file API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::waterbutler::WaterButlerClient;
use crate::core::nodes::{Addon, FileRecord, Node, NodeAdapter, User};
use crate::error::{ArchiverError, Result};

#[derive(Deserialize)]
struct Document {
    data: Resource,
}

#[derive(Deserialize)]
struct Resource {
    id: String,
    attributes: NodeAttributes,
}

#[derive(Deserialize)]
struct NodeAttributes {
    #[serde(default)]
    title: String,
}

pub struct OsfNodes {
    api_url: String,
    token: Option<String>,
    client: reqwest::Client,
    files: WaterButlerClient,
}

impl OsfNodes {
    pub fn new(api_url: impl Into<String>, token: Option<String>, files: WaterButlerClient) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
            files,
        }
    }

    /// GET a JSON API resource; `None` on 404/410.
    async fn fetch(&self, path: &str) -> Result<Option<Value>> {
        let mut req = self.client.get(format!("{}/v2/{path}", self.api_url));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await?;

        let status = res.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Ok(None);
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ArchiverError::transport(
                Some(status.as_u16()),
                json!({ "error": body }),
            ));
        }
        Ok(Some(res.json().await?))
    }
}

#[async_trait]
impl NodeAdapter for OsfNodes {
    async fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        // Registrations are served from their own collection.
        let doc = match self.fetch(&format!("nodes/{node_id}/")).await? {
            Some(doc) => Some(doc),
            None => self.fetch(&format!("registrations/{node_id}/")).await?,
        };
        let Some(doc) = doc else {
            return Ok(None);
        };

        let doc: Document = serde_json::from_value(doc)?;
        Ok(Some(Node {
            id: doc.data.id,
            title: doc.data.attributes.title,
        }))
    }

    async fn get_addon(&self, node_id: &str, short_name: &str) -> Result<Option<Addon>> {
        Ok(self
            .fetch(&format!("nodes/{node_id}/files/{short_name}/"))
            .await?
            .map(|_| Addon::new(node_id, short_name)))
    }

    async fn file_tree(&self, node: &Node, addon: &Addon, user: &User) -> Result<Vec<FileRecord>> {
        self.files
            .list_tree(&node.id, &addon.provider, &user.cookie)
            .await
    }
}
