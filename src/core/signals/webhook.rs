use super::{ArchiveEvent, ArchiveSignals};
use crate::error::{ArchiverError, Result};
use async_trait::async_trait;

/// Posts each archive event as JSON to a configured URL.
pub struct WebhookSignals {
    webhook_url: String,
    client: reqwest::Client,
}

impl WebhookSignals {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ArchiveSignals for WebhookSignals {
    async fn send(&self, event: ArchiveEvent) -> Result<()> {
        let res = self
            .client
            .post(&self.webhook_url)
            .json(&event)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ArchiverError::transport(Some(status), body));
        }
        Ok(())
    }
}
