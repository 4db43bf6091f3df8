mod webhook;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{SignalChannelType, SignalConfig};
use crate::core::nodes::Node;
use crate::error::Result;

pub use webhook::WebhookSignals;

/// Outward archival events consumed by the registration layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ArchiveEvent {
    ArchiveFailed {
        job_id: String,
        destination: Node,
        errors: Value,
    },
    ArchiveCompleted {
        job_id: String,
        destination: Node,
    },
}

/// Receiver of archive lifecycle signals.
#[async_trait]
pub trait ArchiveSignals: Send + Sync {
    async fn send(&self, event: ArchiveEvent) -> Result<()>;
}

/// Signals written to the log only.
pub struct LogSignals;

#[async_trait]
impl ArchiveSignals for LogSignals {
    async fn send(&self, event: ArchiveEvent) -> Result<()> {
        match &event {
            ArchiveEvent::ArchiveFailed {
                job_id,
                destination,
                errors,
            } => warn!(
                job_id = %job_id,
                destination = %destination.id,
                errors = %errors,
                "Archive failed"
            ),
            ArchiveEvent::ArchiveCompleted {
                job_id,
                destination,
            } => info!(job_id = %job_id, destination = %destination.id, "Archive completed"),
        }
        Ok(())
    }
}

/// Build the signal channel from config.
pub fn create_signals(config: &SignalConfig) -> Arc<dyn ArchiveSignals> {
    match &config.channel {
        SignalChannelType::Log => Arc::new(LogSignals),
        SignalChannelType::Webhook => match config.webhook_url.as_deref() {
            Some(url) if !url.is_empty() => Arc::new(WebhookSignals::new(url.to_string())),
            _ => {
                warn!("Webhook signal channel configured without a URL, logging signals instead");
                Arc::new(LogSignals)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_signal_tag() {
        let event = ArchiveEvent::ArchiveCompleted {
            job_id: "j1".into(),
            destination: Node {
                id: "reg01".into(),
                title: "Registration".into(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["signal"], json!("archive_completed"));
        assert_eq!(value["destination"]["id"], json!("reg01"));
    }

    #[tokio::test]
    async fn webhook_without_url_falls_back_to_log() {
        let signals = create_signals(&SignalConfig {
            channel: SignalChannelType::Webhook,
            webhook_url: None,
        });
        signals
            .send(ArchiveEvent::ArchiveFailed {
                job_id: "j2".into(),
                destination: Node {
                    id: "reg02".into(),
                    title: "R".into(),
                },
                errors: json!([]),
            })
            .await
            .unwrap();
    }
}
