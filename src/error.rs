//! Error taxonomy for the archival pipeline.

use serde_json::Value;
use thiserror::Error;

use crate::core::models::AggregateStatResult;

pub type Result<T> = std::result::Result<T, ArchiverError>;

#[derive(Debug, Error)]
pub enum ArchiverError {
    /// Aggregate size of the source file trees is over the configured ceiling.
    #[error("archive size {} bytes exceeds the configured maximum", .0.disk_usage)]
    SizeExceeded(Box<AggregateStatResult>),

    /// Non-2xx response or connection failure talking to a file API.
    #[error("transport error (status {status:?}): {payload}")]
    Transport {
        status: Option<u16>,
        payload: Value,
    },

    /// The archive job or one of its endpoints no longer exists.
    #[error("archive job not found: {0}")]
    JobNotFound(String),

    /// The request does not fit the job's current state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Uncaught(String),
}

impl ArchiverError {
    pub fn transport(status: Option<u16>, payload: impl Into<Value>) -> Self {
        Self::Transport {
            status,
            payload: payload.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

pub(crate) fn db_error(e: impl std::fmt::Display) -> ArchiverError {
    ArchiverError::Database(e.to_string())
}

impl From<serde_json::Error> for ArchiverError {
    fn from(value: serde_json::Error) -> Self {
        ArchiverError::Uncaught(format!("serialization error: {value}"))
    }
}

impl From<reqwest::Error> for ArchiverError {
    fn from(value: reqwest::Error) -> Self {
        ArchiverError::Transport {
            status: value.status().map(|s| s.as_u16()),
            payload: Value::String(value.to_string()),
        }
    }
}
