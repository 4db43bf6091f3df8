use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Where a copy reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySource {
    pub cookie: String,
    pub nid: String,
    pub provider: String,
    pub path: String,
}

/// Where a copy writes to; `rename` names the archived folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyDestination {
    pub cookie: String,
    pub nid: String,
    pub provider: String,
    pub path: String,
    pub rename: String,
}

/// Body of `POST /ops/copy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyRequest {
    pub source: CopySource,
    pub destination: CopyDestination,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CopyResponse {
    pub status: u16,
    pub body: Value,
}

impl CopyResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 200/201: the copy is done.
    pub fn is_complete(&self) -> bool {
        matches!(self.status, 200 | 201)
    }

    /// 202: accepted, finished later through the archive callback.
    pub fn is_accepted(&self) -> bool {
        self.status == 202
    }
}

/// Client for the external file API that performs tree copies.
#[async_trait]
pub trait FileApi: Send + Sync {
    /// Issue one copy request. Any HTTP response is returned as-is; only
    /// connection-level failures are errors.
    async fn copy(&self, url: &str, request: &CopyRequest) -> Result<CopyResponse>;
}
