use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::nodes::{Node, User};

/// Per-target archival status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveStatus {
    Pending,
    Checking,
    Sending,
    Sent,
    Success,
    NetworkError,
    SizeExceeded,
    UncaughtError,
}

impl ArchiveStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "CHECKING" => Some(Self::Checking),
            "SENDING" => Some(Self::Sending),
            "SENT" => Some(Self::Sent),
            "SUCCESS" => Some(Self::Success),
            "NETWORK_ERROR" => Some(Self::NetworkError),
            "SIZE_EXCEEDED" => Some(Self::SizeExceeded),
            "UNCAUGHT_ERROR" => Some(Self::UncaughtError),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Checking => "CHECKING",
            Self::Sending => "SENDING",
            Self::Sent => "SENT",
            Self::Success => "SUCCESS",
            Self::NetworkError => "NETWORK_ERROR",
            Self::SizeExceeded => "SIZE_EXCEEDED",
            Self::UncaughtError => "UNCAUGHT_ERROR",
        }
    }

    /// Failure-class statuses: the target did not archive.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::SizeExceeded | Self::UncaughtError
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == Self::Success || self.is_failure()
    }
}

impl std::fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job-level outcome. Moves out of `Initiated` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Initiated,
    Success,
    Failure,
}

impl JobStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIATED" => Some(Self::Initiated),
            "SUCCESS" => Some(Self::Success),
            "FAILURE" => Some(Self::Failure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

/// One storage addon under archival for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveTarget {
    pub name: String,
    pub status: ArchiveStatus,
    pub errors: Vec<Value>,
    pub stat_result: Option<AggregateStatResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveJob {
    pub id: String,
    pub src_node: String,
    pub dst_node: String,
    pub initiator: String,
    #[serde(skip_serializing, default)]
    pub initiator_cookie: String,
    pub status: JobStatus,
    pub done: bool,
    pub created_at: String,
    pub targets: Vec<ArchiveTarget>,
}

impl ArchiveJob {
    pub fn target(&self, name: &str) -> Option<&ArchiveTarget> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn target_addons(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.name.clone()).collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.status != JobStatus::Initiated
    }
}

/// Input for creating a job at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArchiveJob {
    pub src_node: String,
    pub dst_node: String,
    pub initiator: User,
    pub addons: Vec<String>,
}

/// The three entities a job operates over.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub source: Node,
    pub destination: Node,
    pub initiator: User,
}

/// Size and file-count survey of a file tree.
///
/// Each node mirrors an addon, folder or file; `disk_usage` and `num_files`
/// are the sums over its children (a file counts itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStatResult {
    pub target_id: String,
    pub target_name: String,
    pub disk_usage: u64,
    pub num_files: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<AggregateStatResult>,
}

impl AggregateStatResult {
    pub fn new(
        target_id: impl Into<String>,
        target_name: impl Into<String>,
        targets: Vec<AggregateStatResult>,
    ) -> Self {
        let disk_usage = targets.iter().map(|t| t.disk_usage).sum();
        let num_files = targets.iter().map(|t| t.num_files).sum();
        Self {
            target_id: target_id.into(),
            target_name: target_name.into(),
            disk_usage,
            num_files,
            targets,
        }
    }

    pub fn file(target_id: impl Into<String>, target_name: impl Into<String>, size: u64) -> Self {
        Self {
            target_id: target_id.into(),
            target_name: target_name.into(),
            disk_usage: size,
            num_files: 1,
            targets: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            ArchiveStatus::Pending,
            ArchiveStatus::Checking,
            ArchiveStatus::Sending,
            ArchiveStatus::Sent,
            ArchiveStatus::Success,
            ArchiveStatus::NetworkError,
            ArchiveStatus::SizeExceeded,
            ArchiveStatus::UncaughtError,
        ] {
            assert_eq!(ArchiveStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ArchiveStatus::parse("FAILURE"), None);
    }

    #[test]
    fn failure_class_is_terminal() {
        assert!(ArchiveStatus::SizeExceeded.is_failure());
        assert!(ArchiveStatus::SizeExceeded.is_terminal());
        assert!(ArchiveStatus::Success.is_terminal());
        assert!(!ArchiveStatus::Success.is_failure());
        assert!(!ArchiveStatus::Sent.is_terminal());
    }

    #[test]
    fn aggregate_sums_children() {
        let folder = AggregateStatResult::new(
            "/docs/",
            "docs",
            vec![
                AggregateStatResult::file("/docs/a", "a", 100),
                AggregateStatResult::file("/docs/b", "b", 50),
            ],
        );
        let root = AggregateStatResult::new(
            "addon",
            "osfstorage",
            vec![folder, AggregateStatResult::file("/c", "c", 7)],
        );

        assert_eq!(root.disk_usage, 157);
        assert_eq!(root.num_files, 3);
    }

    #[test]
    fn aggregate_serializes_with_status_names() {
        let value = serde_json::to_value(ArchiveStatus::NetworkError).unwrap();
        assert_eq!(value, serde_json::json!("NETWORK_ERROR"));
    }
}
