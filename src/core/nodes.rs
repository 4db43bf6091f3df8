use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A project or registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub title: String,
}

/// The user on whose behalf files are read and copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Transfer cookie presented to the file API.
    pub cookie: String,
}

/// A storage addon attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addon {
    pub id: String,
    pub short_name: String,
    /// Provider name understood by the file API.
    pub provider: String,
    /// Folder the addon's tree is renamed to inside the archive.
    pub archive_folder_name: String,
}

impl Addon {
    pub fn new(node_id: &str, short_name: &str) -> Self {
        Self {
            id: format!("{node_id}:{short_name}"),
            short_name: short_name.to_string(),
            provider: short_name.to_string(),
            archive_folder_name: archive_folder_name(short_name),
        }
    }
}

/// Folder name used for an addon inside the archive provider.
pub fn archive_folder_name(short_name: &str) -> String {
    let full_name = match short_name {
        "osfstorage" => "OSF Storage",
        "github" => "GitHub",
        "gitlab" => "GitLab",
        "dropbox" => "Dropbox",
        "box" => "Box",
        "googledrive" => "Google Drive",
        "onedrive" => "OneDrive",
        "s3" => "Amazon S3",
        "figshare" => "figshare",
        "dataverse" => "Dataverse",
        "owncloud" => "ownCloud",
        other => other,
    };
    format!("Archive of {full_name}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Folder,
}

/// One entry of an addon's file tree enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub kind: FileKind,
    pub path: String,
    pub materialized_path: String,
    pub size: Option<u64>,
}

impl FileRecord {
    pub fn file(path: &str, materialized_path: &str, size: u64) -> Self {
        Self {
            kind: FileKind::File,
            path: path.to_string(),
            materialized_path: materialized_path.to_string(),
            size: Some(size),
        }
    }

    pub fn folder(path: &str, materialized_path: &str) -> Self {
        Self {
            kind: FileKind::Folder,
            path: path.to_string(),
            materialized_path: materialized_path.to_string(),
            size: None,
        }
    }
}

/// Access to projects, registrations and their storage addons.
#[async_trait]
pub trait NodeAdapter: Send + Sync {
    /// Look up a node; `None` if it has been deleted.
    async fn get_node(&self, node_id: &str) -> Result<Option<Node>>;

    /// Look up an addon attached to a node; `None` if not attached.
    async fn get_addon(&self, node_id: &str, short_name: &str) -> Result<Option<Addon>>;

    /// Enumerate the full file tree of an addon, nested folders included.
    ///
    /// Transport failures surface as `ArchiverError::Transport` carrying the
    /// provider's error payload.
    async fn file_tree(&self, node: &Node, addon: &Addon, user: &User) -> Result<Vec<FileRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addon_defaults_use_short_name() {
        let addon = Addon::new("abc12", "github");
        assert_eq!(addon.id, "abc12:github");
        assert_eq!(addon.provider, "github");
        assert_eq!(addon.archive_folder_name, "Archive of GitHub");
    }

    #[test]
    fn unknown_addon_keeps_short_name() {
        assert_eq!(archive_folder_name("zotero"), "Archive of zotero");
    }
}
