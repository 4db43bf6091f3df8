//! File-tree survey for one addon.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::core::models::{AggregateStatResult, ArchiveStatus, JobInfo};
use crate::core::nodes::{Addon, FileKind, FileRecord, NodeAdapter};
use crate::db;
use crate::error::{ArchiverError, Result};

#[derive(Default)]
struct Folder {
    id: String,
    folders: BTreeMap<String, Folder>,
    files: Vec<AggregateStatResult>,
}

impl Folder {
    fn descend(&mut self, segments: &[&str]) -> &mut Folder {
        let mut folder = self;
        let mut prefix = String::from("/");
        for segment in segments {
            prefix.push_str(segment);
            prefix.push('/');
            let id = prefix.clone();
            folder = folder
                .folders
                .entry(segment.to_string())
                .or_insert_with(|| Folder {
                    id,
                    ..Default::default()
                });
        }
        folder
    }

    fn into_result(self, name: String) -> AggregateStatResult {
        let mut targets: Vec<AggregateStatResult> = self
            .folders
            .into_iter()
            .map(|(name, folder)| folder.into_result(name))
            .collect();
        targets.extend(self.files);
        AggregateStatResult::new(self.id, name, targets)
    }
}

/// Build the stat tree of an addon from its flat file enumeration.
///
/// Records are placed by materialized path; folders that only appear as a
/// prefix of a file path are created on the way. Files without a size count
/// as zero bytes.
pub fn aggregate_file_tree(
    addon_id: &str,
    addon_name: &str,
    records: &[FileRecord],
) -> AggregateStatResult {
    let mut root = Folder {
        id: addon_id.to_string(),
        ..Default::default()
    };

    for record in records {
        let segments: Vec<&str> = record
            .materialized_path
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        match record.kind {
            FileKind::Folder if segments.is_empty() => {}
            FileKind::Folder => {
                root.descend(&segments).id = record.path.clone();
            }
            FileKind::File => {
                let Some((name, parents)) = segments.split_last() else {
                    warn!(path = %record.path, "Skipping file record without a name");
                    continue;
                };
                root.descend(parents).files.push(AggregateStatResult::file(
                    record.path.clone(),
                    name.to_string(),
                    record.size.unwrap_or(0),
                ));
            }
        }
    }

    root.into_result(addon_name.to_string())
}

/// Survey one addon of the job's source node.
///
/// Claims the target by moving it from PENDING to CHECKING; `None` if another
/// task already claimed it. A transport failure from the provider marks the
/// target NETWORK_ERROR with the provider payload and is returned to the
/// caller.
pub async fn stat_addon(
    db: &Connection,
    nodes: &dyn NodeAdapter,
    job_id: &str,
    info: &JobInfo,
    addon: &Addon,
) -> Result<Option<AggregateStatResult>> {
    let claimed = db::jobs::transition_target(
        db,
        job_id,
        &addon.short_name,
        &[ArchiveStatus::Pending],
        ArchiveStatus::Checking,
        None,
    )
    .await?;
    if !claimed {
        debug!(job_id = %job_id, addon = %addon.short_name, "Target already surveyed, skipping");
        return Ok(None);
    }

    let records = match nodes.file_tree(&info.source, addon, &info.initiator).await {
        Ok(records) => records,
        Err(ArchiverError::Transport { status, payload }) => {
            let error = provider_error(&payload);
            db::jobs::update_target(
                db,
                job_id,
                &addon.short_name,
                ArchiveStatus::NetworkError,
                Some(vec![error]),
                None,
            )
            .await?;
            return Err(ArchiverError::Transport { status, payload });
        }
        Err(e) => return Err(e),
    };

    let result = AggregateStatResult::new(
        addon.id.clone(),
        addon.short_name.clone(),
        vec![aggregate_file_tree(&addon.id, &addon.short_name, &records)],
    );

    debug!(
        job_id = %job_id,
        addon = %addon.short_name,
        num_files = result.num_files,
        disk_usage = result.disk_usage,
        "Collected addon stats"
    );

    Ok(Some(result))
}

/// The `error` member of a provider payload, or the whole payload.
fn provider_error(payload: &Value) -> Value {
    match payload.get("error") {
        Some(error) => error.clone(),
        None if payload.is_object() => payload.clone(),
        None => json!({ "error": payload }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_folders_are_summed() {
        let records = vec![
            FileRecord::folder("/1/", "/data/"),
            FileRecord::file("/2", "/data/a.csv", 100),
            FileRecord::folder("/3/", "/data/raw/"),
            FileRecord::file("/4", "/data/raw/b.bin", 250),
            FileRecord::file("/5", "/README.md", 10),
        ];

        let tree = aggregate_file_tree("node:osfstorage", "osfstorage", &records);

        assert_eq!(tree.num_files, 3);
        assert_eq!(tree.disk_usage, 360);
        assert_eq!(tree.targets.len(), 2);

        let data = &tree.targets[0];
        assert_eq!(data.target_name, "data");
        assert_eq!(data.target_id, "/1/");
        assert_eq!(data.num_files, 2);
        assert_eq!(data.disk_usage, 350);

        let raw = data
            .targets
            .iter()
            .find(|t| t.target_name == "raw")
            .unwrap();
        assert_eq!(raw.disk_usage, 250);
    }

    #[test]
    fn implicit_folders_are_created() {
        let records = vec![FileRecord::file("/9", "/a/b/c.txt", 5)];

        let tree = aggregate_file_tree("id", "github", &records);

        assert_eq!(tree.num_files, 1);
        let a = &tree.targets[0];
        assert_eq!(a.target_id, "/a/");
        assert_eq!(a.targets[0].target_id, "/a/b/");
        assert_eq!(a.targets[0].targets[0].target_name, "c.txt");
    }

    #[test]
    fn empty_tree_has_no_files() {
        let tree = aggregate_file_tree("id", "dropbox", &[FileRecord::folder("/x/", "/x/")]);
        assert_eq!(tree.num_files, 0);
        assert_eq!(tree.disk_usage, 0);
    }

    #[test]
    fn missing_size_counts_as_zero() {
        let mut record = FileRecord::file("/1", "/a", 0);
        record.size = None;
        let tree = aggregate_file_tree("id", "box", &[record]);
        assert_eq!(tree.num_files, 1);
        assert_eq!(tree.disk_usage, 0);
    }

    #[test]
    fn provider_error_prefers_error_member() {
        assert_eq!(
            provider_error(&json!({"error": "timeout", "code": 504})),
            json!("timeout")
        );
        assert_eq!(provider_error(&json!("boom")), json!({"error": "boom"}));
    }
}
