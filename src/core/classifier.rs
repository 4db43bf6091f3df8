//! Converts a failed pipeline task into persisted target state and the
//! outward `archive_failed` signal.

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::context::AppContext;
use crate::core::models::{ArchiveStatus, JobStatus};
use crate::core::signals::ArchiveEvent;
use crate::db;
use crate::error::{ArchiverError, Result};

/// The task that raised, as far as blame can be attributed.
#[derive(Debug, Clone, Copy)]
pub struct FailedTask<'a> {
    pub name: &'a str,
    pub addon: Option<&'a str>,
}

/// Status a failure maps to.
pub fn classify(error: &ArchiverError) -> ArchiveStatus {
    match error {
        ArchiverError::SizeExceeded(_) => ArchiveStatus::SizeExceeded,
        ArchiverError::Transport { .. } => ArchiveStatus::NetworkError,
        _ => ArchiveStatus::UncaughtError,
    }
}

/// Record a task failure against its job and emit `archive_failed`.
///
/// First failure wins: if the job has already left INITIATED this is a no-op.
/// A job or endpoint that no longer exists cannot be blamed and is returned as
/// `JobNotFound` for the worker to escalate.
pub async fn on_failure(
    ctx: &AppContext,
    job_id: &str,
    task: FailedTask<'_>,
    error: &ArchiverError,
) -> Result<()> {
    let job = db::jobs::load(&ctx.db, job_id).await?;
    if job.status == JobStatus::Failure {
        debug!(job_id = %job_id, task = task.name, "Failure already captured");
        return Ok(());
    }
    if job.is_terminal() {
        debug!(job_id = %job_id, task = task.name, "Discarding failure for finished job");
        return Ok(());
    }

    let info = db::jobs::job_info(&job, ctx.nodes.as_ref()).await?;
    let status = classify(error);

    let errors: Value = match error {
        ArchiverError::SizeExceeded(result) => {
            for target in job.targets.iter().filter(|t| !t.status.is_terminal()) {
                db::jobs::update_target(&ctx.db, job_id, &target.name, status, None, None).await?;
            }
            serde_json::to_value(result.as_ref())?
        }
        ArchiverError::Transport { payload, .. } => {
            if let Some(addon) = task.addon {
                db::jobs::update_target(
                    &ctx.db,
                    job_id,
                    addon,
                    status,
                    Some(vec![payload.clone()]),
                    None,
                )
                .await?;
            }
            serde_json::to_value(db::jobs::target_info(&ctx.db, job_id).await?)?
        }
        other => {
            let diagnostic = json!({
                "task": task.name,
                "job_id": job_id,
                "addon": task.addon,
                "error": other.to_string(),
            });
            let blamed: Vec<&str> = match task.addon {
                Some(addon) => vec![addon],
                None => job
                    .targets
                    .iter()
                    .filter(|t| !t.status.is_terminal())
                    .map(|t| t.name.as_str())
                    .collect(),
            };
            for addon in blamed {
                db::jobs::update_target(
                    &ctx.db,
                    job_id,
                    addon,
                    status,
                    Some(vec![diagnostic.clone()]),
                    None,
                )
                .await?;
            }
            json!([diagnostic])
        }
    };

    if !db::jobs::mark_failed(&ctx.db, job_id).await? {
        debug!(job_id = %job_id, "Another worker finished the job first");
        return Ok(());
    }

    warn!(
        job_id = %job_id,
        task = task.name,
        addon = task.addon.unwrap_or("-"),
        status = %status,
        "Archive job failed"
    );

    let event = ArchiveEvent::ArchiveFailed {
        job_id: job_id.to_string(),
        destination: info.destination,
        errors,
    };
    if let Err(e) = ctx.signals.send(event).await {
        warn!(job_id = %job_id, error = %e, "Failed to deliver archive_failed signal");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::AggregateStatResult;

    #[test]
    fn classification_table() {
        let oversized = ArchiverError::SizeExceeded(Box::new(AggregateStatResult::new(
            "n",
            "Project",
            vec![],
        )));
        assert_eq!(classify(&oversized), ArchiveStatus::SizeExceeded);
        assert_eq!(
            classify(&ArchiverError::transport(Some(500), json!({"error": "disk full"}))),
            ArchiveStatus::NetworkError
        );
        assert_eq!(
            classify(&ArchiverError::Uncaught("boom".into())),
            ArchiveStatus::UncaughtError
        );
        assert_eq!(
            classify(&ArchiverError::Database("locked".into())),
            ArchiveStatus::UncaughtError
        );
    }
}
