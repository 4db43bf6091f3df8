//! Durable archive job state.
//!
//! Every mutation of a job's targets goes through [`update_target`], which
//! performs its read-modify-write inside a single SQLite transaction so that
//! concurrent workers observe last-write-wins on status and append-only errors.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, types::Type};
use tokio_rusqlite::{Connection, params};
use uuid::Uuid;

use crate::core::models::{
    AggregateStatResult, ArchiveJob, ArchiveStatus, ArchiveTarget, JobInfo, JobStatus,
    NewArchiveJob,
};
use crate::core::nodes::{NodeAdapter, User};
use crate::error::{ArchiverError, Result, db_error};

struct JobRow {
    id: String,
    src_node: String,
    dst_node: String,
    initiator: String,
    initiator_cookie: String,
    status: String,
    done: bool,
    created_at: String,
}

struct TargetRow {
    name: String,
    status: String,
    errors: String,
    stat_result: Option<String>,
}

fn parse_json<T: DeserializeOwned>(idx: usize, text: &str) -> rusqlite::Result<T> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn insert_log(
    tx: &rusqlite::Transaction<'_>,
    job_id: &str,
    target: &str,
    status: &str,
) -> rusqlite::Result<()> {
    let log_id = Uuid::now_v7().to_string();
    tx.execute(
        "INSERT INTO archive_target_log (id, job_id, target, status)
         VALUES (?1, ?2, ?3, ?4)",
        params![log_id, job_id, target, status],
    )?;
    Ok(())
}

/// Create a job with every target at PENDING. Returns the new job id.
pub async fn create(conn: &Connection, job: NewArchiveJob) -> Result<String> {
    let job_id = Uuid::now_v7().to_string();
    let id = job_id.clone();

    conn.call(move |c| {
        let tx = c.transaction()?;

        tx.execute(
            "INSERT INTO archive_jobs (id, src_node, dst_node, initiator, initiator_cookie)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &id,
                &job.src_node,
                &job.dst_node,
                &job.initiator.id,
                &job.initiator.cookie
            ],
        )?;

        for (position, addon) in job.addons.iter().enumerate() {
            tx.execute(
                "INSERT INTO archive_targets (job_id, name, position, status)
                 VALUES (?1, ?2, ?3, 'PENDING')",
                params![&id, addon, position as i64],
            )?;
            insert_log(&tx, &id, addon, ArchiveStatus::Pending.as_str())?;
        }

        tx.commit()?;
        Ok::<(), rusqlite::Error>(())
    })
    .await
    .map_err(db_error)?;

    Ok(job_id)
}

pub async fn get(conn: &Connection, job_id: &str) -> Result<Option<ArchiveJob>> {
    let job_id = job_id.to_string();
    let rows = conn
        .call(move |c| {
            let job = c
                .query_row(
                    "SELECT id, src_node, dst_node, initiator, initiator_cookie, status, done,
                     COALESCE(created_at, '')
                     FROM archive_jobs WHERE id = ?1",
                    params![job_id],
                    |row| {
                        Ok(JobRow {
                            id: row.get(0)?,
                            src_node: row.get(1)?,
                            dst_node: row.get(2)?,
                            initiator: row.get(3)?,
                            initiator_cookie: row.get(4)?,
                            status: row.get(5)?,
                            done: row.get(6)?,
                            created_at: row.get(7)?,
                        })
                    },
                )
                .optional()?;

            let Some(job) = job else {
                return Ok(None);
            };

            let targets = select_targets(c, &job.id)?;
            Ok::<_, rusqlite::Error>(Some((job, targets)))
        })
        .await
        .map_err(db_error)?;

    let Some((job, targets)) = rows else {
        return Ok(None);
    };

    Ok(Some(ArchiveJob {
        status: JobStatus::parse(&job.status).ok_or_else(|| {
            ArchiverError::Database(format!("unknown job status '{}'", job.status))
        })?,
        id: job.id,
        src_node: job.src_node,
        dst_node: job.dst_node,
        initiator: job.initiator,
        initiator_cookie: job.initiator_cookie,
        done: job.done,
        created_at: job.created_at,
        targets: targets
            .into_iter()
            .map(target_from_row)
            .collect::<Result<Vec<_>>>()?,
    }))
}

/// Like [`get`] but a missing job is an error.
pub async fn load(conn: &Connection, job_id: &str) -> Result<ArchiveJob> {
    get(conn, job_id)
        .await?
        .ok_or_else(|| ArchiverError::JobNotFound(job_id.to_string()))
}

pub async fn find_by_destination(conn: &Connection, dst_node: &str) -> Result<Option<ArchiveJob>> {
    let dst_node = dst_node.to_string();
    let job_id: Option<String> = conn
        .call(move |c| {
            c.query_row(
                "SELECT id FROM archive_jobs WHERE dst_node = ?1",
                params![dst_node],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(db_error)?;

    match job_id {
        Some(id) => get(conn, &id).await,
        None => Ok(None),
    }
}

pub async fn list(
    conn: &Connection,
    limit: u32,
    offset: u32,
    status: Option<JobStatus>,
) -> Result<Vec<ArchiveJob>> {
    let status = status.map(|s| s.as_str().to_string());
    let ids: Vec<String> = conn
        .call(move |c| {
            let mut stmt = c.prepare(
                "SELECT id FROM archive_jobs
                 WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(params![status, limit, offset], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
        })
        .await
        .map_err(db_error)?;

    let mut jobs = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(job) = get(conn, &id).await? {
            jobs.push(job);
        }
    }
    Ok(jobs)
}

/// Resolve the source, destination and initiator of a job.
///
/// Fails with `JobNotFound` when the job record or either node is gone.
pub async fn info(conn: &Connection, nodes: &dyn NodeAdapter, job_id: &str) -> Result<JobInfo> {
    let job = load(conn, job_id).await?;
    job_info(&job, nodes).await
}

pub async fn job_info(job: &ArchiveJob, nodes: &dyn NodeAdapter) -> Result<JobInfo> {
    let source = nodes.get_node(&job.src_node).await?.ok_or_else(|| {
        ArchiverError::JobNotFound(format!("{}: source node {} deleted", job.id, job.src_node))
    })?;
    let destination = nodes.get_node(&job.dst_node).await?.ok_or_else(|| {
        ArchiverError::JobNotFound(format!(
            "{}: destination node {} deleted",
            job.id, job.dst_node
        ))
    })?;

    Ok(JobInfo {
        source,
        destination,
        initiator: User {
            id: job.initiator.clone(),
            cookie: job.initiator_cookie.clone(),
        },
    })
}

pub async fn target_addons(conn: &Connection, job_id: &str) -> Result<Vec<String>> {
    Ok(target_info(conn, job_id)
        .await?
        .into_iter()
        .map(|t| t.name)
        .collect())
}

pub async fn target_info(conn: &Connection, job_id: &str) -> Result<Vec<ArchiveTarget>> {
    let job_id = job_id.to_string();
    let rows = conn
        .call(move |c| select_targets(c, &job_id))
        .await
        .map_err(db_error)?;

    rows.into_iter().map(target_from_row).collect()
}

fn select_targets(c: &rusqlite::Connection, job_id: &str) -> rusqlite::Result<Vec<TargetRow>> {
    let mut stmt = c.prepare(
        "SELECT name, status, errors, stat_result FROM archive_targets
         WHERE job_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![job_id], |row| {
        Ok(TargetRow {
            name: row.get(0)?,
            status: row.get(1)?,
            errors: row.get(2)?,
            stat_result: row.get(3)?,
        })
    })?;
    rows.collect()
}

fn target_from_row(row: TargetRow) -> Result<ArchiveTarget> {
    let status = ArchiveStatus::parse(&row.status).ok_or_else(|| {
        ArchiverError::Database(format!("unknown target status '{}'", row.status))
    })?;
    let stat_result = row
        .stat_result
        .as_deref()
        .map(serde_json::from_str::<AggregateStatResult>)
        .transpose()?;

    Ok(ArchiveTarget {
        name: row.name,
        status,
        errors: serde_json::from_str(&row.errors)?,
        stat_result,
    })
}

enum UpdateOutcome {
    Applied,
    Unchanged,
    Missing,
}

/// Set a target's status, append errors and record a stat summary.
///
/// A target already in a terminal status is left untouched, so repeating a
/// terminal update is a no-op and failures are never downgraded. Errors are
/// appended; an entry already present is not duplicated. Returns whether the
/// update was applied.
pub async fn update_target(
    conn: &Connection,
    job_id: &str,
    addon: &str,
    status: ArchiveStatus,
    errors: Option<Vec<Value>>,
    stat_result: Option<&AggregateStatResult>,
) -> Result<bool> {
    let stat_json = stat_result.map(serde_json::to_string).transpose()?;
    let new_errors = errors.unwrap_or_default();
    let (job, name) = (job_id.to_string(), addon.to_string());

    let outcome = conn
        .call(move |c| {
            let tx = c.transaction()?;

            let current: Option<(String, String)> = tx
                .query_row(
                    "SELECT status, errors FROM archive_targets WHERE job_id = ?1 AND name = ?2",
                    params![&job, &name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((current_status, errors_json)) = current else {
                return Ok(UpdateOutcome::Missing);
            };

            let current_status =
                ArchiveStatus::parse(&current_status).unwrap_or(ArchiveStatus::Pending);
            if current_status.is_terminal() {
                return Ok(UpdateOutcome::Unchanged);
            }

            let mut all_errors: Vec<Value> = parse_json(1, &errors_json)?;
            for error in new_errors {
                if !all_errors.contains(&error) {
                    all_errors.push(error);
                }
            }
            let all_errors = serde_json::to_string(&all_errors)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

            tx.execute(
                "UPDATE archive_targets
                 SET status = ?3, errors = ?4, stat_result = COALESCE(?5, stat_result)
                 WHERE job_id = ?1 AND name = ?2",
                params![&job, &name, status.as_str(), all_errors, stat_json],
            )?;

            if current_status != status {
                insert_log(&tx, &job, &name, status.as_str())?;
            }

            tx.commit()?;
            Ok::<_, rusqlite::Error>(UpdateOutcome::Applied)
        })
        .await
        .map_err(db_error)?;

    match outcome {
        UpdateOutcome::Applied => Ok(true),
        UpdateOutcome::Unchanged => Ok(false),
        UpdateOutcome::Missing => Err(ArchiverError::Uncaught(format!(
            "archive job {job_id} has no target '{addon}'"
        ))),
    }
}

/// Move a target to `to` only if it is currently in one of `from`.
///
/// This is the claim step for work that must happen once per target (a stat
/// survey, a copy request): of several concurrent or redelivered tasks, only
/// the one that sees `true` may proceed.
pub async fn transition_target(
    conn: &Connection,
    job_id: &str,
    addon: &str,
    from: &[ArchiveStatus],
    to: ArchiveStatus,
    stat_result: Option<&AggregateStatResult>,
) -> Result<bool> {
    let stat_json = stat_result.map(serde_json::to_string).transpose()?;
    let from: Vec<ArchiveStatus> = from.to_vec();
    let (job, name) = (job_id.to_string(), addon.to_string());

    let outcome = conn
        .call(move |c| {
            let tx = c.transaction()?;

            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM archive_targets WHERE job_id = ?1 AND name = ?2",
                    params![&job, &name],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(current) = current else {
                return Ok(UpdateOutcome::Missing);
            };
            match ArchiveStatus::parse(&current) {
                Some(status) if from.contains(&status) => {}
                _ => return Ok(UpdateOutcome::Unchanged),
            }

            tx.execute(
                "UPDATE archive_targets
                 SET status = ?3, stat_result = COALESCE(?4, stat_result)
                 WHERE job_id = ?1 AND name = ?2",
                params![&job, &name, to.as_str(), stat_json],
            )?;
            if current != to.as_str() {
                insert_log(&tx, &job, &name, to.as_str())?;
            }

            tx.commit()?;
            Ok::<_, rusqlite::Error>(UpdateOutcome::Applied)
        })
        .await
        .map_err(db_error)?;

    match outcome {
        UpdateOutcome::Applied => Ok(true),
        UpdateOutcome::Unchanged => Ok(false),
        UpdateOutcome::Missing => Err(ArchiverError::Uncaught(format!(
            "archive job {job_id} has no target '{addon}'"
        ))),
    }
}

/// Move the job out of INITIATED. Only the caller that performs the
/// transition gets `true`.
async fn finish(conn: &Connection, job_id: &str, status: JobStatus) -> Result<bool> {
    let job_id = job_id.to_string();
    let changed = conn
        .call(move |c| {
            c.execute(
                "UPDATE archive_jobs SET status = ?2, done = 1
                 WHERE id = ?1 AND status = 'INITIATED'",
                params![job_id, status.as_str()],
            )
        })
        .await
        .map_err(db_error)?;

    Ok(changed == 1)
}

pub async fn mark_failed(conn: &Connection, job_id: &str) -> Result<bool> {
    finish(conn, job_id, JobStatus::Failure).await
}

pub async fn mark_succeeded(conn: &Connection, job_id: &str) -> Result<bool> {
    finish(conn, job_id, JobStatus::Success).await
}

/// Operator-initiated re-run: every target back to PENDING with its errors
/// and stat summary cleared, job back to INITIATED. The transition log is kept.
pub async fn reset(conn: &Connection, job_id: &str) -> Result<()> {
    let id = job_id.to_string();
    let found = conn
        .call(move |c| {
            let tx = c.transaction()?;
            let changed = tx.execute(
                "UPDATE archive_jobs SET status = 'INITIATED', done = 0 WHERE id = ?1",
                params![&id],
            )?;
            if changed == 0 {
                return Ok(false);
            }

            let names: Vec<String> = {
                let mut stmt = tx.prepare("SELECT name FROM archive_targets WHERE job_id = ?1")?;
                let rows = stmt.query_map(params![&id], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            tx.execute(
                "UPDATE archive_targets SET status = 'PENDING', errors = '[]', stat_result = NULL
                 WHERE job_id = ?1",
                params![&id],
            )?;
            for name in &names {
                insert_log(&tx, &id, name, ArchiveStatus::Pending.as_str())?;
            }

            tx.commit()?;
            Ok::<_, rusqlite::Error>(true)
        })
        .await
        .map_err(db_error)?;

    if !found {
        return Err(ArchiverError::JobNotFound(job_id.to_string()));
    }
    Ok(())
}

/// Status transitions recorded for one target, oldest first.
pub async fn target_history(
    conn: &Connection,
    job_id: &str,
    addon: &str,
) -> Result<Vec<ArchiveStatus>> {
    let (job_id, addon) = (job_id.to_string(), addon.to_string());
    let statuses: Vec<String> = conn
        .call(move |c| {
            let mut stmt = c.prepare(
                "SELECT status FROM archive_target_log
                 WHERE job_id = ?1 AND target = ?2 ORDER BY seq",
            )?;
            let rows = stmt.query_map(params![job_id, addon], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
        })
        .await
        .map_err(db_error)?;

    statuses
        .iter()
        .map(|s| {
            ArchiveStatus::parse(s)
                .ok_or_else(|| ArchiverError::Database(format!("unknown target status '{s}'")))
        })
        .collect()
}
