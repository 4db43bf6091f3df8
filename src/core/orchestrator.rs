//! The archival pipeline.
//!
//! `archive` fans out one stat task per addon, the [`Chord`] barrier joins
//! them into `archive_node`, which applies the size gate and fans out one
//! copy per non-empty addon. Every task runs inside the same wrapper, which
//! hands any error or panic to the failure classifier. Tasks are never retried.
//!
//! Job completion is decided from the persisted target statuses, never from
//! counting finished tasks, so redelivered or reordered tasks cannot fire the
//! completion signal twice.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::core::chord::{Chord, Release};
use crate::core::classifier::{self, FailedTask};
use crate::core::file_api::{CopyDestination, CopyRequest, CopySource};
use crate::core::models::{AggregateStatResult, ArchiveJob, ArchiveStatus, JobInfo, NewArchiveJob};
use crate::core::nodes::Addon;
use crate::core::queue::{Task, TaskQueue};
use crate::core::signals::ArchiveEvent;
use crate::core::stat;
use crate::db;
use crate::error::{ArchiverError, Result};

/// Out-of-band result for a copy the file API accepted with 202.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CopyOutcome {
    Success,
    Failure {
        #[serde(default)]
        errors: Vec<Value>,
    },
}

pub struct Orchestrator {
    ctx: AppContext,
    queue: TaskQueue,
    chord: Chord,
}

impl Orchestrator {
    /// Create the orchestrator and spawn its worker loop.
    pub fn start(ctx: AppContext) -> Arc<Self> {
        let (queue, rx) = TaskQueue::new();
        let orchestrator = Arc::new(Self {
            ctx,
            queue,
            chord: Chord::new(),
        });
        tokio::spawn(orchestrator.clone().work(rx));
        orchestrator
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Record a new job at registration time. Every target starts PENDING.
    pub async fn create_job(&self, job: NewArchiveJob) -> Result<String> {
        let job_id = db::jobs::create(&self.ctx.db, job).await?;
        info!(job_id = %job_id, "Created archive job");
        Ok(job_id)
    }

    /// Queue the archival of a job that has not started yet.
    ///
    /// Refused once any target has left PENDING; a started job is restarted
    /// with [`Orchestrator::rerun`].
    pub async fn start_archive(&self, job_id: &str) -> Result<()> {
        let job = db::jobs::load(&self.ctx.db, job_id).await?;
        if job.is_terminal() {
            return Err(ArchiverError::Conflict(format!(
                "archive job {job_id} already finished as {}",
                job.status.as_str()
            )));
        }
        if let Some(started) = job
            .targets
            .iter()
            .find(|t| t.status != ArchiveStatus::Pending)
        {
            return Err(ArchiverError::Conflict(format!(
                "archive job {job_id} already started: target '{}' is {}",
                started.name, started.status
            )));
        }
        if self.chord.is_open(job_id).await {
            return Err(ArchiverError::Conflict(format!(
                "archive job {job_id} is already collecting stats"
            )));
        }
        self.deliver(Task::Archive {
            job_id: job_id.to_string(),
        })
    }

    /// Hand a task to the worker. Tasks may be delivered more than once.
    pub fn deliver(&self, task: Task) -> Result<()> {
        self.queue.enqueue(task)
    }

    /// Operator-initiated re-run of a whole job.
    pub async fn rerun(&self, job_id: &str) -> Result<()> {
        if self.chord.is_open(job_id).await {
            return Err(ArchiverError::Conflict(format!(
                "archive job {job_id} is still collecting stats"
            )));
        }
        db::jobs::reset(&self.ctx.db, job_id).await?;
        info!(job_id = %job_id, "Re-running archive job");
        self.deliver(Task::Archive {
            job_id: job_id.to_string(),
        })
    }

    /// Finalize a target whose copy was accepted asynchronously. Only a SENT
    /// target can be finalized.
    pub async fn archive_callback(
        &self,
        job_id: &str,
        addon: &str,
        outcome: CopyOutcome,
    ) -> Result<()> {
        let job = db::jobs::load(&self.ctx.db, job_id).await?;
        let Some(target) = job.target(addon) else {
            return Err(ArchiverError::Uncaught(format!(
                "archive job {job_id} has no target '{addon}'"
            )));
        };
        let not_awaiting = || {
            ArchiverError::Conflict(format!(
                "target '{addon}' of archive job {job_id} is {}, not awaiting a callback",
                target.status
            ))
        };
        if target.status != ArchiveStatus::Sent {
            return Err(not_awaiting());
        }

        match outcome {
            CopyOutcome::Success => {
                let finalized = db::jobs::transition_target(
                    &self.ctx.db,
                    job_id,
                    addon,
                    &[ArchiveStatus::Sent],
                    ArchiveStatus::Success,
                    None,
                )
                .await?;
                if !finalized {
                    return Err(not_awaiting());
                }
                self.check_completion(job_id).await
            }
            CopyOutcome::Failure { errors } => {
                let applied = db::jobs::update_target(
                    &self.ctx.db,
                    job_id,
                    addon,
                    ArchiveStatus::NetworkError,
                    Some(errors.clone()),
                    None,
                )
                .await?;
                if !applied {
                    return Err(not_awaiting());
                }
                let error = ArchiverError::transport(None, Value::Array(errors));
                classifier::on_failure(
                    &self.ctx,
                    job_id,
                    FailedTask {
                        name: "archiver.archive_callback",
                        addon: Some(addon),
                    },
                    &error,
                )
                .await
            }
        }
    }

    /// Resolves once no task is queued or running.
    pub async fn idle(&self) {
        self.queue.idle().await
    }

    async fn work(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Task>) {
        info!("Archive worker started");
        while let Some(task) = rx.recv().await {
            let this = self.clone();
            let in_flight = self.queue.in_flight();
            tokio::spawn(async move {
                let _in_flight = in_flight;
                this.run_task(task).await;
            });
        }
    }

    /// Run one task; on any error or panic, hand the failure to the classifier.
    async fn run_task(self: &Arc<Self>, task: Task) {
        let job_id = task.job_id().to_string();
        let name = task.name();
        let addon = task.addon().map(str::to_string);
        let is_stat = matches!(task, Task::StatAddon { .. });

        debug!(job_id = %job_id, task = name, "Running task");

        let this = self.clone();
        let outcome = match tokio::spawn(async move { this.execute(task).await }).await {
            Ok(outcome) => outcome,
            Err(e) => Err(ArchiverError::Uncaught(format!("task {name} panicked: {e}"))),
        };

        let Err(err) = outcome else {
            return;
        };

        warn!(job_id = %job_id, task = name, error = %err, "Archive task failed");

        // Release the stat barrier even when the stat task died before reporting.
        if is_stat {
            if let Some(addon) = addon.as_deref() {
                if let Release::Failed(failed) = self.chord.report(&job_id, addon, None).await {
                    debug!(job_id = %job_id, failed = ?failed, "Stat phase finished with failures");
                }
            }
        }

        let failed = FailedTask {
            name,
            addon: addon.as_deref(),
        };
        if let Err(fatal) = classifier::on_failure(&self.ctx, &job_id, failed, &err).await {
            error!(
                job_id = %job_id,
                task = name,
                error = %fatal,
                cause = %err,
                "Could not attribute task failure to an archive job"
            );
        }
    }

    async fn execute(&self, task: Task) -> Result<()> {
        match task {
            Task::Archive { job_id } => self.archive(&job_id).await,
            Task::StatAddon { job_id, addon } => self.stat_addon(&job_id, &addon).await,
            Task::ArchiveNode { job_id, results } => self.archive_node(&job_id, results).await,
            Task::ArchiveAddon {
                job_id,
                addon,
                stat_result,
            } => self.archive_addon(&job_id, &addon, stat_result).await,
            Task::MakeCopyRequest {
                job_id,
                addon,
                url,
                request,
            } => self.make_copy_request(&job_id, &addon, &url, &request).await,
        }
    }

    /// Load a job that is still running. `None` if it already finished, in
    /// which case the calling task's work is discarded.
    async fn load_active(&self, job_id: &str) -> Result<Option<(ArchiveJob, JobInfo)>> {
        let job = db::jobs::load(&self.ctx.db, job_id).await?;
        if job.is_terminal() {
            debug!(job_id = %job_id, status = job.status.as_str(), "Job already finished, discarding task");
            return Ok(None);
        }
        let info = db::jobs::job_info(&job, self.ctx.nodes.as_ref()).await?;
        Ok(Some((job, info)))
    }

    async fn set_status(&self, job_id: &str, addon: &str, status: ArchiveStatus) -> Result<bool> {
        db::jobs::update_target(&self.ctx.db, job_id, addon, status, None, None).await
    }

    async fn source_addon(&self, info: &JobInfo, addon: &str) -> Result<Addon> {
        self.ctx
            .nodes
            .get_addon(&info.source.id, addon)
            .await?
            .ok_or_else(|| {
                ArchiverError::Uncaught(format!(
                    "node {} has no addon '{addon}'",
                    info.source.id
                ))
            })
    }

    async fn archive(&self, job_id: &str) -> Result<()> {
        let Some((job, info)) = self.load_active(job_id).await? else {
            return Ok(());
        };
        info!(
            job_id = %job_id,
            source = %info.source.id,
            destination = %info.destination.id,
            "Received archive task"
        );

        // A target past PENDING means an earlier delivery of this task owns the job.
        if job.targets.iter().any(|t| t.status != ArchiveStatus::Pending) {
            debug!(job_id = %job_id, "Archive already under way, skipping");
            return self.check_completion(job_id).await;
        }
        let pending = job.target_addons();

        if !self.ctx.config.enabled {
            info!(job_id = %job_id, "Archiving disabled, completing without copying");
            for name in &pending {
                self.set_status(job_id, name, ArchiveStatus::Success).await?;
            }
            return self.check_completion(job_id).await;
        }

        let mut addons = Vec::new();
        let mut missing = Vec::new();
        for name in pending {
            if self.ctx.nodes.get_addon(&info.source.id, &name).await?.is_some() {
                addons.push(name);
            } else {
                missing.push(name);
            }
        }

        // Missing addons are settled by archive_node, after the size gate.
        if addons.is_empty() {
            self.settle_missing(job_id, &missing).await?;
            return self.check_completion(job_id).await;
        }

        if !self.chord.open(job_id, addons.clone()).await {
            debug!(job_id = %job_id, "Stat phase already running");
            return Ok(());
        }
        for addon in addons {
            self.queue.enqueue(Task::StatAddon {
                job_id: job_id.to_string(),
                addon,
            })?;
        }
        Ok(())
    }

    /// Addons the source no longer has: nothing to archive.
    async fn settle_missing(&self, job_id: &str, missing: &[String]) -> Result<()> {
        for name in missing {
            let settled = db::jobs::transition_target(
                &self.ctx.db,
                job_id,
                name,
                &[ArchiveStatus::Pending],
                ArchiveStatus::Success,
                None,
            )
            .await?;
            if settled {
                warn!(job_id = %job_id, addon = %name, "Source has no such addon, nothing to archive");
            }
        }
        Ok(())
    }

    /// Runs even when a sibling stat task already failed the job, so every
    /// addon's survey completes and the barrier is released.
    async fn stat_addon(&self, job_id: &str, addon: &str) -> Result<()> {
        let info = db::jobs::info(&self.ctx.db, self.ctx.nodes.as_ref(), job_id).await?;

        let src_addon = self.source_addon(&info, addon).await?;
        let Some(result) =
            stat::stat_addon(&self.ctx.db, self.ctx.nodes.as_ref(), job_id, &info, &src_addon)
                .await?
        else {
            // The delivery that claimed the target reports for it.
            return Ok(());
        };

        match self.chord.report(job_id, addon, Some(result)).await {
            Release::Ready(results) => self.queue.enqueue(Task::ArchiveNode {
                job_id: job_id.to_string(),
                results,
            })?,
            Release::Failed(failed) => {
                debug!(job_id = %job_id, failed = ?failed, "Stat phase finished with failures");
            }
            Release::Waiting => {}
        }
        Ok(())
    }

    async fn archive_node(&self, job_id: &str, results: Vec<AggregateStatResult>) -> Result<()> {
        let Some((job, info)) = self.load_active(job_id).await? else {
            return Ok(());
        };
        info!(job_id = %job_id, source = %info.source.id, "Archiving node");

        let stat_result =
            AggregateStatResult::new(info.source.id.clone(), info.source.title.clone(), results);
        if stat_result.disk_usage > self.ctx.config.max_archive_size {
            return Err(ArchiverError::SizeExceeded(Box::new(stat_result)));
        }

        let missing: Vec<String> = job
            .targets
            .iter()
            .filter(|t| t.status == ArchiveStatus::Pending)
            .filter(|t| !stat_result.targets.iter().any(|r| r.target_name == t.name))
            .map(|t| t.name.clone())
            .collect();
        self.settle_missing(job_id, &missing).await?;

        let mut addons_archived = 0;
        for result in stat_result.targets {
            if result.num_files == 0 {
                db::jobs::transition_target(
                    &self.ctx.db,
                    job_id,
                    &result.target_name,
                    &[ArchiveStatus::Checking],
                    ArchiveStatus::Success,
                    Some(&result),
                )
                .await?;
                continue;
            }
            addons_archived += 1;
            self.queue.enqueue(Task::ArchiveAddon {
                job_id: job_id.to_string(),
                addon: result.target_name.clone(),
                stat_result: result,
            })?;
        }

        if addons_archived == 0 {
            self.check_completion(job_id).await?;
        }
        Ok(())
    }

    async fn archive_addon(
        &self,
        job_id: &str,
        addon: &str,
        stat_result: AggregateStatResult,
    ) -> Result<()> {
        let Some((_, info)) = self.load_active(job_id).await? else {
            return Ok(());
        };

        let surveyed = db::jobs::transition_target(
            &self.ctx.db,
            job_id,
            addon,
            &[ArchiveStatus::Checking],
            ArchiveStatus::Checking,
            Some(&stat_result),
        )
        .await?;
        if !surveyed {
            debug!(job_id = %job_id, addon = %addon, "Copy already under way, skipping");
            return Ok(());
        }
        info!(job_id = %job_id, addon = %addon, source = %info.source.id, "Archiving addon");

        let src_addon = self.source_addon(&info, addon).await?;
        let cookie = info.initiator.cookie.clone();
        let request = CopyRequest {
            source: CopySource {
                cookie: cookie.clone(),
                nid: info.source.id.clone(),
                provider: src_addon.provider.clone(),
                path: "/".to_string(),
            },
            destination: CopyDestination {
                cookie,
                nid: info.destination.id.clone(),
                provider: self.ctx.config.archive_provider.clone(),
                path: "/".to_string(),
                rename: src_addon.archive_folder_name.clone(),
            },
        };

        self.queue.enqueue(Task::MakeCopyRequest {
            job_id: job_id.to_string(),
            addon: addon.to_string(),
            url: self.ctx.config.copy_url(),
            request,
        })
    }

    async fn make_copy_request(
        &self,
        job_id: &str,
        addon: &str,
        url: &str,
        request: &CopyRequest,
    ) -> Result<()> {
        let Some((_, info)) = self.load_active(job_id).await? else {
            return Ok(());
        };

        // Only one delivery of a copy may claim the target.
        let claimed = db::jobs::transition_target(
            &self.ctx.db,
            job_id,
            addon,
            &[ArchiveStatus::Checking],
            ArchiveStatus::Sending,
            None,
        )
        .await?;
        if !claimed {
            debug!(job_id = %job_id, addon = %addon, "Copy request already sent, skipping");
            return Ok(());
        }
        info!(
            job_id = %job_id,
            addon = %addon,
            destination = %info.destination.id,
            "Sending copy request"
        );

        let response = match self.ctx.file_api.copy(url, request).await {
            Ok(response) => response,
            Err(ArchiverError::Transport { status, payload }) => {
                db::jobs::update_target(
                    &self.ctx.db,
                    job_id,
                    addon,
                    ArchiveStatus::NetworkError,
                    Some(vec![payload.clone()]),
                    None,
                )
                .await?;
                return Err(ArchiverError::Transport { status, payload });
            }
            Err(e) => return Err(e),
        };

        if !response.is_success() {
            db::jobs::update_target(
                &self.ctx.db,
                job_id,
                addon,
                ArchiveStatus::NetworkError,
                Some(vec![response.body.clone()]),
                None,
            )
            .await?;
            return Err(ArchiverError::Transport {
                status: Some(response.status),
                payload: response.body,
            });
        }

        self.set_status(job_id, addon, ArchiveStatus::Sent).await?;
        if response.is_complete() {
            self.set_status(job_id, addon, ArchiveStatus::Success).await?;
            self.check_completion(job_id).await?;
        } else {
            info!(
                job_id = %job_id,
                addon = %addon,
                status = response.status,
                "Copy accepted, awaiting archive callback"
            );
        }
        Ok(())
    }

    /// Fire `archive_completed` if every target has succeeded.
    async fn check_completion(&self, job_id: &str) -> Result<()> {
        let job = db::jobs::load(&self.ctx.db, job_id).await?;
        if job.is_terminal() {
            return Ok(());
        }
        if job.targets.iter().any(|t| t.status.is_failure()) {
            return Ok(());
        }
        if !job
            .targets
            .iter()
            .all(|t| t.status == ArchiveStatus::Success)
        {
            return Ok(());
        }

        let info = db::jobs::job_info(&job, self.ctx.nodes.as_ref()).await?;
        if !db::jobs::mark_succeeded(&self.ctx.db, job_id).await? {
            return Ok(());
        }

        info!(job_id = %job_id, destination = %info.destination.id, "Archive job completed");
        let event = ArchiveEvent::ArchiveCompleted {
            job_id: job_id.to_string(),
            destination: info.destination,
        };
        if let Err(e) = self.ctx.signals.send(event).await {
            warn!(job_id = %job_id, error = %e, "Failed to deliver archive_completed signal");
        }
        Ok(())
    }
}
