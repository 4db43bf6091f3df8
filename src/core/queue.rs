//! In-process task queue for the archival pipeline.
//!
//! Tasks are plain messages carrying their job id, so any worker can run
//! them. The queue keeps a count of tasks that are queued or running; a task
//! enqueued by a running task is counted before its parent finishes, so
//! [`TaskQueue::idle`] only resolves once the whole cascade has drained.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::file_api::CopyRequest;
use super::models::AggregateStatResult;
use crate::error::{ArchiverError, Result};

#[derive(Debug, Clone)]
pub enum Task {
    /// Fan out the stat phase for a job.
    Archive { job_id: String },
    /// Survey one addon.
    StatAddon { job_id: String, addon: String },
    /// Size gate and copy fan-out, once every stat task has reported.
    ArchiveNode {
        job_id: String,
        results: Vec<AggregateStatResult>,
    },
    /// Build the copy request for one non-empty addon.
    ArchiveAddon {
        job_id: String,
        addon: String,
        stat_result: AggregateStatResult,
    },
    /// Send one copy request to the file API.
    MakeCopyRequest {
        job_id: String,
        addon: String,
        url: String,
        request: CopyRequest,
    },
}

impl Task {
    pub fn job_id(&self) -> &str {
        match self {
            Task::Archive { job_id }
            | Task::StatAddon { job_id, .. }
            | Task::ArchiveNode { job_id, .. }
            | Task::ArchiveAddon { job_id, .. }
            | Task::MakeCopyRequest { job_id, .. } => job_id,
        }
    }

    /// The addon a task works on, if it is addon-scoped.
    pub fn addon(&self) -> Option<&str> {
        match self {
            Task::StatAddon { addon, .. }
            | Task::ArchiveAddon { addon, .. }
            | Task::MakeCopyRequest { addon, .. } => Some(addon),
            Task::Archive { .. } | Task::ArchiveNode { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Task::Archive { .. } => "archiver.archive",
            Task::StatAddon { .. } => "archiver.stat_addon",
            Task::ArchiveNode { .. } => "archiver.archive_node",
            Task::ArchiveAddon { .. } => "archiver.archive_addon",
            Task::MakeCopyRequest { .. } => "archiver.make_copy_request",
        }
    }
}

#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
    pending: Arc<watch::Sender<usize>>,
}

impl TaskQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0);
        (
            Self {
                tx,
                pending: Arc::new(pending),
            },
            rx,
        )
    }

    pub fn enqueue(&self, task: Task) -> Result<()> {
        self.pending.send_modify(|n| *n += 1);
        if self.tx.send(task).is_err() {
            self.complete();
            return Err(ArchiverError::Uncaught("task queue is closed".to_string()));
        }
        Ok(())
    }

    /// Mark one dequeued task as finished.
    pub fn complete(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Guard that marks one dequeued task finished when dropped, including
    /// when the task unwinds.
    pub fn in_flight(&self) -> InFlight {
        InFlight {
            queue: self.clone(),
        }
    }

    /// Tasks queued or running.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until no task is queued or running.
    pub async fn idle(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

pub struct InFlight {
    queue: TaskQueue,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.queue.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn idle_waits_for_completion() {
        let (queue, mut rx) = TaskQueue::new();
        queue
            .enqueue(Task::Archive {
                job_id: "job".into(),
            })
            .unwrap();
        assert_eq!(queue.pending(), 1);

        let task = rx.recv().await.unwrap();
        assert_eq!(task.job_id(), "job");
        assert!(
            timeout(Duration::from_millis(50), queue.idle())
                .await
                .is_err()
        );

        queue.complete();
        timeout(Duration::from_secs(1), queue.idle())
            .await
            .expect("queue should be idle");
    }

    #[tokio::test]
    async fn panicking_task_still_counts_as_finished() {
        let (queue, mut rx) = TaskQueue::new();
        queue
            .enqueue(Task::Archive {
                job_id: "job".into(),
            })
            .unwrap();
        let task = rx.recv().await.unwrap();

        let guard = queue.in_flight();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            panic!("task {} blew up", task.job_id());
        });
        assert!(handle.await.unwrap_err().is_panic());

        timeout(Duration::from_secs(1), queue.idle())
            .await
            .expect("queue should be idle after a panic");
    }

    #[tokio::test]
    async fn enqueue_fails_once_receiver_is_gone() {
        let (queue, rx) = TaskQueue::new();
        drop(rx);
        let err = queue
            .enqueue(Task::Archive {
                job_id: "job".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ArchiverError::Uncaught(_)));
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn task_accessors() {
        let task = Task::StatAddon {
            job_id: "j".into(),
            addon: "github".into(),
        };
        assert_eq!(task.addon(), Some("github"));
        assert_eq!(task.name(), "archiver.stat_addon");
    }
}
