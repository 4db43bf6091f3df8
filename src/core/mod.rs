pub mod chord;
pub mod classifier;
pub mod file_api;
pub mod models;
pub mod nodes;
pub mod orchestrator;
pub mod queue;
pub mod signals;
pub mod stat;

pub use file_api::{CopyDestination, CopyRequest, CopyResponse, CopySource, FileApi};
pub use models::{
    AggregateStatResult, ArchiveJob, ArchiveStatus, ArchiveTarget, JobInfo, JobStatus,
    NewArchiveJob,
};
pub use nodes::{Addon, FileKind, FileRecord, Node, NodeAdapter, User};
pub use orchestrator::{CopyOutcome, Orchestrator};
pub use queue::{Task, TaskQueue};
pub use signals::{ArchiveEvent, ArchiveSignals, create_signals};
