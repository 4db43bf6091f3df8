#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use osf_archiver::adapters::{RecordingSignals, SimulatedFileApi, SimulatedNodes};
use osf_archiver::config::AppConfig;
use osf_archiver::context::AppContext;
use osf_archiver::core::{ArchiveJob, FileRecord, NewArchiveJob, Orchestrator, User};
use osf_archiver::db;
use tokio::time::timeout;

pub const SRC: &str = "proj1";
pub const DST: &str = "reg1";

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub nodes: Arc<SimulatedNodes>,
    pub file_api: Arc<SimulatedFileApi>,
    pub signals: Arc<RecordingSignals>,
}

impl Harness {
    pub async fn new(max_archive_size: u64) -> Self {
        Self::with_config(AppConfig {
            max_archive_size,
            simulation: true,
            ..AppConfig::default()
        })
        .await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let nodes = Arc::new(SimulatedNodes::new());
        nodes.add_node(SRC, "Project");
        nodes.add_node(DST, "Registration of Project");

        let file_api = Arc::new(SimulatedFileApi::new());
        let signals = Arc::new(RecordingSignals::new());

        let conn = db::init_in_memory().await.expect("in-memory db");
        let ctx = AppContext::new(
            config,
            conn,
            nodes.clone(),
            file_api.clone(),
            signals.clone(),
        );

        Self {
            orchestrator: Orchestrator::start(ctx),
            nodes,
            file_api,
            signals,
        }
    }

    pub async fn create(&self, addons: &[&str]) -> String {
        self.orchestrator
            .create_job(NewArchiveJob {
                src_node: SRC.to_string(),
                dst_node: DST.to_string(),
                initiator: User {
                    id: "user1".to_string(),
                    cookie: "cookie1".to_string(),
                },
                addons: addons.iter().map(|a| a.to_string()).collect(),
            })
            .await
            .expect("create job")
    }

    /// Create a job, run the pipeline and wait for it to settle.
    pub async fn run(&self, addons: &[&str]) -> String {
        let job_id = self.create(addons).await;
        self.orchestrator.start_archive(&job_id).await.expect("start");
        self.settle().await;
        job_id
    }

    pub async fn settle(&self) {
        timeout(Duration::from_secs(5), self.orchestrator.idle())
            .await
            .expect("timeout waiting for pipeline to settle");
    }

    pub async fn job(&self, job_id: &str) -> ArchiveJob {
        db::jobs::load(&self.orchestrator.context().db, job_id)
            .await
            .expect("load job")
    }
}

/// `count` files of `size` bytes each, spread over one folder.
pub fn files(count: usize, size: u64) -> Vec<FileRecord> {
    let mut records = vec![FileRecord::folder("/dir/", "/data/")];
    for i in 0..count {
        records.push(FileRecord::file(
            &format!("/f{i}"),
            &format!("/data/file{i}.bin"),
            size,
        ));
    }
    records
}
