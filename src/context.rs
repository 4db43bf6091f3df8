use crate::config::AppConfig;
use crate::core::file_api::FileApi;
use crate::core::nodes::NodeAdapter;
use crate::core::signals::ArchiveSignals;
use std::sync::Arc;
use tokio_rusqlite::Connection;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub db: Connection,
    pub nodes: Arc<dyn NodeAdapter>,
    pub file_api: Arc<dyn FileApi>,
    pub signals: Arc<dyn ArchiveSignals>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        db: Connection,
        nodes: Arc<dyn NodeAdapter>,
        file_api: Arc<dyn FileApi>,
        signals: Arc<dyn ArchiveSignals>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            nodes,
            file_api,
            signals,
        }
    }
}
