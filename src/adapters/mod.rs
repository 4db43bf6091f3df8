use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::file_api::FileApi;
use crate::core::nodes::NodeAdapter;

mod osf;
mod simulated;
mod waterbutler;

pub use osf::OsfNodes;
pub use simulated::{RecordingSignals, SimulatedFileApi, SimulatedNodes};
pub use waterbutler::WaterButlerClient;

/// Node and file API collaborators for the configured mode.
pub fn get_adapters(config: &AppConfig) -> (Arc<dyn NodeAdapter>, Arc<dyn FileApi>) {
    if config.simulation {
        return (
            Arc::new(SimulatedNodes::demo()),
            Arc::new(SimulatedFileApi::new()),
        );
    }

    let nodes = OsfNodes::new(
        config.osf_api_url.clone(),
        config.osf_api_token.clone(),
        WaterButlerClient::new(config.file_api_url.clone()),
    );
    (
        Arc::new(nodes),
        Arc::new(WaterButlerClient::new(config.file_api_url.clone())),
    )
}
