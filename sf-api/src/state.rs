use std::sync::Arc;

use sf_core::{Config, Scheduler};
use sf_coord::CoordinationStore;
use sf_hypervisor::{HypervisorDriver, NetworkFabric};
use sf_images::ImageCache;

use crate::error_response::ApiError;

/// Shared state for every request handler on this node. Constructed once by
/// the node supervisor and cloned (as an `Arc`) into the API worker task.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CoordinationStore>,
    pub images: Arc<ImageCache>,
    pub hypervisor: Arc<dyn HypervisorDriver>,
    pub fabric: Arc<dyn NetworkFabric>,
    pub scheduler: Scheduler,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn err(&self, error: sf_core::Error) -> ApiError {
        ApiError::new(error, self.config.include_tracebacks)
    }

    pub fn self_node_url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.config.node_ip, self.config.api_port, path)
    }

    pub fn node_url(&self, node_ip: &str, path: &str) -> String {
        format!("http://{}:{}{}", node_ip, self.config.api_port, path)
    }
}
