pub mod api;
pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod utils;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use config::DeployerConfig;
use queue::DeployQueue;

/// State shared by the HTTP handlers. Immutable once the server starts.
pub struct AppState {
    pub config: DeployerConfig,
    pub queue: DeployQueue,
}

impl AppState {
    pub fn new(config: DeployerConfig, queue: DeployQueue) -> Self {
        Self { config, queue }
    }
}

pub type SharedState = Arc<AppState>;
