use std::sync::Arc;
use std::time::Duration;

use crate::config::WalkmanConfig;

/// Shared state of the token broker server.
pub struct AppState {
    pub config: WalkmanConfig,
    /// Client for upstream session minting
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: WalkmanConfig) -> Result<Arc<Self>, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Arc::new(Self {
            config,
            http_client,
        }))
    }
}
