//! Timing and retry settings consumed by the poster worker.

use std::time::Duration;

use crate::config::ConnectorConfig;
use crate::rate_limited_warner::DEFAULT_WARN_INTERVAL;
use crate::session::DEFAULT_CLIENT_TIMEOUT;

/// Default pause between poster cycles.
pub const DEFAULT_POST_INTERVAL: Duration = Duration::from_millis(3000);
/// Default bound on waiting for the worker to acknowledge shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration object describing how a
/// [`PosterWorker`](super::PosterWorker) paces itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PosterConfig {
    /// Pause after every cycle.
    pub post_interval: Duration,
    /// Stall applied after a duplicate-session rejection.
    pub client_timeout: Duration,
    /// Failed deliveries after which a payload is discarded; `None` retries
    /// forever.
    pub max_payload_attempts: Option<u32>,
    /// Minimum spacing of repeated delivery-failure warnings.
    pub warn_interval: Duration,
}

impl Default for PosterConfig {
    fn default() -> Self {
        Self {
            post_interval: DEFAULT_POST_INTERVAL,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            max_payload_attempts: None,
            warn_interval: DEFAULT_WARN_INTERVAL,
        }
    }
}

impl From<&ConnectorConfig> for PosterConfig {
    fn from(config: &ConnectorConfig) -> Self {
        Self {
            post_interval: config.post_interval,
            client_timeout: config.client_timeout,
            max_payload_attempts: config.max_payload_attempts,
            warn_interval: config.warn_interval,
        }
    }
}
