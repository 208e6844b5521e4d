//! Delivery of sampled tag values to a historian over its JSON HTTP API.
//!
//! Samples are encoded as timestamp/value/quality triples, batched into
//! bounded payloads and posted in order by a background worker that owns
//! the two-token session against the historian. [`HistorianConnector`]
//! wires the pieces together; each piece is also usable on its own.

pub mod api;
pub mod config;
mod connector;
pub mod payload;
pub mod poster;
mod rate_limited_warner;
pub mod sample;
pub mod session;

#[cfg(test)]
mod test_support;

pub use api::{ResponseStatus, Transport, TransportError, UreqTransport};
pub use config::{ConfigError, ConnectorConfig, ConnectorConfigBuilder, DeviceIdentity};
pub use connector::{ConnectorError, HistorianConnector};
pub use payload::{PayloadLimits, PayloadQueue, PayloadSnapshot};
pub use poster::{Backpressure, DataPoster, PosterConfig, PosterWorker, ShutdownError};
pub use rate_limited_warner::{DEFAULT_WARN_INTERVAL, RateLimitedWarner};
pub use sample::{Quality, Sample, SampleValue};
pub use session::{RefreshOutcome, SessionManager};
