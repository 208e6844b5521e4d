//! Background delivery of queued payloads.
//!
//! [`PosterWorker`] holds the per-cycle logic and is usable on its own;
//! [`DataPoster`] runs it on a dedicated thread with a channel-based stop
//! signal and a bounded join.
//!
//! | Delivery status          | Payload  | Backpressure                 |
//! |--------------------------|----------|------------------------------|
//! | `Good`                   | removed  | cleared                      |
//! | `ErrorWaitForExpire`     | retained | set for the client timeout   |
//! | anything else            | retained | set                          |

mod backpressure;
mod config;
mod handle;
mod worker;

pub use backpressure::Backpressure;
pub use config::{DEFAULT_POST_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT, PosterConfig};
pub use handle::{DataPoster, ShutdownError};
pub use worker::{CycleOutcome, PosterWorker};
