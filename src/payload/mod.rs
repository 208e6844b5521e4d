//! Payload batching and the pending-payload queue.
//!
//! Samples are packed into [`Payload`]s bounded by [`PayloadLimits`]: at
//! most `max_samples` TVQs and at most `max_tags` distinct tags per payload
//! (a sample whose tag is already present ignores the tag limit). Placement
//! is first fit in queue order; when no payload has room a new one is opened
//! at the tail. Payloads are never merged or reordered.

mod batch;
mod queue;


pub use batch::{DEFAULT_MAX_SAMPLES, Payload, PayloadLimits};
pub use queue::{PayloadQueue, PayloadSnapshot};
