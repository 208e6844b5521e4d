//! Flag telling the producer to stop polling for new samples.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::debug;

/// Shared "polling blocked" flag.
///
/// Set by the poster while the historian is refusing data and cleared once
/// a delivery succeeds or the queue is drained. Clones observe the same
/// flag.
#[derive(Clone, Debug, Default)]
pub struct Backpressure(Arc<AtomicBool>);

impl Backpressure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        if !self.0.swap(true, Ordering::AcqRel) {
            debug!("historian polling blocked");
        }
    }

    pub fn clear(&self) {
        if self.0.swap(false, Ordering::AcqRel) {
            debug!("historian polling unblocked");
        }
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
