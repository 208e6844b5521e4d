//! Worker thread delivering queued payloads.
//!
//! Each cycle refreshes the session if needed, posts the head payload and
//! reacts to the classified response. Network calls block the worker; the
//! pauses between cycles wait on the shutdown channel so a stop request
//! interrupts them.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, warn};
use serde_json::Value;

use super::{backpressure::Backpressure, config::PosterConfig};
use crate::{
    api::ResponseStatus,
    payload::PayloadQueue,
    rate_limited_warner::RateLimitedWarner,
    session::{RefreshOutcome, SessionManager},
};

/// Result of one [`PosterWorker::run_cycle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was queued.
    Idle,
    /// The head payload was acknowledged and removed.
    Delivered,
    /// The historian reported a duplicate session; the caller should stall
    /// for the client timeout.
    AwaitingExpiry,
    /// Delivery failed; the payload stays at the head.
    Failed(ResponseStatus),
    /// Delivery failed and the payload reached the attempt cap.
    Discarded,
}

/// Delivers the queue head to the historian.
pub struct PosterWorker {
    queue: Arc<PayloadQueue>,
    session: Arc<SessionManager>,
    backpressure: Backpressure,
    config: PosterConfig,
    warner: RateLimitedWarner,
}

impl PosterWorker {
    pub fn new(
        queue: Arc<PayloadQueue>,
        session: Arc<SessionManager>,
        backpressure: Backpressure,
        config: PosterConfig,
    ) -> Self {
        let warner = RateLimitedWarner::new(config.warn_interval);
        Self {
            queue,
            session,
            backpressure,
            config,
            warner,
        }
    }

    pub fn config(&self) -> &PosterConfig {
        &self.config
    }

    /// Attempt delivery of the head payload once.
    ///
    /// Stalling after [`CycleOutcome::AwaitingExpiry`] and pausing between
    /// cycles is left to the caller.
    pub fn run_cycle(&self) -> CycleOutcome {
        let Some(payload) = self.queue.peek_next_payload() else {
            self.backpressure.clear();
            return CycleOutcome::Idle;
        };
        match self.deliver(&payload.tvqs) {
            ResponseStatus::Good => {
                self.session.note_successful_exchange();
                self.queue.remove_next_payload();
                self.backpressure.clear();
                self.warner.reset();
                debug!("delivered {} samples to the historian", payload.sample_count);
                CycleOutcome::Delivered
            }
            ResponseStatus::ErrorWaitForExpire => {
                self.backpressure.set();
                info!(
                    "historian reports a duplicate session; waiting {:?} for it to expire",
                    self.config.client_timeout
                );
                CycleOutcome::AwaitingExpiry
            }
            status => {
                self.backpressure.set();
                self.record_failure(status)
            }
        }
    }

    fn deliver(&self, tvqs: &Value) -> ResponseStatus {
        if let RefreshOutcome::Reacquired(status) = self.session.ensure_fresh_session()
            && !status.is_good()
        {
            return status;
        }
        match self.post(tvqs) {
            ResponseStatus::BadTokens => match self.session.handle_bad_tokens() {
                RefreshOutcome::Reacquired(status) if !status.is_good() => status,
                _ => self.post(tvqs),
            },
            status => status,
        }
    }

    fn post(&self, tvqs: &Value) -> ResponseStatus {
        match self.session.store_data_request(tvqs) {
            Ok(mut request) => self.session.dispatcher().send_with_retry(&mut request),
            Err(err) => {
                error!("{err}");
                ResponseStatus::Error
            }
        }
    }

    fn record_failure(&self, status: ResponseStatus) -> CycleOutcome {
        let attempts = self.queue.record_failed_attempt().unwrap_or_default();
        if let Some(cap) = self.config.max_payload_attempts
            && attempts >= cap
        {
            self.queue.remove_next_payload();
            warn!("discarding historian payload after {attempts} failed deliveries (last status {status})");
            return CycleOutcome::Discarded;
        }
        self.warner.record();
        self.warner.warn_if_due(Instant::now(), |count| {
            warn!("historian delivery failed {count} times; payload retained (last status {status})");
        });
        CycleOutcome::Failed(status)
    }

    /// Cycle until a shutdown signal arrives or the sender is dropped.
    pub(crate) fn run(self, shutdown: Receiver<()>, done_tx: Sender<()>) {
        info!("historian poster started");
        loop {
            match shutdown.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) | Err(TryRecvError::Disconnected) => break,
            }
            if self.run_cycle() == CycleOutcome::AwaitingExpiry {
                let stop = wait_for_shutdown(&shutdown, self.config.client_timeout);
                self.backpressure.clear();
                if stop {
                    break;
                }
            }
            if wait_for_shutdown(&shutdown, self.config.post_interval) {
                break;
            }
        }
        self.warner.flush(Instant::now(), |count| {
            warn!("historian poster stopping with {count} unreported delivery failures");
        });
        info!(
            "historian poster stopped with {} payloads pending",
            self.queue.len()
        );
        let _ = done_tx.send(());
    }
}

/// Block for up to `timeout`; `true` when shutdown was requested meanwhile.
fn wait_for_shutdown(shutdown: &Receiver<()>, timeout: Duration) -> bool {
    !matches!(shutdown.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
}

impl std::fmt::Debug for PosterWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PosterWorker")
            .field("config", &self.config)
            .field("backpressure", &self.backpressure)
            .finish_non_exhaustive()
    }
}
