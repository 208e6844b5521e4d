//! FIFO of payloads shared between the sample producer and the poster.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use super::batch::{Payload, PayloadLimits};
use crate::sample::{Sample, iso8601};

/// Wire form of the head payload as handed to the poster.
#[derive(Clone, Debug, PartialEq)]
pub struct PayloadSnapshot {
    /// `tvqs` object for the `storeData` request.
    pub tvqs: Value,
    pub sample_count: usize,
    /// Failed delivery attempts recorded against this payload so far.
    pub failed_attempts: u32,
}

/// Ordered collection of pending payloads.
///
/// Producers place samples with [`add_sample`](Self::add_sample) and
/// friends; the poster reads the head with
/// [`peek_next_payload`](Self::peek_next_payload) and drops it with
/// [`remove_next_payload`](Self::remove_next_payload) once acknowledged.
/// Peeking seals the head so later samples go to another payload.
#[derive(Debug)]
pub struct PayloadQueue {
    limits: PayloadLimits,
    tag_prefix: Option<String>,
    pending: Mutex<VecDeque<Payload>>,
}

impl PayloadQueue {
    /// Queue with `limits` applied to every payload; `Some(0)` disables a
    /// limit.
    pub fn new(limits: PayloadLimits) -> Self {
        Self {
            limits: limits.normalized(),
            tag_prefix: None,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Namespace every tag as `"{prefix}.{tag}"` on the wire.
    pub fn with_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tag_prefix = Some(prefix.into());
        self
    }

    pub fn limits(&self) -> PayloadLimits {
        self.limits
    }

    fn wire_tag(&self, tag: &str) -> String {
        match &self.tag_prefix {
            Some(prefix) => format!("{prefix}.{tag}"),
            None => tag.to_owned(),
        }
    }

    fn place(
        &self,
        pending: &mut VecDeque<Payload>,
        sample: &Sample,
        timestamp_override: Option<&str>,
    ) -> bool {
        let tag = self.wire_tag(sample.tag());
        if let Some(payload) = pending.iter_mut().find(|p| p.can_accept(&tag)) {
            return payload.try_add(&tag, sample, timestamp_override);
        }
        let mut payload = Payload::new(self.limits);
        let added = payload.try_add(&tag, sample, timestamp_override);
        if added {
            pending.push_back(payload);
        }
        added
    }

    /// Place one sample into the first payload with room for it, opening a
    /// new payload at the tail when none has.
    pub fn add_sample(&self, sample: &Sample) -> bool {
        let mut pending = self.pending.lock();
        self.place(&mut pending, sample, None)
    }

    /// Place every sample, applying `timestamp_override` to each when given.
    ///
    /// Returns `true` only if every sample was placed.
    pub fn add_samples<'a, I>(&self, samples: I, timestamp_override: Option<&str>) -> bool
    where
        I: IntoIterator<Item = &'a Sample>,
    {
        let mut pending = self.pending.lock();
        samples.into_iter().fold(true, |all_added, sample| {
            self.place(&mut pending, sample, timestamp_override) && all_added
        })
    }

    /// Place pre-aggregated samples, stamping each bucket's samples with the
    /// bucket timestamp.
    pub fn add_sample_buckets(&self, buckets: &BTreeMap<DateTime<Utc>, Vec<Sample>>) -> bool {
        buckets.iter().fold(true, |all_added, (timestamp, samples)| {
            let stamp = iso8601(*timestamp);
            self.add_samples(samples, Some(&stamp)) && all_added
        })
    }

    /// Wire form of the head payload, or `None` when nothing is pending.
    ///
    /// The head stays queued and is sealed against further samples.
    pub fn peek_next_payload(&self) -> Option<PayloadSnapshot> {
        let mut pending = self.pending.lock();
        let head = pending.front_mut()?;
        head.seal();
        Some(PayloadSnapshot {
            tvqs: head.to_wire(),
            sample_count: head.sample_count(),
            failed_attempts: head.failed_attempts(),
        })
    }

    /// Drop the head payload. Returns `false` when the queue is empty.
    pub fn remove_next_payload(&self) -> bool {
        self.pending.lock().pop_front().is_some()
    }

    /// Count a failed delivery of the head payload; returns the new total.
    pub fn record_failed_attempt(&self) -> Option<u32> {
        self.pending
            .lock()
            .front_mut()
            .map(Payload::record_failed_attempt)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Samples held across all pending payloads.
    pub fn pending_samples(&self) -> usize {
        self.pending.lock().iter().map(Payload::sample_count).sum()
    }

    /// Wire form of every pending payload in queue order, without sealing.
    pub fn pending_wire(&self) -> Vec<Value> {
        self.pending.lock().iter().map(Payload::to_wire).collect()
    }
}

impl Default for PayloadQueue {
    fn default() -> Self {
        Self::new(PayloadLimits::default())
    }
}
