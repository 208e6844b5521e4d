//! A single bounded batch of TVQs.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::sample::{Sample, Tvq};

/// Default maximum number of samples per payload.
pub const DEFAULT_MAX_SAMPLES: usize = 1000;

/// Per-payload limits. `None` disables a limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadLimits {
    pub max_samples: Option<usize>,
    pub max_tags: Option<usize>,
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Self {
            max_samples: Some(DEFAULT_MAX_SAMPLES),
            max_tags: None,
        }
    }
}

impl PayloadLimits {
    /// Build limits from signed values where zero or a negative number
    /// disables the limit.
    pub fn from_signed(max_samples: i64, max_tags: i64) -> Self {
        let enabled = |limit: i64| usize::try_from(limit).ok().filter(|l| *l > 0);
        Self {
            max_samples: enabled(max_samples),
            max_tags: enabled(max_tags),
        }
    }

    /// Same limits with `Some(0)` treated as disabled, matching
    /// [`from_signed`](Self::from_signed).
    pub fn normalized(self) -> Self {
        Self {
            max_samples: self.max_samples.filter(|max| *max > 0),
            max_tags: self.max_tags.filter(|max| *max > 0),
        }
    }
}

/// TVQs grouped by tag, plus the bookkeeping the batcher and poster need.
#[derive(Debug)]
pub struct Payload {
    limits: PayloadLimits,
    tvqs: BTreeMap<String, Vec<Tvq>>,
    sample_count: usize,
    sealed: bool,
    failed_attempts: u32,
}

impl Payload {
    pub fn new(limits: PayloadLimits) -> Self {
        Self {
            limits: limits.normalized(),
            tvqs: BTreeMap::new(),
            sample_count: 0,
            sealed: false,
            failed_attempts: 0,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn tag_count(&self) -> usize {
        self.tvqs.len()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// TVQs recorded for `tag`, in insertion order.
    pub fn tvqs_for(&self, tag: &str) -> Option<&[Tvq]> {
        self.tvqs.get(tag).map(Vec::as_slice)
    }

    fn is_full(&self) -> bool {
        self.limits
            .max_samples
            .is_some_and(|max| self.sample_count >= max)
    }

    fn accepts_tag(&self, tag: &str) -> bool {
        match self.limits.max_tags {
            Some(max) if self.tvqs.len() >= max => self.tvqs.contains_key(tag),
            _ => true,
        }
    }

    /// Whether a sample for `tag` can be placed in this payload.
    pub fn can_accept(&self, tag: &str) -> bool {
        !self.sealed && !self.is_full() && self.accepts_tag(tag)
    }

    /// Place `sample` under `tag`. Returns `false` without mutating the
    /// payload when the limits or the seal forbid it.
    pub(crate) fn try_add(
        &mut self,
        tag: &str,
        sample: &Sample,
        timestamp_override: Option<&str>,
    ) -> bool {
        if !self.can_accept(tag) {
            return false;
        }
        self.tvqs
            .entry(tag.to_owned())
            .or_default()
            .push(sample.to_tvq(timestamp_override));
        self.sample_count += 1;
        true
    }

    /// Freeze the payload. Called once it has been handed out for
    /// transmission so that the bytes on the wire match what gets removed.
    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    pub(crate) fn record_failed_attempt(&mut self) -> u32 {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.failed_attempts
    }

    /// Wire form: the `tvqs` object of a `storeData` request.
    pub fn to_wire(&self) -> Value {
        // Tvq serialization is infallible: strings, integers and floats only.
        serde_json::to_value(&self.tvqs).unwrap_or(Value::Null)
    }
}
