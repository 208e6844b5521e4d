use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How often repeated delivery warnings are emitted by default.
pub const DEFAULT_WARN_INTERVAL: Duration = Duration::from_secs(30);

/// Helper that rate limits repeated warnings.
///
/// The caller increments the event counter via [`record`]. The next call to
/// [`warn_if_due`] emits a warning using the provided callback if the
/// configured interval has elapsed since the last one. [`flush`] emits a
/// warning immediately if any events have been recorded since the last
/// emission.
///
/// [`record`]: RateLimitedWarner::record
/// [`warn_if_due`]: RateLimitedWarner::warn_if_due
/// [`flush`]: RateLimitedWarner::flush
#[derive(Debug)]
pub struct RateLimitedWarner {
    origin: Instant,
    interval: Duration,
    /// Milliseconds after `origin` of the last emitted warning.
    last_warn_ms: AtomicU64,
    warned: AtomicBool,
    count: AtomicU64,
}

impl RateLimitedWarner {
    /// Create a new [`RateLimitedWarner`]. The first warning can be emitted
    /// immediately.
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            interval,
            last_warn_ms: AtomicU64::new(0),
            warned: AtomicBool::new(false),
            count: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Increment the event counter.
    pub fn record(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Events recorded since the last emitted warning.
    pub fn pending(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Emit a warning if the rate limit interval has elapsed at `now`.
    pub fn warn_if_due(&self, now: Instant, mut warn: impl FnMut(u64)) {
        let now_ms = self.millis_since_origin(now);
        let prev = self.last_warn_ms.load(Ordering::Relaxed);
        let due = !self.warned.load(Ordering::Relaxed)
            || Duration::from_millis(now_ms.saturating_sub(prev)) >= self.interval;
        if due {
            let count = self.count.swap(0, Ordering::Relaxed);
            if count > 0 {
                warn(count);
                self.last_warn_ms.store(now_ms, Ordering::Relaxed);
                self.warned.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Immediately warn about any recorded events.
    pub fn flush(&self, now: Instant, mut warn: impl FnMut(u64)) {
        let count = self.count.swap(0, Ordering::Relaxed);
        if count > 0 {
            warn(count);
            self.last_warn_ms
                .store(self.millis_since_origin(now), Ordering::Relaxed);
            self.warned.store(true, Ordering::Relaxed);
        }
    }

    /// Forget recorded events without warning, e.g. once deliveries recover.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    fn millis_since_origin(&self, now: Instant) -> u64 {
        u64::try_from(now.saturating_duration_since(self.origin).as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for RateLimitedWarner {
    fn default() -> Self {
        Self::new(DEFAULT_WARN_INTERVAL)
    }
}
