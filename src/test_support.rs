//! Shared helpers for unit tests.
//!
//! Provides a capturing logger so tests can assert emitted log messages
//! without conflicting with the global logger state, a scripted
//! [`Transport`] standing in for the historian, and a manually advanced
//! clock.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, Once, OnceLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde_json::Value;

use crate::api::{Endpoint, Transport, TransportError};
use crate::session::Clock;

#[derive(Clone, Debug)]
pub(crate) struct CapturedLog {
    pub level: Level,
    pub message: String,
}

struct TestLogger;

static LOGGER: TestLogger = TestLogger;
static INIT: Once = Once::new();
static LOGS: OnceLock<Mutex<Vec<CapturedLog>>> = OnceLock::new();

impl Log for TestLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            let logs = LOGS.get_or_init(|| Mutex::new(Vec::new()));
            let mut guard = logs.lock().expect("logger mutex poisoned");
            guard.push(CapturedLog {
                level: record.level(),
                message: record.args().to_string(),
            });
        }
    }

    fn flush(&self) {}
}

pub(crate) fn install_test_logger() {
    INIT.call_once(|| {
        log::set_logger(&LOGGER).expect("set test logger");
        log::set_max_level(LevelFilter::Trace);
    });
    clear_logs();
}

pub(crate) fn take_logged_messages() -> Vec<CapturedLog> {
    let logs = LOGS.get_or_init(|| Mutex::new(Vec::new()));
    let mut guard = logs.lock().expect("logger mutex poisoned");
    guard.drain(..).collect()
}

pub(crate) fn clear_logs() {
    if let Some(logs) = LOGS.get() {
        logs.lock().expect("logger mutex poisoned").clear();
    }
}

/// Canned answer from [`ScriptedTransport`].
#[derive(Clone, Debug)]
pub(crate) enum Reply {
    Json(String),
    Fail,
}

impl Reply {
    pub(crate) fn json(body: &str) -> Self {
        Self::Json(body.to_owned())
    }

    pub(crate) fn good() -> Self {
        Self::json(r#"{"statusCode":"Good"}"#)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RecordedCall {
    pub endpoint: Endpoint,
    pub url: String,
    pub body: Value,
}

/// Transport answering from per-endpoint scripts.
///
/// Each endpoint pops its script in order and falls back to the default
/// reply once the script runs dry.
#[derive(Debug)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<Endpoint, VecDeque<Reply>>>,
    default: Reply,
    calls: Mutex<Vec<RecordedCall>>,
}

const ENDPOINTS: [Endpoint; 6] = [
    Endpoint::GetUserToken,
    Endpoint::GetSessionToken,
    Endpoint::KeepAlive,
    Endpoint::StoreData,
    Endpoint::RevokeSessionToken,
    Endpoint::RevokeUserToken,
];

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_default(Reply::good())
    }

    pub(crate) fn with_default(default: Reply) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            default,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn script(&self, endpoint: Endpoint, replies: impl IntoIterator<Item = Reply>) {
        self.scripts
            .lock()
            .expect("scripts mutex poisoned")
            .entry(endpoint)
            .or_default()
            .extend(replies);
    }

    pub(crate) fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    pub(crate) fn calls_to(&self, endpoint: Endpoint) -> usize {
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .iter()
            .filter(|call| call.endpoint == endpoint)
            .count()
    }

    pub(crate) fn endpoints_called(&self) -> Vec<Endpoint> {
        self.calls().into_iter().map(|call| call.endpoint).collect()
    }
}

impl Transport for ScriptedTransport {
    fn post(
        &self,
        url: &str,
        _headers: &[(String, String)],
        body: &str,
    ) -> Result<String, TransportError> {
        let endpoint = ENDPOINTS
            .into_iter()
            .find(|endpoint| url.ends_with(endpoint.path()))
            .expect("request to a known endpoint");
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(RecordedCall {
                endpoint,
                url: url.to_owned(),
                body: serde_json::from_str(body).expect("request body is JSON"),
            });
        let reply = self
            .scripts
            .lock()
            .expect("scripts mutex poisoned")
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default.clone());
        match reply {
            Reply::Json(body) => Ok(body),
            Reply::Fail => Err(TransportError::Transport("connection refused".into())),
        }
    }
}

/// Transport that parks the first request to one endpoint until released,
/// then answers from the wrapped [`ScriptedTransport`].
#[derive(Debug)]
pub(crate) struct GatedTransport {
    inner: Arc<ScriptedTransport>,
    endpoint: Endpoint,
    armed: AtomicBool,
    entered_tx: Sender<()>,
    entered_rx: Receiver<()>,
    release_tx: Sender<()>,
    release_rx: Receiver<()>,
}

impl GatedTransport {
    pub(crate) fn new(inner: Arc<ScriptedTransport>, endpoint: Endpoint) -> Arc<Self> {
        let (entered_tx, entered_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        Arc::new(Self {
            inner,
            endpoint,
            armed: AtomicBool::new(true),
            entered_tx,
            entered_rx,
            release_tx,
            release_rx,
        })
    }

    /// Wait until the gated request is parked.
    pub(crate) fn wait_entered(&self, timeout: Duration) -> bool {
        self.entered_rx.recv_timeout(timeout).is_ok()
    }

    pub(crate) fn release(&self) {
        self.release_tx.send(()).expect("gate receiver alive");
    }
}

impl Transport for GatedTransport {
    fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &str,
    ) -> Result<String, TransportError> {
        if url.ends_with(self.endpoint.path()) && self.armed.swap(false, Ordering::SeqCst) {
            self.entered_tx.send(()).expect("gate receiver alive");
            let _ = self.release_rx.recv_timeout(Duration::from_secs(10));
        }
        self.inner.post(url, headers, body)
    }
}

/// Clock that only moves when told to.
#[derive(Clone, Debug)]
pub(crate) struct ManualClock {
    base: Instant,
    offset_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }

    pub(crate) fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).expect("advance fits in u64 millis");
        self.offset_ms.fetch_add(millis, Ordering::SeqCst);
    }

    pub(crate) fn clock(&self) -> Clock {
        let this = self.clone();
        Arc::new(move || this.now())
    }
}
