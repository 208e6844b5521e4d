//! Connector facade wiring configuration, session, queue and poster.

use std::{collections::BTreeMap, io, sync::Arc};

use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    api::{RequestDispatcher, Transport, TransportError, UreqTransport},
    config::{ConfigError, ConnectorConfig, DeviceIdentity},
    payload::PayloadQueue,
    poster::{Backpressure, DataPoster, PosterConfig, PosterWorker, ShutdownError},
    sample::{Sample, iso8601},
    session::{RefreshOutcome, SessionHandle, SessionManager, SessionPhase},
};

/// Errors surfaced by [`HistorianConnector`] lifecycle calls.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to start poster thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("poster is already running")]
    AlreadyStarted,
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Delivers samples to a historian.
///
/// Producers hand samples to [`submit_samples`](Self::submit_samples) and
/// check [`is_polling_blocked`](Self::is_polling_blocked) before fetching
/// more. [`start`](Self::start) opens the session and spawns the poster;
/// the host calls [`tick`](Self::tick) periodically so the session is kept
/// alive while nothing is being posted.
pub struct HistorianConnector {
    config: ConnectorConfig,
    client_id: String,
    queue: Arc<PayloadQueue>,
    session: Arc<SessionManager>,
    backpressure: Backpressure,
    poster: Mutex<Option<DataPoster>>,
}

impl HistorianConnector {
    /// Connector talking HTTP through a pooled `ureq` agent.
    pub fn new(config: ConnectorConfig, device: &DeviceIdentity) -> Result<Self, ConnectorError> {
        let transport = UreqTransport::new(config.connect_timeout, config.request_timeout)?;
        Self::with_transport(config, device, Arc::new(transport))
    }

    /// Connector using `transport` for every request.
    pub fn with_transport(
        config: ConnectorConfig,
        device: &DeviceIdentity,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConnectorError> {
        config.validate()?;
        let client_id = config.resolve_client_id(device);
        let dispatcher = RequestDispatcher::new(transport, SessionHandle::new())
            .with_duplicate_matcher(config.duplicate_matcher());
        let session = SessionManager::new(dispatcher, config.api_endpoints(&client_id))
            .with_client_timeout(config.client_timeout)
            .with_refresh_threshold(config.refresh_threshold);
        let queue = PayloadQueue::new(config.payload_limits).with_tag_prefix(client_id.as_str());
        Ok(Self {
            client_id,
            queue: Arc::new(queue),
            session: Arc::new(session),
            backpressure: Backpressure::new(),
            poster: Mutex::new(None),
            config,
        })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn queue(&self) -> &Arc<PayloadQueue> {
        &self.queue
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn backpressure(&self) -> &Backpressure {
        &self.backpressure
    }

    /// Whether the producer should hold off polling for new samples.
    pub fn is_polling_blocked(&self) -> bool {
        self.backpressure.is_set()
    }

    /// Open the session and start the poster thread.
    ///
    /// A failed initial handshake is logged and retried by the poster; it
    /// does not prevent start-up.
    pub fn start(&self) -> Result<RefreshOutcome, ConnectorError> {
        if self.is_running() {
            return Err(ConnectorError::AlreadyStarted);
        }
        let outcome = self.session.ensure_fresh_session();
        if let RefreshOutcome::Reacquired(status) = outcome
            && !status.is_good()
        {
            warn!("initial historian session request failed: {status}");
        }
        // Re-checked under the lock: another start may have won the race
        // while the handshake ran unlocked.
        let mut poster = self.poster.lock();
        if poster.as_ref().is_some_and(DataPoster::is_running) {
            return Err(ConnectorError::AlreadyStarted);
        }
        let worker = PosterWorker::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.session),
            self.backpressure.clone(),
            PosterConfig::from(&self.config),
        );
        *poster = Some(DataPoster::spawn(worker).map_err(ConnectorError::Spawn)?);
        info!("historian connector {} started", self.client_id);
        Ok(outcome)
    }

    pub fn is_running(&self) -> bool {
        self.poster
            .lock()
            .as_ref()
            .is_some_and(DataPoster::is_running)
    }

    /// Queue samples, stamping each with `timestamp` when given.
    ///
    /// Returns `true` only if every sample was placed.
    pub fn submit_samples(&self, samples: &[Sample], timestamp: Option<DateTime<Utc>>) -> bool {
        let stamp = timestamp.map(iso8601);
        self.queue.add_samples(samples, stamp.as_deref())
    }

    /// Queue aggregated samples keyed by their bucket timestamp.
    pub fn submit_sample_buckets(&self, buckets: &BTreeMap<DateTime<Utc>, Vec<Sample>>) -> bool {
        self.queue.add_sample_buckets(buckets)
    }

    /// Periodic control tick: keep the session fresh.
    pub fn tick(&self) -> RefreshOutcome {
        self.session.ensure_fresh_session()
    }

    /// Stop the poster and revoke the session.
    ///
    /// A poster that does not stop within the shutdown timeout may still
    /// reacquire tokens, so the session is left to expire instead of being
    /// revoked. The poster stays owned by the connector and a later call
    /// waits for it again.
    pub fn shutdown(&self) -> Result<(), ConnectorError> {
        let stopped = {
            let mut guard = self.poster.lock();
            match guard.take() {
                Some(mut poster) => {
                    let stopped = poster.shutdown(self.config.shutdown_timeout);
                    if let Err(ShutdownError::Timeout(_)) = stopped {
                        *guard = Some(poster);
                    }
                    stopped
                }
                None => Ok(()),
            }
        };
        if let Err(err @ ShutdownError::Timeout(_)) = stopped {
            warn!("historian poster still busy; session left to expire on the historian");
            return Err(err.into());
        }
        if !matches!(
            self.session.session().phase(),
            SessionPhase::NoTokens | SessionPhase::Revoked
        ) {
            self.session.revoke();
        }
        if !self.queue.is_empty() {
            warn!(
                "historian connector stopped with {} undelivered samples",
                self.queue.pending_samples()
            );
        }
        stopped.map_err(ConnectorError::from)
    }
}

impl Drop for HistorianConnector {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("historian connector shutdown: {err}");
        }
    }
}

impl std::fmt::Debug for HistorianConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistorianConnector")
            .field("client_id", &self.client_id)
            .field("queue", &self.queue)
            .field("backpressure", &self.backpressure)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Endpoint;
    use crate::sample::Quality;
    use crate::test_support::{GatedTransport, Reply, ScriptedTransport};
    use chrono::TimeZone;
    use crossbeam_channel::bounded;
    use rstest::{fixture, rstest};
    use std::thread;
    use std::time::{Duration, Instant};

    #[fixture]
    fn transport() -> Arc<ScriptedTransport> {
        let transport = ScriptedTransport::new();
        transport.script(
            Endpoint::GetUserToken,
            [Reply::json(r#"{"userToken":"user-1"}"#)],
        );
        transport.script(
            Endpoint::GetSessionToken,
            [Reply::json(r#"{"sessionToken":"session-1"}"#)],
        );
        transport
    }

    fn config() -> ConnectorConfig {
        ConnectorConfig::builder()
            .with_api_url("http://historian:55235")
            .with_credentials("operator", "secret")
            .with_client_id("%EWONNAME%")
            .with_post_interval(Duration::from_millis(10))
            .build()
            .expect("valid config")
    }

    fn connector(transport: &Arc<ScriptedTransport>) -> HistorianConnector {
        HistorianConnector::with_transport(
            config(),
            &DeviceIdentity::new("1234", "line-3"),
            transport.clone(),
        )
        .expect("connector")
    }

    fn gated_connector(
        gate: &Arc<GatedTransport>,
        config: ConnectorConfig,
    ) -> Arc<HistorianConnector> {
        let connector = HistorianConnector::with_transport(
            config,
            &DeviceIdentity::new("1234", "line-3"),
            gate.clone(),
        )
        .expect("connector");
        Arc::new(connector)
    }

    fn sample(tag: &str, value: f64) -> Sample {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        Sample::at(tag, ts, value, Quality::Good)
    }

    #[rstest]
    fn tags_are_namespaced_by_client_id(transport: Arc<ScriptedTransport>) {
        let connector = connector(&transport);
        assert!(connector.submit_samples(&[sample("Temp", 21.5)], None));

        let wire = connector.queue().pending_wire();
        assert_eq!(connector.client_id(), "line-3");
        assert!(wire[0].get("line-3.Temp").is_some());
    }

    #[rstest]
    fn timestamp_override_is_applied(transport: Arc<ScriptedTransport>) {
        let connector = connector(&transport);
        let bucket = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        connector.submit_samples(&[sample("Temp", 1.0)], Some(bucket));

        let wire = connector.queue().pending_wire();
        assert_eq!(wire[0]["line-3.Temp"][0][0], "2024-03-01T09:00:00.000Z");
    }

    #[rstest]
    fn tick_opens_then_keeps_session(transport: Arc<ScriptedTransport>) {
        let connector = connector(&transport);

        assert!(matches!(connector.tick(), RefreshOutcome::Reacquired(_)));
        assert_eq!(connector.tick(), RefreshOutcome::Fresh);
        assert_eq!(transport.calls_to(Endpoint::GetUserToken), 1);
    }

    #[rstest]
    fn start_delivers_and_shutdown_revokes(transport: Arc<ScriptedTransport>) {
        let connector = connector(&transport);
        connector.submit_samples(&[sample("Temp", 20.0), sample("Flow", 3.0)], None);

        connector.start().expect("start");
        assert!(matches!(connector.start(), Err(ConnectorError::AlreadyStarted)));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !connector.queue().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(connector.queue().is_empty());
        assert!(!connector.is_polling_blocked());

        connector.shutdown().expect("shutdown");
        assert!(!connector.is_running());
        assert_eq!(transport.calls_to(Endpoint::RevokeSessionToken), 1);
        assert_eq!(transport.calls_to(Endpoint::RevokeUserToken), 1);

        connector.shutdown().expect("second shutdown");
        assert_eq!(transport.calls_to(Endpoint::RevokeUserToken), 1);
    }

    #[rstest]
    fn handshake_does_not_block_status_queries(transport: Arc<ScriptedTransport>) {
        let gate = GatedTransport::new(transport, Endpoint::GetUserToken);
        let connector = gated_connector(&gate, config());
        let starter = {
            let connector = Arc::clone(&connector);
            thread::spawn(move || connector.start().map(|_| ()))
        };
        assert!(gate.wait_entered(Duration::from_secs(5)));

        let (tx, rx) = bounded(1);
        let observer = Arc::clone(&connector);
        thread::spawn(move || {
            let _ = tx.send(observer.is_running());
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(false));

        gate.release();
        starter
            .join()
            .expect("start thread panicked")
            .expect("start");
        assert!(connector.is_running());
        connector.shutdown().expect("shutdown");
    }

    #[rstest]
    fn stuck_poster_keeps_session_until_it_stops(transport: Arc<ScriptedTransport>) {
        let gate = GatedTransport::new(transport.clone(), Endpoint::StoreData);
        let config = ConnectorConfig {
            shutdown_timeout: Duration::from_millis(50),
            ..config()
        };
        let connector = gated_connector(&gate, config);
        connector.start().expect("start");
        connector.submit_samples(&[sample("Temp", 20.0)], None);
        assert!(gate.wait_entered(Duration::from_secs(5)));

        let err = connector.shutdown().expect_err("poster is blocked");
        assert!(matches!(
            err,
            ConnectorError::Shutdown(ShutdownError::Timeout(_))
        ));
        assert!(connector.is_running());
        assert_eq!(transport.calls_to(Endpoint::RevokeSessionToken), 0);
        assert_eq!(transport.calls_to(Endpoint::RevokeUserToken), 0);

        gate.release();
        let deadline = Instant::now() + Duration::from_secs(5);
        while connector.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        connector.shutdown().expect("shutdown after release");
        assert!(!connector.is_running());
        assert_eq!(transport.calls_to(Endpoint::RevokeSessionToken), 1);
        assert_eq!(transport.calls_to(Endpoint::RevokeUserToken), 1);
    }

    #[rstest]
    fn invalid_config_is_rejected(transport: Arc<ScriptedTransport>) {
        let config = ConnectorConfig::default();
        let result =
            HistorianConnector::with_transport(config, &DeviceIdentity::default(), transport);
        assert!(matches!(result, Err(ConnectorError::Config(_))));
    }
}
