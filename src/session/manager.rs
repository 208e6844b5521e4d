//! The two-token handshake and its refresh policy.

use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;

use super::state::{Clock, SessionHandle, system_clock};
use crate::api::{ApiEndpoints, ApiRequest, RequestDispatcher, RequestError, ResponseStatus};

/// Default client timeout negotiated with the historian.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default window before expiry in which a keep-alive is sent.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_millis(8000);

/// What [`SessionManager::ensure_fresh_session`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The session had enough validity left; nothing was sent.
    Fresh,
    /// A keep-alive was sent.
    KeptAlive(ResponseStatus),
    /// New user and session tokens were requested.
    Reacquired(ResponseStatus),
}

/// Owns the session against the historian.
///
/// Refreshes are serialized: if the poster and the control tick both decide
/// to refresh, the second caller waits and then re-evaluates the (by then
/// fresh) expiration.
pub struct SessionManager {
    session: SessionHandle,
    dispatcher: RequestDispatcher,
    endpoints: ApiEndpoints,
    client_timeout: Duration,
    refresh_threshold: Duration,
    clock: Clock,
    refresh_lock: Mutex<()>,
}

impl SessionManager {
    /// The session managed is the one `dispatcher` writes tokens into.
    pub fn new(dispatcher: RequestDispatcher, endpoints: ApiEndpoints) -> Self {
        Self {
            session: dispatcher.session().clone(),
            dispatcher,
            endpoints,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            clock: system_clock(),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    pub fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }

    pub fn client_timeout(&self) -> Duration {
        self.client_timeout
    }

    pub fn user_token(&self) -> Option<String> {
        self.session.user_token()
    }

    pub fn session_token(&self) -> Option<String> {
        self.session.session_token()
    }

    /// Remaining session validity, `None` once expired.
    pub fn time_to_expire(&self) -> Option<Duration> {
        self.session.time_to_expire((self.clock)())
    }

    /// Reacquire when expired, keep alive when close to expiry, otherwise do
    /// nothing.
    pub fn ensure_fresh_session(&self) -> RefreshOutcome {
        let _refresh = self.refresh_lock.lock();
        match self.time_to_expire() {
            None => RefreshOutcome::Reacquired(self.reacquire()),
            Some(remaining) if remaining < self.refresh_threshold => {
                RefreshOutcome::KeptAlive(self.keep_alive())
            }
            Some(_) => RefreshOutcome::Fresh,
        }
    }

    /// React to a [`ResponseStatus::BadTokens`] response: drop the
    /// expiration and refresh before anything else is sent.
    pub fn handle_bad_tokens(&self) -> RefreshOutcome {
        debug!("historian rejected the session tokens; reacquiring");
        self.session.invalidate();
        self.ensure_fresh_session()
    }

    /// Slide the expiration to now plus the client timeout.
    pub fn note_successful_exchange(&self) {
        self.session.set_expiration((self.clock)() + self.client_timeout);
    }

    /// Best-effort revocation of the session token and then the user token.
    pub fn revoke(&self) {
        let _refresh = self.refresh_lock.lock();
        let tokens = self.session.tokens();
        if tokens.session_token.is_some() {
            let status = self.exchange(self.endpoints.revoke_session_token(&tokens), false);
            if !status.is_good() {
                warn!("failed to revoke historian session token: {status}");
            }
        }
        if tokens.user_token.is_some() {
            let status = self.exchange(
                self.endpoints.revoke_user_token(tokens.user_token.as_deref()),
                false,
            );
            if !status.is_good() {
                warn!("failed to revoke historian user token: {status}");
            }
        }
        self.session.mark_revoked();
        info!("historian session revoked");
    }

    /// `storeData` request carrying the current tokens.
    pub fn store_data_request(&self, tvqs: &Value) -> Result<ApiRequest, RequestError> {
        self.endpoints.store_data(&self.session.tokens(), tvqs)
    }

    fn exchange(&self, request: Result<ApiRequest, RequestError>, retry: bool) -> ResponseStatus {
        match request {
            Ok(mut request) if retry => self.dispatcher.send_with_retry(&mut request),
            Ok(mut request) => self.dispatcher.send(&mut request),
            Err(err) => {
                error!("{err}");
                ResponseStatus::Error
            }
        }
    }

    fn keep_alive(&self) -> ResponseStatus {
        let status = self.exchange(self.endpoints.keep_alive(&self.session.tokens()), true);
        match status {
            ResponseStatus::Good => self.note_successful_exchange(),
            ResponseStatus::BadTokens => {
                self.session.invalidate();
                return self.reacquire();
            }
            other => warn!("historian keep-alive failed: {other}"),
        }
        status
    }

    fn reacquire(&self) -> ResponseStatus {
        let status = self.exchange(self.endpoints.get_user_token(), true);
        if !status.is_good() {
            warn!("failed to acquire historian user token: {status}");
            return status;
        }
        let user_token = self.session.user_token();
        let status = self.exchange(
            self.endpoints.get_session_token(user_token.as_deref()),
            true,
        );
        if status.is_good() {
            self.note_successful_exchange();
            info!("historian session established");
        } else {
            warn!("failed to acquire historian session token: {status}");
        }
        status
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("endpoints", &self.endpoints)
            .field("client_timeout", &self.client_timeout)
            .field("refresh_threshold", &self.refresh_threshold)
            .finish_non_exhaustive()
    }
}
