//! Sends requests and turns whatever comes back into a [`ResponseStatus`].

use std::sync::Arc;

use log::{debug, error, warn};
use serde_json::Value;

use super::{
    classifier::{DuplicateSessionMatcher, classify},
    request::ApiRequest,
    status::ResponseStatus,
    transport::Transport,
};
use crate::session::SessionHandle;

/// Issues requests through a [`Transport`] and applies token updates from
/// the responses to the shared session.
///
/// Transport failures never escape: they become [`ResponseStatus::Error`].
#[derive(Clone)]
pub struct RequestDispatcher {
    transport: Arc<dyn Transport>,
    session: SessionHandle,
    duplicate: DuplicateSessionMatcher,
}

impl RequestDispatcher {
    pub fn new(transport: Arc<dyn Transport>, session: SessionHandle) -> Self {
        Self {
            transport,
            session,
            duplicate: DuplicateSessionMatcher::default(),
        }
    }

    /// Replace the duplicate-session predicate.
    pub fn with_duplicate_matcher(mut self, duplicate: DuplicateSessionMatcher) -> Self {
        self.duplicate = duplicate;
        self
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Send `request` once.
    ///
    /// On any outcome other than [`ResponseStatus::Good`] the request's fail
    /// counter is incremented and a warning logged; retrying is the caller's
    /// decision.
    pub fn send(&self, request: &mut ApiRequest) -> ResponseStatus {
        let status = match self
            .transport
            .post(request.url(), request.headers(), request.body())
        {
            Ok(body) => self.interpret(request.url(), &body),
            Err(err) => {
                error!("{} request to {} failed: {err}", request.endpoint(), request.url());
                ResponseStatus::Error
            }
        };
        if !status.is_good() {
            let failures = request.increment_fail_count();
            warn!(
                "{} request returned {status} (failure {failures})",
                request.endpoint()
            );
        }
        status
    }

    /// Send `request`, retrying once immediately if the first attempt ended
    /// in [`ResponseStatus::Error`].
    pub fn send_with_retry(&self, request: &mut ApiRequest) -> ResponseStatus {
        match self.send(request) {
            ResponseStatus::Error => {
                debug!("retrying {} request once", request.endpoint());
                self.send(request)
            }
            status => status,
        }
    }

    fn interpret(&self, url: &str, body: &str) -> ResponseStatus {
        if body.trim().is_empty() {
            error!("the request {url} returned an empty response");
            return ResponseStatus::Error;
        }
        let parsed: Value = match serde_json::from_str(body) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!("the request {url} has an improperly formatted response: {err}");
                return ResponseStatus::Error;
            }
        };
        let Some(response) = parsed.as_object() else {
            error!("the request {url} returned a non-object response: {parsed}");
            return ResponseStatus::Error;
        };

        let classification = classify(response, ResponseStatus::Unused, &self.duplicate);
        if let Some(token) = classification.user_token {
            self.session.set_user_token(token);
        }
        if let Some(token) = classification.session_token {
            self.session.set_session_token(token);
        }
        debug!("response from {url} classified as {}", classification.status);
        classification.status
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
