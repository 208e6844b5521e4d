//! Shared token and expiration state.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::api::TokenPair;

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Clock backed by [`Instant::now`].
pub fn system_clock() -> Clock {
    Arc::new(Instant::now)
}

/// Where the handshake currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    NoTokens,
    HasUserToken,
    HasSession,
    Revoked,
}

#[derive(Debug, Default)]
struct Session {
    tokens: TokenPair,
    /// `None` means expired.
    expires_at: Option<Instant>,
    revoked: bool,
}

/// Cloneable handle to the session shared by the poster and the control
/// tick. Every accessor takes the lock for the duration of one read or
/// write, so the token pair is never observed half-updated.
#[derive(Clone, Debug, Default)]
pub struct SessionHandle {
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tokens(&self) -> TokenPair {
        self.inner.lock().tokens.clone()
    }

    pub fn user_token(&self) -> Option<String> {
        self.inner.lock().tokens.user_token.clone()
    }

    pub fn session_token(&self) -> Option<String> {
        self.inner.lock().tokens.session_token.clone()
    }

    pub fn set_user_token(&self, token: impl Into<String>) {
        let mut session = self.inner.lock();
        session.tokens.user_token = Some(token.into());
        session.revoked = false;
    }

    pub fn set_session_token(&self, token: impl Into<String>) {
        let mut session = self.inner.lock();
        session.tokens.session_token = Some(token.into());
        session.revoked = false;
    }

    /// Remaining validity at `now`, or `None` once expired.
    pub fn time_to_expire(&self, now: Instant) -> Option<Duration> {
        self.inner
            .lock()
            .expires_at
            .and_then(|at| at.checked_duration_since(now))
            .filter(|remaining| !remaining.is_zero())
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.inner.lock().expires_at
    }

    pub fn set_expiration(&self, at: Instant) {
        self.inner.lock().expires_at = Some(at);
    }

    /// Treat the session as expired.
    pub fn invalidate(&self) {
        self.inner.lock().expires_at = None;
    }

    /// Forget both tokens and the expiration after revocation.
    pub fn mark_revoked(&self) {
        let mut session = self.inner.lock();
        session.tokens = TokenPair::default();
        session.expires_at = None;
        session.revoked = true;
    }

    pub fn phase(&self) -> SessionPhase {
        let session = self.inner.lock();
        match (&session.tokens.user_token, &session.tokens.session_token) {
            _ if session.revoked => SessionPhase::Revoked,
            (Some(_), Some(_)) => SessionPhase::HasSession,
            (Some(_), None) => SessionPhase::HasUserToken,
            (None, _) => SessionPhase::NoTokens,
        }
    }
}
