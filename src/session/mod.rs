//! Session lifecycle against the historian.
//!
//! The historian issues a user token for the credentials and then a session
//! token bound to it. A session stays valid for the client timeout after the
//! last successful exchange; [`SessionManager::ensure_fresh_session`] sends a
//! keep-alive once less than the refresh threshold remains and requests new
//! tokens once it has expired.

mod manager;
mod state;

pub use manager::{
    DEFAULT_CLIENT_TIMEOUT, DEFAULT_REFRESH_THRESHOLD, RefreshOutcome, SessionManager,
};
pub use state::{Clock, SessionHandle, SessionPhase, system_clock};
