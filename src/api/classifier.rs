//! Interpretation of historian JSON responses.
//!
//! A response may carry any combination of a `statusCode`, an `errors`
//! array, a `userToken` and a `sessionToken`. [`classify`] folds them into a
//! single [`ResponseStatus`] and reports the tokens to adopt.

use std::{fmt, sync::Arc};

use log::{error, info, warn};
use serde_json::{Map, Value};

use super::status::ResponseStatus;

pub const STATUS_CODE_FIELD: &str = "statusCode";
pub const ERRORS_FIELD: &str = "errors";
pub const USER_TOKEN_FIELD: &str = "userToken";
pub const SESSION_TOKEN_FIELD: &str = "sessionToken";

/// Fragment of the error the historian reports while another session still
/// owns the tags being written.
pub const DEFAULT_DUPLICATE_SESSION_PATTERN: &str = "already being logged";

type Predicate = dyn Fn(&str) -> bool + Send + Sync;

/// Recognises the transient "tag is already being logged" error.
///
/// The message is server-defined, so the test is replaceable.
#[derive(Clone)]
pub struct DuplicateSessionMatcher {
    predicate: Arc<Predicate>,
}

impl DuplicateSessionMatcher {
    pub fn new(predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Match messages containing `pattern`.
    pub fn substring(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        Self::new(move |message| message.contains(&pattern))
    }

    pub fn matches(&self, message: &str) -> bool {
        (self.predicate)(message)
    }
}

impl Default for DuplicateSessionMatcher {
    fn default() -> Self {
        Self::substring(DEFAULT_DUPLICATE_SESSION_PATTERN)
    }
}

impl fmt::Debug for DuplicateSessionMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplicateSessionMatcher").finish_non_exhaustive()
    }
}

/// A run of identical consecutive error messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorGroup {
    pub message: String,
    pub count: usize,
}

impl fmt::Display for ErrorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count > 1 {
            write!(f, "{} ({} times)", self.message, self.count)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// Collapse consecutive duplicates. Non-adjacent repeats stay separate.
pub fn group_consecutive<'a>(messages: impl IntoIterator<Item = &'a str>) -> Vec<ErrorGroup> {
    let mut groups: Vec<ErrorGroup> = Vec::new();
    for message in messages {
        match groups.last_mut() {
            Some(last) if last.message == message => last.count += 1,
            _ => groups.push(ErrorGroup {
                message: message.to_owned(),
                count: 1,
            }),
        }
    }
    groups
}

/// Result of interpreting one response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    pub status: ResponseStatus,
    pub user_token: Option<String>,
    pub session_token: Option<String>,
    pub errors: Vec<ErrorGroup>,
}

fn error_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn token(response: &Map<String, Value>, field: &str) -> Option<String> {
    match response.get(field)? {
        Value::String(s) => Some(s.clone()),
        other => {
            warn!("ignoring non-string {field} in historian response: {other}");
            None
        }
    }
}

/// Fold a response into a status, starting from `status`.
///
/// Steps, in order: map `statusCode`; let any `errors` override it
/// ([`ResponseStatus::ErrorWaitForExpire`] when one matches `duplicate`,
/// [`ResponseStatus::UnknownError`] otherwise); adopt `userToken` and
/// `sessionToken`, each of which marks the response good unless an earlier
/// step failed it. Each group of identical consecutive errors is logged once.
pub fn classify(
    response: &Map<String, Value>,
    status: ResponseStatus,
    duplicate: &DuplicateSessionMatcher,
) -> Classification {
    let mut status = match response.get(STATUS_CODE_FIELD) {
        Some(Value::String(code)) => ResponseStatus::from_status_code(code),
        Some(other) => {
            warn!("unrecognised {STATUS_CODE_FIELD} in historian response: {other}");
            ResponseStatus::UnknownStatus
        }
        None => status,
    };

    let messages: Vec<String> = response
        .get(ERRORS_FIELD)
        .and_then(Value::as_array)
        .map(|errors| errors.iter().map(error_text).collect())
        .unwrap_or_default();
    let errors = group_consecutive(messages.iter().map(String::as_str));
    if !errors.is_empty() {
        info!("historian reported {} errors", messages.len());
        for group in &errors {
            error!("Historian API error: {group}");
        }
        status = if errors.iter().any(|g| duplicate.matches(&g.message)) {
            ResponseStatus::ErrorWaitForExpire
        } else {
            ResponseStatus::UnknownError
        };
    }

    let user_token = token(response, USER_TOKEN_FIELD);
    let session_token = token(response, SESSION_TOKEN_FIELD);
    if (user_token.is_some() || session_token.is_some()) && !status.is_failure() {
        status = ResponseStatus::Good;
    }

    Classification {
        status,
        user_token,
        session_token,
        errors,
    }
}
