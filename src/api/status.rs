//! Outcome of a single historian request.

use std::fmt;

/// Status string reported by the historian for a successful request.
pub const STATUS_GOOD: &str = "Good";
/// Status string reported when the user token is no longer valid.
pub const STATUS_BAD_USER_TOKEN: &str = "BadUserToken";
/// Status string reported when the session token is no longer valid.
pub const STATUS_BAD_SESSION_ID: &str = "BadSessionId";

/// Classified result of a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    /// The request succeeded.
    Good,
    /// The user or session token was rejected; the session must be
    /// reacquired.
    BadTokens,
    /// Transport failure or unreadable response.
    Error,
    /// The historian reported that the tags are already being logged by
    /// another session; wait for that session to expire.
    ErrorWaitForExpire,
    /// The response carried errors that match no known condition.
    UnknownError,
    /// The response carried a status code outside the known vocabulary.
    UnknownStatus,
    /// No response has been interpreted yet.
    #[default]
    Unused,
}

impl ResponseStatus {
    /// Map a `statusCode` string from a response.
    pub fn from_status_code(code: &str) -> Self {
        match code {
            STATUS_GOOD => Self::Good,
            STATUS_BAD_USER_TOKEN | STATUS_BAD_SESSION_ID => Self::BadTokens,
            _ => Self::UnknownStatus,
        }
    }

    pub fn is_good(self) -> bool {
        matches!(self, Self::Good)
    }

    /// Whether an earlier classification step already failed the response.
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Good | Self::Unused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "GOOD",
            Self::BadTokens => "BAD_TOKENS",
            Self::Error => "ERROR",
            Self::ErrorWaitForExpire => "ERROR_WAIT_FOR_EXPIRE",
            Self::UnknownError => "UNKNOWN_ERROR",
            Self::UnknownStatus => "UNKNOWN_STATUS",
            Self::Unused => "UNUSED",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
