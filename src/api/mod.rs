//! Historian HTTP API: request construction, transport, response
//! classification and dispatch.
//!
//! # Status vocabulary
//!
//! | Response                                  | Status                   |
//! |-------------------------------------------|--------------------------|
//! | `statusCode: "Good"`                      | `Good`                   |
//! | `statusCode: "BadUserToken"/"BadSessionId"` | `BadTokens`            |
//! | any other `statusCode`                    | `UnknownStatus`          |
//! | `errors` containing the duplicate pattern | `ErrorWaitForExpire`     |
//! | any other non-empty `errors`              | `UnknownError`           |
//! | transport failure, unreadable body        | `Error`                  |
//!
//! Errors take priority over the status code. A `userToken` or
//! `sessionToken` marks an otherwise unfailed response as `Good`.

pub mod classifier;
mod dispatcher;
mod request;
mod status;
mod transport;

pub use classifier::{Classification, DuplicateSessionMatcher, ErrorGroup, classify};
pub use dispatcher::RequestDispatcher;
pub use request::{
    API_PATH, ApiEndpoints, ApiRequest, DEFAULT_HEADERS, Endpoint, RequestError, SessionSettings,
    TokenPair,
};
pub use status::ResponseStatus;
pub use transport::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, Transport, TransportError, UreqTransport,
};
