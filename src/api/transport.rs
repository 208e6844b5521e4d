//! HTTP transport seam.
//!
//! The dispatcher only needs "POST this body, give me the response text".
//! [`UreqTransport`] provides that over a pooled `ureq` agent using the
//! platform TLS stack; tests supply scripted implementations.

use std::{io, sync::Arc, time::Duration};

use log::debug;
use native_tls::TlsConnector;
use thiserror::Error;
use ureq::{Agent, AgentBuilder};

/// Default timeout for establishing a connection to the historian.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default timeout for a complete request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Failures below the level of a historian response.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection, DNS, TLS or protocol failure.
    #[error("HTTP transport failure: {0}")]
    Transport(String),
    /// The response body could not be read.
    #[error("failed to read response body: {0}")]
    Body(#[from] io::Error),
    /// The TLS connector could not be initialised.
    #[error("failed to initialise TLS: {0}")]
    Tls(#[from] native_tls::Error),
}

/// Blocking POST of a JSON body.
pub trait Transport: Send + Sync {
    /// Send `body` to `url` and return the response text.
    ///
    /// Non-2xx responses that carry a body are returned as `Ok`; the
    /// historian reports most failures inside the JSON body.
    fn post(&self, url: &str, headers: &[(String, String)], body: &str)
    -> Result<String, TransportError>;
}

/// [`Transport`] backed by a `ureq::Agent` with connection pooling.
#[derive(Clone, Debug)]
pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, TransportError> {
        let tls = TlsConnector::new()?;
        let agent = AgentBuilder::new()
            .tls_connector(Arc::new(tls))
            .timeout_connect(connect_timeout)
            .timeout(request_timeout)
            .build();
        Ok(Self { agent })
    }

    /// Transport with [`DEFAULT_CONNECT_TIMEOUT`] and
    /// [`DEFAULT_REQUEST_TIMEOUT`].
    pub fn with_default_timeouts() -> Result<Self, TransportError> {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }
}

impl Transport for UreqTransport {
    fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &str,
    ) -> Result<String, TransportError> {
        let mut req = self.agent.post(url);
        for (key, value) in headers {
            req = req.set(key, value);
        }
        match req.send_string(body) {
            Ok(response) => Ok(response.into_string()?),
            Err(ureq::Error::Status(code, response)) => {
                debug!("historian answered {url} with HTTP {code}");
                Ok(response.into_string()?)
            }
            Err(ureq::Error::Transport(err)) => Err(TransportError::Transport(err.to_string())),
        }
    }
}
