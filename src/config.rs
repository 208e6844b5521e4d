//! Connector configuration.
//!
//! [`ConnectorConfig`] is a plain value consumed by the connector. It is
//! produced either through [`ConnectorConfigBuilder`] or from the JSON
//! configuration file:
//!
//! ```json
//! {
//!   "Canary": {
//!     "Api": {
//!       "Url": "https://historian.example:55293/",
//!       "SenderApiVersionNumber": "v1",
//!       "HistorianServerName": "localhost",
//!       "ApiClientId": "%EWONNAME%",
//!       "ApiClientTimeoutSeconds": 60,
//!       "FileSizeMegabytes": 8,
//!       "AutoCreateDatasets": true,
//!       "QueueDataPostRateMillis": 3000
//!     },
//!     "Auth": { "UserName": "operator", "UserPassword": "secret" }
//!   }
//! }
//! ```
//!
//! Both paths run the same validation.

use std::{fs, io, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    api::{
        ApiEndpoints, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, DuplicateSessionMatcher,
        SessionSettings, classifier::DEFAULT_DUPLICATE_SESSION_PATTERN,
    },
    payload::PayloadLimits,
    poster::{DEFAULT_POST_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT},
    rate_limited_warner::DEFAULT_WARN_INTERVAL,
    session::{DEFAULT_CLIENT_TIMEOUT, DEFAULT_REFRESH_THRESHOLD},
};

/// Template key replaced by the device serial number in the client id.
pub const SERIAL_NUMBER_FILLER: &str = "%SERIALNO%";
/// Template key replaced by the device name in the client id.
pub const DEVICE_NAME_FILLER: &str = "%EWONNAME%";

pub const DEFAULT_API_VERSION: &str = "v1";
pub const DEFAULT_HISTORIAN: &str = "localhost";
pub const DEFAULT_FILE_SIZE_MB: u32 = 8;

/// Values shipped in the template configuration file. They mean "not
/// configured yet" and are rejected.
const PLACEHOLDER_API_URL: &str = "https://<USER-DOMAIN>:PORT_NUM/";
const PLACEHOLDER_USERNAME: &str = "<USER-NAME>";
const PLACEHOLDER_PASSWORD: &str = "<USER-PASSWORD>";

/// Errors that may occur while loading or building a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is absent or still holds its template value.
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    /// A setting holds a value the connector cannot use.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The configuration file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The configuration file is not valid JSON of the expected shape.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err(ConfigError::Invalid(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok(())
        }
    }};
}

/// Identity of the device the connector runs on, used for client id
/// templating.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub serial_number: String,
    pub name: String,
}

impl DeviceIdentity {
    pub fn new(serial_number: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            name: name.into(),
        }
    }

    /// Client id used when none is configured.
    pub fn default_client_id(&self) -> String {
        format!("Flexy-{}", self.serial_number)
    }
}

/// Substitute device fillers in `template`, or fall back to
/// [`DeviceIdentity::default_client_id`] when no template is configured.
pub fn resolve_client_id(template: Option<&str>, device: &DeviceIdentity) -> String {
    match template {
        Some(template) => template
            .replace(SERIAL_NUMBER_FILLER, &device.serial_number)
            .replace(DEVICE_NAME_FILLER, &device.name),
        None => device.default_client_id(),
    }
}

/// Validated connector settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Historian server URL, e.g. `https://historian:55293`.
    pub api_url: String,
    /// Sender API version used in request paths.
    pub api_version: String,
    /// Historian the session is opened against.
    pub historian: String,
    /// Client id template; `None` uses the device default.
    pub client_id: Option<String>,
    pub username: String,
    pub password: String,
    /// Session validity after the last successful exchange.
    pub client_timeout: Duration,
    pub file_size_mb: u32,
    pub auto_create_datasets: bool,
    /// Pause between poster cycles.
    pub post_interval: Duration,
    pub payload_limits: PayloadLimits,
    /// Remaining validity below which a keep-alive is sent.
    pub refresh_threshold: Duration,
    /// Failed deliveries after which a payload is discarded; `None` retries
    /// forever.
    pub max_payload_attempts: Option<u32>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub warn_interval: Duration,
    pub shutdown_timeout: Duration,
    /// Error text identifying a duplicate-session rejection.
    pub duplicate_session_pattern: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_version: DEFAULT_API_VERSION.into(),
            historian: DEFAULT_HISTORIAN.into(),
            client_id: None,
            username: String::new(),
            password: String::new(),
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            file_size_mb: DEFAULT_FILE_SIZE_MB,
            auto_create_datasets: true,
            post_interval: DEFAULT_POST_INTERVAL,
            payload_limits: PayloadLimits::default(),
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            max_payload_attempts: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            warn_interval: DEFAULT_WARN_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            duplicate_session_pattern: DEFAULT_DUPLICATE_SESSION_PATTERN.into(),
        }
    }
}

impl ConnectorConfig {
    pub fn builder() -> ConnectorConfigBuilder {
        ConnectorConfigBuilder::new()
    }

    /// Parse and validate the JSON configuration file format.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        file.canary.into_builder().build()
    }

    /// Read, parse and validate the configuration file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_api()?;
        self.validate_credentials()?;
        self.validate_timing()?;
        self.validate_limits()?;
        Ok(())
    }

    fn validate_api(&self) -> Result<(), ConfigError> {
        let url = self.api_url.trim();
        if url.is_empty() || url == PLACEHOLDER_API_URL {
            return Err(ConfigError::Missing("api_url"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "api_url must be an http(s) URL, got {url:?}"
            )));
        }
        if self.api_version.trim().is_empty() {
            return Err(ConfigError::Missing("api_version"));
        }
        if self.historian.trim().is_empty() {
            return Err(ConfigError::Missing("historian"));
        }
        if self.duplicate_session_pattern.is_empty() {
            return Err(ConfigError::Invalid(
                "duplicate_session_pattern must not be empty".into(),
            ));
        }
        Ok(())
    }

    fn validate_credentials(&self) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() || self.username == PLACEHOLDER_USERNAME {
            return Err(ConfigError::Missing("username"));
        }
        if self.password == PLACEHOLDER_PASSWORD {
            return Err(ConfigError::Missing("password"));
        }
        Ok(())
    }

    fn validate_timing(&self) -> Result<(), ConfigError> {
        ensure_positive!(self.client_timeout.as_millis(), "client_timeout")?;
        ensure_positive!(self.post_interval.as_millis(), "post_interval")?;
        ensure_positive!(self.connect_timeout.as_millis(), "connect_timeout")?;
        ensure_positive!(self.request_timeout.as_millis(), "request_timeout")?;
        ensure_positive!(self.shutdown_timeout.as_millis(), "shutdown_timeout")?;
        if self.refresh_threshold >= self.client_timeout {
            return Err(ConfigError::Invalid(format!(
                "refresh_threshold ({:?}) must be shorter than client_timeout ({:?})",
                self.refresh_threshold, self.client_timeout
            )));
        }
        Ok(())
    }

    fn validate_limits(&self) -> Result<(), ConfigError> {
        ensure_positive!(self.file_size_mb, "file_size_mb")?;
        if let Some(max) = self.payload_limits.max_samples {
            ensure_positive!(max, "max_samples")?;
        }
        if let Some(max) = self.payload_limits.max_tags {
            ensure_positive!(max, "max_tags")?;
        }
        if let Some(max) = self.max_payload_attempts {
            ensure_positive!(max, "max_payload_attempts")?;
        }
        Ok(())
    }

    /// Client id for `device`, with fillers substituted.
    pub fn resolve_client_id(&self, device: &DeviceIdentity) -> String {
        resolve_client_id(self.client_id.as_deref(), device)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            client_timeout_ms: u64::try_from(self.client_timeout.as_millis()).unwrap_or(u64::MAX),
            file_size_mb: self.file_size_mb,
            auto_create_datasets: self.auto_create_datasets,
        }
    }

    /// Request builder for this deployment, identifying as `client_id`.
    pub fn api_endpoints(&self, client_id: &str) -> ApiEndpoints {
        ApiEndpoints::new(
            &self.api_url,
            &self.api_version,
            self.username.as_str(),
            self.password.as_str(),
            self.historian.as_str(),
            client_id,
            self.session_settings(),
        )
    }

    pub fn duplicate_matcher(&self) -> DuplicateSessionMatcher {
        DuplicateSessionMatcher::substring(self.duplicate_session_pattern.clone())
    }
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

/// Builder for constructing [`ConnectorConfig`] values.
///
/// Unset fields take their defaults; [`build`](Self::build) validates the
/// result.
#[derive(Clone, Debug, Default)]
pub struct ConnectorConfigBuilder {
    api_url: Option<String>,
    api_version: Option<String>,
    historian: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    client_timeout: Option<Duration>,
    file_size_mb: Option<u32>,
    auto_create_datasets: Option<bool>,
    post_interval: Option<Duration>,
    payload_limits: Option<PayloadLimits>,
    refresh_threshold: Option<Duration>,
    max_payload_attempts: Option<u32>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    warn_interval: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    duplicate_session_pattern: Option<String>,
}

impl ConnectorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn with_historian(mut self, historian: impl Into<String>) -> Self {
        self.historian = Some(historian.into());
        self
    }

    /// Client id template; may contain `%SERIALNO%` and `%EWONNAME%`.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    option_setter!(with_client_timeout, client_timeout, Duration);
    option_setter!(with_file_size_mb, file_size_mb, u32);
    option_setter!(with_auto_create_datasets, auto_create_datasets, bool);
    option_setter!(with_post_interval, post_interval, Duration);
    option_setter!(with_payload_limits, payload_limits, PayloadLimits);
    option_setter!(with_refresh_threshold, refresh_threshold, Duration);
    option_setter!(
        /// Discard a payload after this many failed deliveries.
        with_max_payload_attempts,
        max_payload_attempts,
        u32
    );
    option_setter!(with_connect_timeout, connect_timeout, Duration);
    option_setter!(with_request_timeout, request_timeout, Duration);
    option_setter!(with_warn_interval, warn_interval, Duration);
    option_setter!(with_shutdown_timeout, shutdown_timeout, Duration);

    pub fn with_duplicate_session_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.duplicate_session_pattern = Some(pattern.into());
        self
    }

    pub fn build(self) -> Result<ConnectorConfig, ConfigError> {
        let defaults = ConnectorConfig::default();
        let config = ConnectorConfig {
            api_url: self.api_url.unwrap_or(defaults.api_url),
            api_version: self.api_version.unwrap_or(defaults.api_version),
            historian: self.historian.unwrap_or(defaults.historian),
            client_id: self.client_id.or(defaults.client_id),
            username: self.username.unwrap_or(defaults.username),
            password: self.password.unwrap_or(defaults.password),
            client_timeout: self.client_timeout.unwrap_or(defaults.client_timeout),
            file_size_mb: self.file_size_mb.unwrap_or(defaults.file_size_mb),
            auto_create_datasets: self
                .auto_create_datasets
                .unwrap_or(defaults.auto_create_datasets),
            post_interval: self.post_interval.unwrap_or(defaults.post_interval),
            payload_limits: self.payload_limits.unwrap_or(defaults.payload_limits),
            refresh_threshold: self.refresh_threshold.unwrap_or(defaults.refresh_threshold),
            max_payload_attempts: self.max_payload_attempts.or(defaults.max_payload_attempts),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            warn_interval: self.warn_interval.unwrap_or(defaults.warn_interval),
            shutdown_timeout: self.shutdown_timeout.unwrap_or(defaults.shutdown_timeout),
            duplicate_session_pattern: self
                .duplicate_session_pattern
                .unwrap_or(defaults.duplicate_session_pattern),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConfigFile {
    canary: ConnectorSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ConnectorSection {
    api: ApiSection,
    auth: AuthSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ApiSection {
    url: Option<String>,
    sender_api_version_number: Option<String>,
    historian_server_name: Option<String>,
    api_client_id: Option<String>,
    api_client_timeout_seconds: Option<u64>,
    file_size_megabytes: Option<u32>,
    auto_create_datasets: Option<bool>,
    queue_data_post_rate_millis: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct AuthSection {
    user_name: Option<String>,
    user_password: Option<String>,
}

impl ConnectorSection {
    fn into_builder(self) -> ConnectorConfigBuilder {
        let Self { api, auth } = self;
        ConnectorConfigBuilder {
            api_url: api.url,
            api_version: api.sender_api_version_number,
            historian: api.historian_server_name,
            client_id: api.api_client_id,
            username: auth.user_name,
            password: auth.user_password,
            client_timeout: api.api_client_timeout_seconds.map(Duration::from_secs),
            file_size_mb: api.file_size_megabytes,
            auto_create_datasets: api.auto_create_datasets,
            post_interval: api.queue_data_post_rate_millis.map(Duration::from_millis),
            ..ConnectorConfigBuilder::default()
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
