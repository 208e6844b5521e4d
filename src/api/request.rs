//! Construction of historian API requests.
//!
//! Every body is built from a serde structure; tokens that are not yet known
//! are omitted rather than sent as `null`.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Path segment between the configured URL and the API version.
pub const API_PATH: &str = "api";

/// Headers sent with every request.
pub const DEFAULT_HEADERS: [(&str, &str); 2] = [
    ("Content-Type", "application/json"),
    ("X-Requested-With", "JSONHttpRequest"),
];

/// Historian endpoints used by the connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    GetUserToken,
    GetSessionToken,
    KeepAlive,
    StoreData,
    RevokeSessionToken,
    RevokeUserToken,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Self::GetUserToken => "getUserToken",
            Self::GetSessionToken => "getSessionToken",
            Self::KeepAlive => "keepAlive",
            Self::StoreData => "storeData",
            Self::RevokeSessionToken => "revokeSessionToken",
            Self::RevokeUserToken => "revokeUserToken",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Errors raised while building a request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("failed to encode {endpoint} request body: {source}")]
    Encode {
        endpoint: Endpoint,
        #[source]
        source: serde_json::Error,
    },
}

/// One outbound request plus its failure bookkeeping.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    endpoint: Endpoint,
    url: String,
    headers: Vec<(String, String)>,
    body: String,
    fail_count: u32,
}

impl ApiRequest {
    fn encode(endpoint: Endpoint, base: &str, body: &impl Serialize) -> Result<Self, RequestError> {
        let body =
            serde_json::to_string(body).map_err(|source| RequestError::Encode { endpoint, source })?;
        Ok(Self {
            endpoint,
            url: format!("{base}{}", endpoint.path()),
            headers: DEFAULT_HEADERS
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            body,
            fail_count: 0,
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Unsuccessful sends or parses recorded against this request.
    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    pub(crate) fn increment_fail_count(&mut self) -> u32 {
        self.fail_count = self.fail_count.saturating_add(1);
        self.fail_count
    }
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionSettingsBody {
    client_timeout: u64,
    file_size: u32,
    auto_create_datasets: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionTokenBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    user_token: Option<&'a str>,
    historians: [&'a str; 1],
    client_id: &'a str,
    settings: SessionSettingsBody,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    user_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_token: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoreDataBody<'a> {
    #[serde(flatten)]
    tokens: TokenBody<'a>,
    tvqs: &'a Value,
}

/// Token pair read atomically from the session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenPair {
    pub user_token: Option<String>,
    pub session_token: Option<String>,
}

impl TokenPair {
    fn body(&self) -> TokenBody<'_> {
        TokenBody {
            user_token: self.user_token.as_deref(),
            session_token: self.session_token.as_deref(),
        }
    }
}

/// Session settings negotiated in `getSessionToken`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub client_timeout_ms: u64,
    pub file_size_mb: u32,
    pub auto_create_datasets: bool,
}

/// Builds requests against one historian deployment.
#[derive(Clone, Debug)]
pub struct ApiEndpoints {
    base: String,
    username: String,
    password: String,
    historian: String,
    client_id: String,
    settings: SessionSettings,
}

impl ApiEndpoints {
    /// `api_url` is the configured server URL; requests go to
    /// `{api_url}/api/{version}/{endpoint}`.
    pub fn new(
        api_url: &str,
        version: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        historian: impl Into<String>,
        client_id: impl Into<String>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            base: api_base(api_url, version),
            username: username.into(),
            password: password.into(),
            historian: historian.into(),
            client_id: client_id.into(),
            settings,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn get_user_token(&self) -> Result<ApiRequest, RequestError> {
        let body = Credentials {
            username: &self.username,
            password: &self.password,
        };
        ApiRequest::encode(Endpoint::GetUserToken, &self.base, &body)
    }

    pub fn get_session_token(&self, user_token: Option<&str>) -> Result<ApiRequest, RequestError> {
        let body = SessionTokenBody {
            user_token,
            historians: [self.historian.as_str()],
            client_id: &self.client_id,
            settings: SessionSettingsBody {
                client_timeout: self.settings.client_timeout_ms,
                file_size: self.settings.file_size_mb,
                auto_create_datasets: self.settings.auto_create_datasets,
            },
        };
        ApiRequest::encode(Endpoint::GetSessionToken, &self.base, &body)
    }

    pub fn keep_alive(&self, tokens: &TokenPair) -> Result<ApiRequest, RequestError> {
        ApiRequest::encode(Endpoint::KeepAlive, &self.base, &tokens.body())
    }

    pub fn store_data(&self, tokens: &TokenPair, tvqs: &Value) -> Result<ApiRequest, RequestError> {
        let body = StoreDataBody {
            tokens: tokens.body(),
            tvqs,
        };
        ApiRequest::encode(Endpoint::StoreData, &self.base, &body)
    }

    pub fn revoke_session_token(&self, tokens: &TokenPair) -> Result<ApiRequest, RequestError> {
        ApiRequest::encode(Endpoint::RevokeSessionToken, &self.base, &tokens.body())
    }

    pub fn revoke_user_token(&self, user_token: Option<&str>) -> Result<ApiRequest, RequestError> {
        let body = TokenBody {
            user_token,
            session_token: None,
        };
        ApiRequest::encode(Endpoint::RevokeUserToken, &self.base, &body)
    }
}

fn api_base(api_url: &str, version: &str) -> String {
    format!("{}/{API_PATH}/{version}/", api_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use serde_json::json;

    #[fixture]
    fn endpoints() -> ApiEndpoints {
        ApiEndpoints::new(
            "https://historian.local:55293/",
            "v1",
            "operator",
            "p\"ss",
            "localhost",
            "Flexy-1234",
            SessionSettings {
                client_timeout_ms: 60_000,
                file_size_mb: 8,
                auto_create_datasets: true,
            },
        )
    }

    fn body(request: &ApiRequest) -> Value {
        serde_json::from_str(request.body()).expect("request body is JSON")
    }

    #[rstest]
    #[case("https://h:1", "https://h:1/api/v1/")]
    #[case("https://h:1/", "https://h:1/api/v1/")]
    fn base_url_joins_version(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(api_base(url, "v1"), expected);
    }

    #[rstest]
    fn user_token_request_escapes_credentials(endpoints: ApiEndpoints) {
        let request = endpoints.get_user_token().expect("encode");
        assert_eq!(
            request.url(),
            "https://historian.local:55293/api/v1/getUserToken"
        );
        assert_eq!(body(&request), json!({"username": "operator", "password": "p\"ss"}));
        assert!(
            request
                .headers()
                .contains(&("Content-Type".into(), "application/json".into()))
        );
        assert!(
            request
                .headers()
                .contains(&("X-Requested-With".into(), "JSONHttpRequest".into()))
        );
    }

    #[rstest]
    fn session_token_request_carries_settings(endpoints: ApiEndpoints) {
        let request = endpoints.get_session_token(Some("user-1")).expect("encode");
        assert_eq!(
            body(&request),
            json!({
                "userToken": "user-1",
                "historians": ["localhost"],
                "clientId": "Flexy-1234",
                "settings": {
                    "clientTimeout": 60000,
                    "fileSize": 8,
                    "autoCreateDatasets": true,
                },
            })
        );
    }

    #[rstest]
    fn missing_tokens_are_omitted(endpoints: ApiEndpoints) {
        let tokens = TokenPair {
            user_token: Some("u".into()),
            session_token: None,
        };
        let request = endpoints.keep_alive(&tokens).expect("encode");
        assert_eq!(body(&request), json!({"userToken": "u"}));
    }

    #[rstest]
    fn store_data_nests_tvqs(endpoints: ApiEndpoints) {
        let tokens = TokenPair {
            user_token: Some("u".into()),
            session_token: Some("s".into()),
        };
        let tvqs = json!({"T1": [["2024-01-01T00:00:00.000Z", 1, 192]]});
        let request = endpoints.store_data(&tokens, &tvqs).expect("encode");
        assert_eq!(request.endpoint(), Endpoint::StoreData);
        assert_eq!(
            body(&request),
            json!({"userToken": "u", "sessionToken": "s", "tvqs": tvqs})
        );
    }

    #[rstest]
    fn revoke_user_token_sends_only_user_token(endpoints: ApiEndpoints) {
        let request = endpoints.revoke_user_token(Some("u")).expect("encode");
        assert!(request.url().ends_with("/revokeUserToken"));
        assert_eq!(body(&request), json!({"userToken": "u"}));
    }

    #[rstest]
    fn fail_count_starts_at_zero(endpoints: ApiEndpoints) {
        let mut request = endpoints.get_user_token().expect("encode");
        assert_eq!(request.fail_count(), 0);
        assert_eq!(request.increment_fail_count(), 1);
        assert_eq!(request.fail_count(), 1);
    }
}
