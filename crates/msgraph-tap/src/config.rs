//! Tap configuration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{GraphError, GraphResult};

/// Request timeout used when the config omits one (or sets a falsy value).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Server page size requested from endpoints that honour `$top`.
pub const DEFAULT_PAGE_SIZE: u32 = 999;

/// Microsoft cloud the tenant lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudEnvironment {
    /// Global Azure.
    #[default]
    Commercial,
    /// Azure US Government (GCC High / DoD).
    UsGovernment,
    /// Azure China (21Vianet).
    China,
    /// Azure Germany.
    Germany,
}

impl CloudEnvironment {
    /// Base URL of the identity platform for this cloud.
    #[must_use]
    pub fn login_endpoint(self) -> &'static str {
        match self {
            Self::Commercial => "https://login.microsoftonline.com",
            Self::UsGovernment => "https://login.microsoftonline.us",
            Self::China => "https://login.chinacloudapi.cn",
            Self::Germany => "https://login.microsoftonline.de",
        }
    }

    /// Base URL of Microsoft Graph for this cloud.
    #[must_use]
    pub fn graph_endpoint(self) -> &'static str {
        match self {
            Self::Commercial => "https://graph.microsoft.com",
            Self::UsGovernment => "https://graph.microsoft.us",
            Self::China => "https://microsoftgraph.chinacloudapi.cn",
            Self::Germany => "https://graph.microsoft.de",
        }
    }
}

/// Resolved base URLs for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEndpoints {
    /// Identity platform base, e.g. `https://login.microsoftonline.com`.
    pub login: String,
    /// Graph resource base, e.g. `https://graph.microsoft.com`.
    pub graph: String,
    /// API version segment, e.g. `v1.0`.
    pub api_version: String,
}

impl GraphEndpoints {
    /// Token endpoint for a tenant.
    #[must_use]
    pub fn token_url(&self, tenant_id: &str) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.login, tenant_id)
    }

    /// Versioned base URL that resource paths are appended to.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}/{}", self.graph, self.api_version)
    }

    /// Scope requested in the client-credentials grant.
    #[must_use]
    pub fn scope(&self) -> String {
        format!("{}/.default", self.graph)
    }
}

/// Configuration read from the tap's config file.
#[derive(Debug, Deserialize)]
pub struct TapConfig {
    /// Azure AD tenant (directory) id.
    pub tenant_id: String,
    /// Application (client) id.
    pub client_id: String,
    /// Client secret for the app registration.
    #[serde(deserialize_with = "deserialize_secret")]
    pub client_secret: SecretString,
    /// Lower bound for incremental streams without a bookmark.
    pub start_date: DateTime<Utc>,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout", deserialize_with = "deserialize_timeout")]
    pub request_timeout: Duration,
    /// Cloud the tenant is hosted in.
    #[serde(default)]
    pub cloud: CloudEnvironment,
    /// Graph API version segment.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Overrides the cloud's login endpoint.
    #[serde(default)]
    pub login_url: Option<String>,
    /// Overrides the cloud's Graph endpoint.
    #[serde(default)]
    pub graph_url: Option<String>,
    /// `$top` for streams that support server-side paging control.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Keep syncing remaining streams after one fails.
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
    /// User-Agent header sent with every request.
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_api_version() -> String {
    "v1.0".to_string()
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_continue_on_error() -> bool {
    true
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

/// Accepts a number or numeric string; anything falsy means the default.
fn deserialize_timeout<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let secs = match Value::deserialize(deserializer)? {
        Value::Null | Value::Bool(false) => None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(
            s.trim()
                .parse::<f64>()
                .map_err(|_| D::Error::custom(format!("invalid request_timeout: {s}")))?,
        ),
        other => {
            return Err(D::Error::custom(format!(
                "invalid request_timeout: {other}"
            )))
        }
    };

    match secs {
        Some(secs) if secs.is_finite() && secs > 0.0 => Duration::try_from_secs_f64(secs)
            .map_err(|_| D::Error::custom(format!("invalid request_timeout: {secs}"))),
        _ => Ok(DEFAULT_REQUEST_TIMEOUT),
    }
}

impl TapConfig {
    /// Starts a builder, mostly useful in tests and embedding code.
    #[must_use]
    pub fn builder() -> TapConfigBuilder {
        TapConfigBuilder::default()
    }

    /// Parses and validates a JSON config document.
    pub fn from_json(raw: &str) -> GraphResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks required fields.
    pub fn validate(&self) -> GraphResult<()> {
        use secrecy::ExposeSecret;

        if self.tenant_id.trim().is_empty() {
            return Err(GraphError::Config("tenant_id is required".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(GraphError::Config("client_id is required".into()));
        }
        if self.client_secret.expose_secret().is_empty() {
            return Err(GraphError::Config("client_secret is required".into()));
        }
        if self.page_size == 0 {
            return Err(GraphError::Config("page_size must be > 0".into()));
        }
        for endpoint in [&self.login_url, &self.graph_url].into_iter().flatten() {
            url::Url::parse(endpoint)?;
        }
        Ok(())
    }

    /// Resolves the base URLs, applying overrides over the cloud defaults.
    #[must_use]
    pub fn endpoints(&self) -> GraphEndpoints {
        GraphEndpoints {
            login: self
                .login_url
                .clone()
                .unwrap_or_else(|| self.cloud.login_endpoint().to_string())
                .trim_end_matches('/')
                .to_string(),
            graph: self
                .graph_url
                .clone()
                .unwrap_or_else(|| self.cloud.graph_endpoint().to_string())
                .trim_end_matches('/')
                .to_string(),
            api_version: self.api_version.clone(),
        }
    }
}

/// Builder for [`TapConfig`].
#[derive(Debug, Default)]
pub struct TapConfigBuilder {
    tenant_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    start_date: Option<DateTime<Utc>>,
    request_timeout: Option<Duration>,
    cloud: CloudEnvironment,
    login_url: Option<String>,
    graph_url: Option<String>,
    page_size: Option<u32>,
    continue_on_error: Option<bool>,
}

impl TapConfigBuilder {
    #[must_use]
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    #[must_use]
    pub fn start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = Some(start_date);
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn cloud(mut self, cloud: CloudEnvironment) -> Self {
        self.cloud = cloud;
        self
    }

    /// Points both login and Graph traffic at one base URL (mock servers).
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.login_url = Some(url.clone());
        self.graph_url = Some(url);
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = Some(continue_on_error);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> GraphResult<TapConfig> {
        let config = TapConfig {
            tenant_id: self
                .tenant_id
                .ok_or_else(|| GraphError::Config("tenant_id is required".into()))?,
            client_id: self
                .client_id
                .ok_or_else(|| GraphError::Config("client_id is required".into()))?,
            client_secret: SecretString::from(
                self.client_secret
                    .ok_or_else(|| GraphError::Config("client_secret is required".into()))?,
            ),
            start_date: self
                .start_date
                .ok_or_else(|| GraphError::Config("start_date is required".into()))?,
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            cloud: self.cloud,
            api_version: default_api_version(),
            login_url: self.login_url,
            graph_url: self.graph_url,
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            continue_on_error: self.continue_on_error.unwrap_or(true),
            user_agent: None,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(extra: &str) -> String {
        format!(
            r#"{{"tenant_id":"t","client_id":"c","client_secret":"s","start_date":"2022-01-01T00:00:00Z"{extra}}}"#
        )
    }

    #[test]
    fn test_defaults() {
        let config = TapConfig::from_json(&base("")).unwrap();
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.cloud, CloudEnvironment::Commercial);
        assert_eq!(config.page_size, 999);
        assert!(config.continue_on_error);
        assert_eq!(
            config.endpoints().base_url(),
            "https://graph.microsoft.com/v1.0"
        );
        assert_eq!(
            config.endpoints().token_url("t"),
            "https://login.microsoftonline.com/t/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_request_timeout_variants() {
        let cases = [
            (r#","request_timeout":100"#, Duration::from_secs(100)),
            (r#","request_timeout":"45""#, Duration::from_secs(45)),
            (r#","request_timeout":0"#, DEFAULT_REQUEST_TIMEOUT),
            (r#","request_timeout":"""#, DEFAULT_REQUEST_TIMEOUT),
            (r#","request_timeout":null"#, DEFAULT_REQUEST_TIMEOUT),
            (r#","request_timeout":"0""#, DEFAULT_REQUEST_TIMEOUT),
        ];
        for (extra, expected) in cases {
            let config = TapConfig::from_json(&base(extra)).unwrap();
            assert_eq!(config.request_timeout, expected, "case {extra}");
        }
    }

    #[test]
    fn test_request_timeout_garbage_rejected() {
        assert!(TapConfig::from_json(&base(r#","request_timeout":"soon""#)).is_err());
    }

    #[test]
    fn test_oversized_request_timeout_rejected() {
        for extra in [r#","request_timeout":1e30"#, r#","request_timeout":"1e30""#] {
            let err = TapConfig::from_json(&base(extra)).unwrap_err();
            assert!(matches!(err, GraphError::Json(_)), "case {extra}");
        }
    }

    #[test]
    fn test_missing_secret_rejected() {
        let raw = r#"{"tenant_id":"t","client_id":"c","client_secret":"","start_date":"2022-01-01T00:00:00Z"}"#;
        assert!(matches!(
            TapConfig::from_json(raw),
            Err(GraphError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_endpoint_override_rejected() {
        assert!(matches!(
            TapConfig::from_json(&base(r#","graph_url":"not a url""#)),
            Err(GraphError::Url(_))
        ));
    }

    #[test]
    fn test_sovereign_cloud_endpoints() {
        let config = TapConfig::from_json(&base(r#","cloud":"us_government""#)).unwrap();
        let endpoints = config.endpoints();
        assert_eq!(endpoints.graph, "https://graph.microsoft.us");
        assert_eq!(endpoints.scope(), "https://graph.microsoft.us/.default");
    }

    #[test]
    fn test_builder_base_url_override() {
        let config = TapConfig::builder()
            .tenant_id("t")
            .client_id("c")
            .client_secret("s")
            .start_date(Utc::now())
            .base_url("http://127.0.0.1:9999/")
            .build()
            .unwrap();
        let endpoints = config.endpoints();
        assert_eq!(endpoints.base_url(), "http://127.0.0.1:9999/v1.0");
        assert_eq!(
            endpoints.token_url("t"),
            "http://127.0.0.1:9999/t/oauth2/v2.0/token"
        );
    }
}
