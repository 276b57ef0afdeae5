//! OAuth2 client-credentials token handling for Microsoft Graph.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{GraphError, GraphResult, TapConfig};

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// App registration credentials.
#[derive(Debug)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
}

impl Credentials {
    /// Copies the credentials out of a config.
    #[must_use]
    pub fn from_config(config: &TapConfig) -> Self {
        Self {
            tenant_id: config.tenant_id.clone(),
            client_id: config.client_id.clone(),
            client_secret: SecretString::from(config.client_secret.expose_secret().to_owned()),
        }
    }

    /// Form body of the client-credentials grant.
    pub(crate) fn grant_form(&self, scope: &str) -> Vec<(String, String)> {
        vec![
            ("client_id".to_string(), self.client_id.clone()),
            (
                "client_secret".to_string(),
                self.client_secret.expose_secret().to_owned(),
            ),
            ("scope".to_string(), scope.to_string()),
            ("grant_type".to_string(), "client_credentials".to_string()),
        ]
    }
}

/// OAuth2 token response from the identity platform.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Some proxies send this as a string.
    #[serde(default)]
    expires_in: Option<Value>,
}

impl TokenResponse {
    fn expires_in_secs(&self) -> i64 {
        match &self.expires_in {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
    }
}

/// Bearer token with its expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
    /// Validity granted by the token endpoint.
    lifetime: Duration,
}

impl AccessToken {
    /// Parses a token endpoint body, stamping expiry relative to now.
    pub fn from_response(body: Value) -> GraphResult<Self> {
        let response: TokenResponse = serde_json::from_value(body)
            .map_err(|e| GraphError::Auth(format!("Failed to parse token response: {e}")))?;
        let expires_in = response.expires_in_secs();
        if expires_in < 0 {
            return Err(GraphError::Auth(format!(
                "Token endpoint returned negative expires_in: {expires_in}"
            )));
        }
        let lifetime = Duration::try_seconds(expires_in)
            .ok_or_else(|| GraphError::Auth(format!("expires_in out of range: {expires_in}")))?;
        let expires_at = Utc::now()
            .checked_add_signed(lifetime)
            .ok_or_else(|| GraphError::Auth(format!("expires_in out of range: {expires_in}")))?;
        Ok(Self {
            value: response.access_token,
            expires_at,
            lifetime,
        })
    }

    /// The bearer value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// When the token stops being accepted.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns true if the token is expired or will expire within `skew`.
    #[must_use]
    pub fn is_expired(&self, skew: Duration) -> bool {
        Utc::now() + skew >= self.expires_at
    }
}

/// Holds the current token for one client session.
#[derive(Debug)]
pub(crate) struct TokenCache {
    token: RwLock<Option<AccessToken>>,
    /// Refresh this long before the real expiry.
    skew: Duration,
}

impl TokenCache {
    pub(crate) fn new(skew: Duration) -> Self {
        Self {
            token: RwLock::new(None),
            skew,
        }
    }

    /// Early-refresh margin for `token`; never more than half its lifetime.
    fn skew_for(&self, token: &AccessToken) -> Duration {
        self.skew.min(token.lifetime / 2)
    }

    /// The cached bearer value, if still valid.
    pub(crate) async fn valid_token(&self) -> Option<String> {
        let cache = self.token.read().await;
        match cache.as_ref() {
            Some(token) if !token.is_expired(self.skew_for(token)) => {
                debug!("Using cached token");
                Some(token.value.clone())
            }
            _ => None,
        }
    }

    pub(crate) async fn store(&self, token: AccessToken) -> String {
        let value = token.value.clone();
        *self.token.write().await = Some(token);
        value
    }

    pub(crate) async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.token.read().await.as_ref().map(|t| t.expires_at)
    }

    /// Drops the token; the next request authenticates again.
    pub(crate) async fn invalidate(&self) {
        *self.token.write().await = None;
    }

    /// Non-async variant for `Drop`.
    pub(crate) fn try_invalidate(&self) {
        if let Ok(mut guard) = self.token.try_write() {
            *guard = None;
        }
    }
}
