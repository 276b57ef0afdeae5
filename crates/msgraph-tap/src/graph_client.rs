//! Microsoft Graph API HTTP client with token lifecycle and retry handling.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::auth::{AccessToken, Credentials, TokenCache};
use crate::error::classify;
use crate::retry::{millis, retry_counted, RetryDecision, RetryPolicy};
use crate::{ApiErrorKind, GraphEndpoints, GraphError, GraphResult, TapConfig};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Refresh tokens this many seconds before they actually expire, or halfway
/// through the lifetime of shorter tokens.
const TOKEN_EXPIRY_SKEW_SECS: i64 = 30;

/// Request payload.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Sent as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
    /// Sent as JSON unless the headers ask for a form encoding.
    Json(Value),
}

/// One logical request; retried attempts re-send it unchanged.
#[derive(Debug, Clone)]
pub struct GraphRequest {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    /// False only for the token request itself.
    pub authenticated: bool,
}

impl GraphRequest {
    /// A request with no parameters, headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            authenticated: true,
        }
    }

    #[must_use]
    pub fn params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    fn wants_form(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(FORM_CONTENT_TYPE))
    }
}

/// Microsoft Graph API client.
///
/// Owns the HTTP session and the access token. Created with [`GraphClient::connect`],
/// which authenticates immediately; the token is discarded when the client is
/// closed or dropped.
#[derive(Debug)]
pub struct GraphClient {
    http_client: reqwest::Client,
    credentials: Credentials,
    endpoints: GraphEndpoints,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    token_cache: TokenCache,
}

impl GraphClient {
    /// Creates a client without contacting the network.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &TapConfig) -> GraphResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let http_client = builder
            .build()
            .map_err(|e| GraphError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            credentials: Credentials::from_config(config),
            endpoints: config.endpoints(),
            request_timeout: config.request_timeout,
            retry_policy: RetryPolicy::default(),
            token_cache: TokenCache::new(chrono::Duration::seconds(TOKEN_EXPIRY_SKEW_SECS)),
        })
    }

    /// Opens a session: builds the client and fetches the first token.
    pub async fn connect(config: &TapConfig) -> GraphResult<Self> {
        let client = Self::new(config)?;
        client.authenticate_session().await?;
        Ok(client)
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Returns the versioned base URL for Graph API requests.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.endpoints.base_url()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Expiry of the current token, if one is held.
    pub async fn token_expires_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.token_cache.expires_at().await
    }

    /// Acquires a new access token using the client-credentials flow.
    #[instrument(skip(self), fields(tenant_id = %self.credentials.tenant_id))]
    pub async fn authenticate_session(&self) -> GraphResult<()> {
        self.refresh_token().await.map(|_| ())
    }

    async fn refresh_token(&self) -> GraphResult<String> {
        info!("Requesting new access token from Microsoft Graph");

        let request = GraphRequest::new(
            Method::POST,
            self.endpoints.token_url(&self.credentials.tenant_id),
        )
        .body(RequestBody::Form(
            self.credentials.grant_form(&self.endpoints.scope()),
        ))
        .unauthenticated();

        // The grant carries its own credentials, so it bypasses `dispatch`.
        let body = self.send_with_retry(&request, None).await?;
        let token = AccessToken::from_response(body)?;

        info!(
            expires_at = %token.expires_at().format("%Y-%m-%d %H:%M:%S UTC"),
            "Received new access token"
        );
        Ok(self.token_cache.store(token).await)
    }

    /// Gets a valid access token, refreshing if necessary.
    async fn bearer_token(&self) -> GraphResult<String> {
        if let Some(token) = self.token_cache.valid_token().await {
            return Ok(token);
        }
        debug!("Access token missing or expired");
        self.refresh_token().await
    }

    /// Sends a request with token injection, classification and retry.
    pub async fn dispatch(&self, request: GraphRequest) -> GraphResult<Value> {
        let bearer = if request.authenticated {
            Some(self.bearer_token().await?)
        } else {
            None
        };

        let result = self.send_with_retry(&request, bearer.as_deref()).await;

        if let Err(GraphError::Api {
            kind: ApiErrorKind::Unauthorized,
            ..
        }) = &result
        {
            if request.authenticated {
                self.token_cache.invalidate().await;
            }
        }
        result
    }

    /// Performs a GET request.
    #[instrument(skip(self, params))]
    pub async fn get(&self, url: &str, params: &[(String, String)]) -> GraphResult<Value> {
        self.dispatch(GraphRequest::new(Method::GET, url).params(params.to_vec()))
            .await
    }

    /// Performs a POST request with a JSON body.
    #[instrument(skip(self, params, body))]
    pub async fn post(
        &self,
        url: &str,
        params: &[(String, String)],
        body: Value,
    ) -> GraphResult<Value> {
        self.dispatch(
            GraphRequest::new(Method::POST, url)
                .params(params.to_vec())
                .body(RequestBody::Json(body)),
        )
        .await
    }

    async fn send_with_retry(
        &self,
        request: &GraphRequest,
        bearer: Option<&str>,
    ) -> GraphResult<Value> {
        retry_counted(&self.retry_policy, decide, move || self.send_once(request, bearer))
            .await
            .map_err(|(err, attempts)| err.with_attempts(attempts))
    }

    async fn send_once(&self, request: &GraphRequest, bearer: Option<&str>) -> GraphResult<Value> {
        let mut builder = self
            .http_client
            .request(request.method.clone(), &request.url)
            .timeout(self.request_timeout)
            .headers(request.headers.clone());

        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            Some(RequestBody::Form(pairs)) => builder.form(pairs),
            Some(RequestBody::Json(value)) if request.wants_form() => {
                builder.form(&json_to_pairs(value))
            }
            Some(RequestBody::Json(value)) => builder.json(value),
            None => builder,
        };

        let started = Instant::now();
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await?;

        debug!(
            method = %request.method,
            url = %request.url,
            status = status.as_u16(),
            elapsed_ms = millis(started.elapsed()),
            "HTTP request completed"
        );

        let parsed = if bytes.is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_slice::<Value>(&bytes)
        };

        classify(status, parsed.as_ref().unwrap_or(&Value::Null), &headers)?;
        Ok(parsed?)
    }

    /// Ends the session and discards the token.
    pub async fn close(self) {
        self.token_cache.invalidate().await;
        debug!("Graph session closed");
    }
}

impl Drop for GraphClient {
    fn drop(&mut self) {
        self.token_cache.try_invalidate();
    }
}

fn decide(err: &GraphError) -> RetryDecision {
    if !err.is_backoff_eligible() {
        return RetryDecision::Stop;
    }
    let not_before = match err {
        GraphError::Api {
            retry_after_secs: Some(secs),
            ..
        } => Some(Duration::from_secs(*secs)),
        _ => None,
    };
    RetryDecision::Retry { not_before }
}

fn json_to_pairs(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Header map asking for a form-encoded body.
#[must_use]
pub fn form_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
    headers
}
