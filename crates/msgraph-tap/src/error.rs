//! Error types for the Graph tap.
//!
//! Every non-success HTTP response is classified into exactly one
//! [`ApiErrorKind`]; transport failures are tagged with a
//! [`TransportErrorKind`]. Both carry enough information for the retry
//! combinator to decide whether another attempt is worthwhile.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Result type alias using `GraphError`.
pub type GraphResult<T> = Result<T, GraphError>;

/// Classified failure kind of a Graph API response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// 400
    BadRequest,
    /// 401
    Unauthorized,
    /// 403
    Forbidden,
    /// 404
    NotFound,
    /// 409
    Conflict,
    /// 422
    UnprocessableEntity,
    /// 429
    RateLimited,
    /// 500
    InternalServerError,
    /// 501
    NotImplemented,
    /// 502
    BadGateway,
    /// 503
    ServiceUnavailable,
    /// Any other non-success status.
    Unknown,
}

impl ApiErrorKind {
    /// Maps an HTTP status code onto its error kind.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            422 => Self::UnprocessableEntity,
            429 => Self::RateLimited,
            500 => Self::InternalServerError,
            501 => Self::NotImplemented,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            _ => Self::Unknown,
        }
    }

    /// Whether a response of this kind should be retried with backoff.
    #[must_use]
    pub fn is_backoff_eligible(self) -> bool {
        matches!(
            self,
            Self::UnprocessableEntity
                | Self::RateLimited
                | Self::InternalServerError
                | Self::NotImplemented
                | Self::BadGateway
                | Self::ServiceUnavailable
        )
    }

    /// Fallback message used when the response body carries no detail.
    #[must_use]
    pub fn default_message(self) -> &'static str {
        match self {
            Self::BadRequest => "A validation exception has occurred.",
            Self::Unauthorized => {
                "The access token provided is expired, revoked, malformed or invalid for other reasons."
            }
            Self::Forbidden => "You are missing the following required scopes: read",
            Self::NotFound => "The resource you have specified cannot be found.",
            Self::Conflict => {
                "The API request cannot be completed because the requested operation would conflict with an existing item."
            }
            Self::UnprocessableEntity => {
                "The request content itself is not processable by the server."
            }
            Self::RateLimited => {
                "The API rate limit for your organisation/application pairing has been exceeded."
            }
            Self::InternalServerError => {
                "The server encountered an unexpected condition which prevented it from fulfilling the request."
            }
            Self::NotImplemented => {
                "The server does not support the functionality required to fulfill the request."
            }
            Self::BadGateway => "Server received an invalid response.",
            Self::ServiceUnavailable => "API service is currently unavailable.",
            Self::Unknown => "Unknown Error",
        }
    }

    /// Short label used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::UnprocessableEntity => "unprocessable_entity",
            Self::RateLimited => "rate_limited",
            Self::InternalServerError => "internal_server_error",
            Self::NotImplemented => "not_implemented",
            Self::BadGateway => "bad_gateway",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Unknown => "unknown",
        }
    }
}

/// Kind of a transport-level failure (no usable HTTP response).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The peer reset the connection.
    ConnectionReset,
    /// Could not connect.
    Connection,
    /// The response body was cut off while streaming.
    ChunkedEncoding,
    /// The request timed out.
    Timeout,
    /// Anything else reqwest reports (builder errors, redirects, ...).
    Other,
}

impl TransportErrorKind {
    /// Classifies a reqwest error.
    #[must_use]
    pub fn of(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if is_connection_reset(err) {
            return Self::ConnectionReset;
        }
        if err.is_connect() {
            return Self::Connection;
        }
        if err.is_body() || err.is_decode() {
            return Self::ChunkedEncoding;
        }
        if err.is_request() {
            return Self::Connection;
        }
        Self::Other
    }

    /// Transient transport failures are always retried.
    #[must_use]
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::Other)
    }

    /// Short label used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionReset => "connection_reset",
            Self::Connection => "connection",
            Self::ChunkedEncoding => "chunked_encoding",
            Self::Timeout => "timeout",
            Self::Other => "transport",
        }
    }
}

fn is_connection_reset(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionReset {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

/// Errors that can occur while extracting from Microsoft Graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Classified non-success HTTP response.
    #[error("{message}")]
    Api {
        kind: ApiErrorKind,
        status: u16,
        message: String,
        /// Seconds from the `Retry-After` header (429 only).
        retry_after_secs: Option<u64>,
        /// Requests sent before giving up.
        attempts: u32,
    },

    /// The request never produced a response.
    #[error("HTTP transport error ({}): {source}", .kind.as_str())]
    Transport {
        kind: TransportErrorKind,
        #[source]
        source: reqwest::Error,
        /// Requests sent before giving up.
        attempts: u32,
    },

    /// Token endpoint answered but the grant could not be used.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Invalid configuration or stream wiring.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A child stream was asked for its endpoint without a usable parent record.
    #[error("Stream '{stream}' requires a parent record with field '{field}'")]
    MissingParent { stream: String, field: String },

    /// Stream id not present in the registry.
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Writing to the sink failed.
    #[error("Sink error: {0}")]
    Sink(#[from] std::io::Error),
}

impl GraphError {
    /// Whether the retry combinator should try again after this error.
    #[must_use]
    pub fn is_backoff_eligible(&self) -> bool {
        match self {
            Self::Api { kind, .. } => kind.is_backoff_eligible(),
            Self::Transport { kind, .. } => kind.is_transient(),
            _ => false,
        }
    }

    /// The API error kind, if this is a classified HTTP failure.
    #[must_use]
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Self::Api { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Requests sent before this error surfaced; zero when no request failed.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Api { attempts, .. } | Self::Transport { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// Records how many requests the retry loop spent on this error.
    #[must_use]
    pub fn with_attempts(mut self, used: u32) -> Self {
        if let Self::Api { attempts, .. } | Self::Transport { attempts, .. } = &mut self {
            *attempts = used;
        }
        self
    }

    /// Label naming the classified kind, for structured logs.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Api { kind, .. } => kind.as_str(),
            Self::Transport { kind, .. } => kind.as_str(),
            Self::Auth(_) => "auth",
            Self::Config(_) | Self::MissingParent { .. } | Self::UnknownStream(_) => "config",
            Self::Json(_) => "json",
            Self::Url(_) => "url",
            Self::Sink(_) => "sink",
        }
    }
}

impl From<reqwest::Error> for GraphError {
    fn from(source: reqwest::Error) -> Self {
        Self::Transport {
            kind: TransportErrorKind::of(&source),
            source,
            attempts: 1,
        }
    }
}

/// Classifies a response outcome.
///
/// 200, 201 and 204 are success; every other status becomes a
/// [`GraphError::Api`]. `body` is the parsed JSON body, or `Value::Null` when
/// the body was empty or not JSON.
pub fn classify(status: StatusCode, body: &Value, headers: &HeaderMap) -> GraphResult<()> {
    let code = status.as_u16();
    if matches!(code, 200 | 201 | 204) {
        return Ok(());
    }

    let kind = ApiErrorKind::from_status(code);
    let detail = error_detail(body).unwrap_or_else(|| kind.default_message().to_string());
    let mut message = format!("HTTP-error-code: {code}, Error: {detail}");

    let mut retry_after_secs = None;
    if kind == ApiErrorKind::RateLimited {
        retry_after_secs = parse_retry_after(headers);
        match retry_after_secs {
            Some(secs) => message.push_str(&format!(" (Retry after {secs} seconds.)")),
            None => message.push_str(" (Retry after unknown delay.)"),
        }
    }

    Err(GraphError::Api {
        kind,
        status: code,
        message,
        retry_after_secs,
        attempts: 1,
    })
}

/// Reads `Retry-After` as whole seconds. HTTP-date values are not supported.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn error_detail(body: &Value) -> Option<String> {
    match body.get("error") {
        Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
        Some(Value::Object(obj)) => {
            let code = obj.get("code").and_then(Value::as_str);
            let msg = obj.get("message").and_then(Value::as_str);
            return Some(match (code, msg) {
                (Some(code), Some(msg)) => format!("{code}: {msg}"),
                (None, Some(msg)) => msg.to_string(),
                (Some(code), None) => code.to_string(),
                (None, None) => Value::Object(obj.clone()).to_string(),
            });
        }
        Some(Value::Null) | None => {}
        Some(other) => return Some(other.to_string()),
    }

    body.get("message")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
