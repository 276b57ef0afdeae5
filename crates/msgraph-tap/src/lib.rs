//! Microsoft Graph extraction tap
//!
//! This crate extracts directory, collaboration and audit resources from the
//! Microsoft Graph API and emits them as Singer `SCHEMA`, `RECORD` and `STATE`
//! messages, keeping bookmarks so later runs continue where the last one
//! stopped.
//!
//! # Features
//!
//! - `OAuth2` client credentials authentication with token refresh
//! - Exponential backoff for throttling and transient server errors
//! - Full-table and incremental (delta) streams
//! - Parent/child streams (group members, team channels, drive items, ...)
//! - Multi-cloud support (Commercial, US Government, China, Germany)
//!
//! # Example
//!
//! ```no_run
//! use msgraph_tap::{catalog, sync, JsonLinesSink, TapConfig, TapState};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TapConfig::from_json(&std::fs::read_to_string("config.json")?)?;
//! let catalog = catalog::discover().with_all_selected();
//! let mut state = TapState::default();
//! let mut sink = JsonLinesSink::stdout();
//!
//! let summary = sync::sync(&config, &catalog, &mut state, &mut sink).await?;
//! println!("{} records", summary.total_records());
//! # Ok(())
//! # }
//! ```

mod auth;
pub mod catalog;
mod config;
mod error;
mod graph_client;
pub mod retry;
mod sink;
mod state;
pub mod streams;
pub mod sync;

// Re-exports
pub use auth::{AccessToken, Credentials};
pub use catalog::Catalog;
pub use config::{
    CloudEnvironment, GraphEndpoints, TapConfig, TapConfigBuilder, DEFAULT_PAGE_SIZE,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use error::{
    classify, parse_retry_after, ApiErrorKind, GraphError, GraphResult, TransportErrorKind,
};
pub use graph_client::{form_headers, GraphClient, GraphRequest, RequestBody};
pub use retry::{RetryDecision, RetryPolicy};
pub use sink::{JsonLinesSink, MemorySink, Message, Sink};
pub use state::TapState;
pub use sync::{StreamFailure, SyncRunner, SyncSummary};
