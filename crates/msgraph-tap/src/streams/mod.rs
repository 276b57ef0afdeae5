//! Stream definitions and per-stream behaviour.
//!
//! Every Graph resource the tap extracts is described by a static
//! [`StreamDefinition`]. Resource quirks (parent endpoints, fixed filters,
//! page sizes, delta endpoints) are plain data on the definition; the
//! runtime [`Stream`] interprets them.

mod bookmark;
mod definitions;
mod stream;

use serde::{Deserialize, Serialize};

pub use bookmark::{compare_replication_values, Bookmark, BookmarkCache};
pub use definitions::{children_of, find_definition, registry};
pub use stream::Stream;

/// How a stream is replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMethod {
    /// Every run re-reads the whole collection.
    FullTable,
    /// Runs continue from the stored bookmark.
    Incremental,
}

impl ReplicationMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullTable => "FULL_TABLE",
            Self::Incremental => "INCREMENTAL",
        }
    }
}

/// `$top` handling for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    /// Endpoint rejects `$top`.
    Unsupported,
    /// Use the configured page size.
    Configured,
    /// Endpoint caps `$top` at this value.
    Fixed(u32),
}

/// Link from a child stream to the stream whose records drive it.
#[derive(Debug)]
pub struct ParentLink {
    /// `tap_stream_id` of the parent.
    pub stream: &'static str,
    /// Path placeholder, also injected into each child record.
    pub foreign_key: &'static str,
    /// Parent record field substituted into the path.
    pub parent_field: &'static str,
}

/// Static description of one extractable resource.
#[derive(Debug)]
pub struct StreamDefinition {
    pub tap_stream_id: &'static str,
    pub key_properties: &'static [&'static str],
    pub replication_method: ReplicationMethod,
    pub replication_keys: &'static [&'static str],
    /// Path relative to the versioned base URL; may contain `{placeholder}`.
    pub path: &'static str,
    /// Response field holding the records.
    pub data_key: &'static str,
    /// Query parameters sent on the first page.
    pub params: &'static [(&'static str, &'static str)],
    pub page_size: PageSize,
    /// Whether `path` is a `/delta` endpoint returning `@odata.deltaLink`.
    pub delta: bool,
    pub parent: Option<ParentLink>,
}

impl StreamDefinition {
    /// First replication key, if the stream is incremental.
    #[must_use]
    pub fn replication_key(&self) -> Option<&'static str> {
        match self.replication_method {
            ReplicationMethod::Incremental => self.replication_keys.first().copied(),
            ReplicationMethod::FullTable => None,
        }
    }

    #[must_use]
    pub fn parent_stream(&self) -> Option<&'static str> {
        self.parent.as_ref().map(|p| p.stream)
    }
}
