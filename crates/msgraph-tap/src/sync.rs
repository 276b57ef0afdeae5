//! Sync orchestration.
//!
//! Selected streams are arranged in a forest: each top-level stream is a root
//! and children hang off their parent. Unselected ancestors of selected
//! children are fetched to drive the children but never emitted. Roots run
//! one after another; state is emitted after each root.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::{schema_for, Catalog};
use crate::streams::{
    children_of, compare_replication_values, find_definition, registry, Bookmark,
    BookmarkCache, Stream, StreamDefinition,
};
use crate::{GraphClient, GraphResult, Sink, TapConfig, TapState};

/// A stream that failed during a run.
#[derive(Debug, Clone)]
pub struct StreamFailure {
    /// Root stream whose sync failed.
    pub stream: String,
    pub kind: &'static str,
    pub message: String,
    /// Requests spent on the failing call; zero for non-HTTP failures.
    pub attempts: u32,
}

/// Outcome of a run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Records emitted per stream.
    pub record_counts: BTreeMap<String, u64>,
    pub failures: Vec<StreamFailure>,
}

impl SyncSummary {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn records_for(&self, stream: &str) -> u64 {
        self.record_counts.get(stream).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.record_counts.values().sum()
    }

    fn count(&mut self, stream: &str) {
        *self.record_counts.entry(stream.to_string()).or_insert(0) += 1;
    }
}

/// One stream in the traversal forest.
#[derive(Debug)]
struct SyncNode {
    stream: Stream,
    /// False for ancestors fetched only to drive selected children.
    emit: bool,
    children: Vec<SyncNode>,
}

impl SyncNode {
    fn build(
        definition: &'static StreamDefinition,
        needed: &HashSet<&'static str>,
        selected: &HashSet<&'static str>,
        base_url: &str,
        page_size: u32,
    ) -> Self {
        Self {
            stream: Stream::new(definition, base_url, page_size),
            emit: selected.contains(definition.tap_stream_id),
            children: children_of(definition.tap_stream_id)
                .filter(|child| needed.contains(child.tap_stream_id))
                .map(|child| Self::build(child, needed, selected, base_url, page_size))
                .collect(),
        }
    }
}

/// Runs a sync against one client.
#[derive(Debug)]
pub struct SyncRunner<'a> {
    client: &'a GraphClient,
    start_date: DateTime<Utc>,
    page_size: u32,
    continue_on_error: bool,
}

impl<'a> SyncRunner<'a> {
    #[must_use]
    pub fn new(client: &'a GraphClient, config: &TapConfig) -> Self {
        Self {
            client,
            start_date: config.start_date,
            page_size: config.page_size,
            continue_on_error: config.continue_on_error,
        }
    }

    /// Arranges `selected` (plus unselected ancestors) into roots in sync order.
    fn plan(&self, selected: &[&'static StreamDefinition]) -> Vec<SyncNode> {
        let selected_ids: HashSet<&'static str> =
            selected.iter().map(|d| d.tap_stream_id).collect();

        let mut needed = selected_ids.clone();
        for definition in selected {
            let mut current = *definition;
            while let Some(parent) = current
                .parent_stream()
                .and_then(find_definition)
            {
                needed.insert(parent.tap_stream_id);
                current = parent;
            }
        }

        let base_url = self.client.base_url();
        registry()
            .iter()
            .filter(|d| d.parent.is_none() && needed.contains(d.tap_stream_id))
            .map(|d| SyncNode::build(d, &needed, &selected_ids, &base_url, self.page_size))
            .collect()
    }

    /// Syncs every stream selected in `catalog`.
    ///
    /// Returns an error only when a stream fails and `continue_on_error` is
    /// off; otherwise failures are reported in the summary.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        catalog: &Catalog,
        state: &mut TapState,
        sink: &mut dyn Sink,
    ) -> GraphResult<SyncSummary> {
        let selected = catalog.selected_definitions()?;
        let mut summary = SyncSummary::default();

        if selected.is_empty() {
            warn!("No streams selected");
            return Ok(summary);
        }

        for definition in &selected {
            let schema = catalog
                .entry(definition.tap_stream_id)
                .map(|entry| entry.schema.clone())
                .unwrap_or_else(|| schema_for(definition));
            sink.emit_schema(
                definition.tap_stream_id,
                &schema,
                definition.key_properties,
                definition.replication_keys,
            )?;
        }

        let mut roots = self.plan(&selected);
        if let Some(resume) = state.currently_syncing.clone() {
            if let Some(pos) = roots
                .iter()
                .position(|r| r.stream.tap_stream_id() == resume)
            {
                info!(stream = %resume, "Resuming interrupted sync");
                let root = roots.remove(pos);
                roots.insert(0, root);
            }
        }

        for root in &roots {
            let stream_id = root.stream.tap_stream_id();
            info!(stream = stream_id, "Starting stream sync");
            state.set_currently_syncing(Some(stream_id));

            let mut cache = BookmarkCache::new();
            let result = self
                .sync_node(root, None, state, sink, &mut cache, &mut summary)
                .await;

            match result {
                Ok(()) => {
                    info!(
                        stream = stream_id,
                        records = summary.records_for(stream_id),
                        "Finished stream sync"
                    );
                    sink.emit_state(state)?;
                }
                Err(err) => {
                    error!(
                        stream = stream_id,
                        kind = err.kind_label(),
                        attempts = err.attempts(),
                        error = %err,
                        "Stream sync failed"
                    );
                    sink.emit_state(state)?;
                    if !self.continue_on_error {
                        return Err(err);
                    }
                    summary.failures.push(StreamFailure {
                        stream: stream_id.to_string(),
                        kind: err.kind_label(),
                        message: err.to_string(),
                        attempts: err.attempts(),
                    });
                }
            }
        }

        state.set_currently_syncing(None);
        sink.emit_state(state)?;

        info!(
            total_records = summary.total_records(),
            failed_streams = summary.failures.len(),
            "Sync completed"
        );
        Ok(summary)
    }

    /// Pages through one stream (for one parent record, if a child).
    fn sync_node<'s>(
        &'s self,
        node: &'s SyncNode,
        parent_record: Option<&'s Value>,
        state: &'s mut TapState,
        sink: &'s mut dyn Sink,
        cache: &'s mut BookmarkCache,
        summary: &'s mut SyncSummary,
    ) -> BoxFuture<'s, GraphResult<()>> {
        async move {
            let stream = &node.stream;
            let definition = stream.definition();
            let stream_id = stream.tap_stream_id();
            let parent_key = stream.parent_key(parent_record);

            let bookmark = if node.emit {
                cache.get_or_resolve(definition, state, self.start_date)
            } else {
                Bookmark::None
            };

            let stored_delta = if node.emit && definition.delta {
                state
                    .delta_link(stream_id, parent_key.as_deref())
                    .map(String::from)
            } else {
                None
            };
            // Delta responses are already scoped to changes since the stored link.
            let filter = stored_delta.is_none();

            let (mut url, mut params) = match stored_delta {
                Some(link) => {
                    debug!(stream = stream_id, "Resuming from stored delta link");
                    (link, Vec::new())
                }
                None => (
                    stream.get_url_endpoint(parent_record)?,
                    stream.update_params(&[]),
                ),
            };

            let mut page_number = 0u32;
            loop {
                page_number += 1;
                let page = self.client.get(&url, &params).await?;
                let records: &[Value] = match page.get(definition.data_key).and_then(Value::as_array) {
                    Some(records) => records.as_slice(),
                    None => {
                        warn!(
                            stream = stream_id,
                            page = page_number,
                            data_key = definition.data_key,
                            "Response has no record array; treating page as empty"
                        );
                        &[]
                    }
                };
                debug!(
                    stream = stream_id,
                    page = page_number,
                    records = records.len(),
                    "Fetched page"
                );

                let mut max_seen: Option<String> = None;
                for raw in records {
                    let record = stream.modify_object(raw.clone(), parent_record);

                    if node.emit {
                        let replication_value = stream.replication_value(&record);
                        let admitted = !filter || bookmark.admits(replication_value.as_deref());
                        if admitted {
                            sink.emit_record(stream_id, &record, Utc::now())?;
                            summary.count(stream_id);
                            if let Some(value) = replication_value {
                                max_seen = Some(max_value(max_seen, value));
                            }
                        }
                    }

                    for child in &node.children {
                        self.sync_node(child, Some(&record), state, sink, cache, summary)
                            .await?;
                    }
                }

                if let (Some(key), Some(seen)) = (definition.replication_key(), max_seen) {
                    advance_bookmark(state, stream_id, key, seen);
                }

                match page.get("@odata.nextLink").and_then(Value::as_str) {
                    Some(next) => {
                        url = next.to_string();
                        params.clear();
                    }
                    None => {
                        if node.emit && definition.delta {
                            if let Some(link) = page.get("@odata.deltaLink").and_then(Value::as_str)
                            {
                                state.set_delta_link(
                                    stream_id,
                                    parent_key.as_deref(),
                                    link.to_string(),
                                );
                            }
                        }
                        break;
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }
}

fn max_value(current: Option<String>, candidate: String) -> String {
    match current {
        Some(current)
            if compare_replication_values(&current, &candidate) != std::cmp::Ordering::Less =>
        {
            current
        }
        _ => candidate,
    }
}

/// Moves the stored bookmark forward to `seen`; never backwards.
fn advance_bookmark(state: &mut TapState, stream_id: &str, key: &str, seen: String) {
    let stored = state
        .bookmark(stream_id, key)
        .and_then(Value::as_str)
        .map(String::from);
    let next = max_value(stored, seen);
    debug!(stream = stream_id, bookmark = %next, "Advancing bookmark");
    state.set_bookmark(stream_id, key, Value::String(next));
}

/// Connects, syncs and closes the session.
pub async fn sync(
    config: &TapConfig,
    catalog: &Catalog,
    state: &mut TapState,
    sink: &mut dyn Sink,
) -> GraphResult<SyncSummary> {
    let client = GraphClient::connect(config).await?;
    let result = SyncRunner::new(&client, config)
        .run(catalog, state, sink)
        .await;
    client.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_max_value_prefers_later_timestamp() {
        assert_eq!(
            max_value(Some("2024-01-02T00:00:00Z".into()), "2024-01-01T00:00:00Z".into()),
            "2024-01-02T00:00:00Z"
        );
        assert_eq!(
            max_value(None, "2024-01-01T00:00:00Z".into()),
            "2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let mut state = TapState::default();
        state.set_bookmark("drive_items", "lastModifiedDateTime", json!("2024-06-01T00:00:00Z"));

        advance_bookmark(
            &mut state,
            "drive_items",
            "lastModifiedDateTime",
            "2024-01-01T00:00:00Z".into(),
        );
        assert_eq!(
            state.bookmark("drive_items", "lastModifiedDateTime"),
            Some(&json!("2024-06-01T00:00:00Z"))
        );

        advance_bookmark(
            &mut state,
            "drive_items",
            "lastModifiedDateTime",
            "2024-07-01T00:00:00Z".into(),
        );
        assert_eq!(
            state.bookmark("drive_items", "lastModifiedDateTime"),
            Some(&json!("2024-07-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = SyncSummary::default();
        summary.count("users");
        summary.count("users");
        summary.count("groups");
        assert_eq!(summary.records_for("users"), 2);
        assert_eq!(summary.records_for("teams"), 0);
        assert_eq!(summary.total_records(), 3);
        assert!(summary.is_success());
    }
}
