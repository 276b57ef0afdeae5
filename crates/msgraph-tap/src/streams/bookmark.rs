//! Bookmark resolution and replication-value ordering.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use super::{ReplicationMethod, StreamDefinition};
use crate::TapState;

/// Lower bound a stream starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bookmark {
    /// Full-table streams: no lower bound.
    None,
    /// Emit only records whose replication value is strictly greater.
    After(String),
}

impl Bookmark {
    /// Resolves the starting bookmark for a stream.
    ///
    /// Incremental streams fall back to `start_date` when nothing is stored.
    #[must_use]
    pub fn resolve(
        definition: &StreamDefinition,
        state: &TapState,
        start_date: DateTime<Utc>,
    ) -> Self {
        let Some(key) = definition.replication_key() else {
            return Self::None;
        };
        debug_assert_eq!(definition.replication_method, ReplicationMethod::Incremental);

        match state
            .bookmark(definition.tap_stream_id, key)
            .and_then(value_as_string)
        {
            Some(stored) => Self::After(stored),
            None => Self::After(start_date.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }

    /// Whether a record with this replication value should be emitted.
    #[must_use]
    pub fn admits(&self, value: Option<&str>) -> bool {
        match (self, value) {
            (Self::None, _) => true,
            (Self::After(bound), Some(value)) => {
                compare_replication_values(value, bound) == Ordering::Greater
            }
            (Self::After(_), None) => false,
        }
    }
}

/// Starting bookmarks for one top-level sync.
///
/// Child streams run once per parent record; every run must compare against
/// the bookmark as it was when the top-level sync began, not the value already
/// advanced by an earlier parent.
#[derive(Debug, Default)]
pub struct BookmarkCache {
    resolved: HashMap<&'static str, Bookmark>,
}

impl BookmarkCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached bookmark, resolving it from `state` on first use.
    pub fn get_or_resolve(
        &mut self,
        definition: &'static StreamDefinition,
        state: &TapState,
        start_date: DateTime<Utc>,
    ) -> Bookmark {
        self.resolved
            .entry(definition.tap_stream_id)
            .or_insert_with(|| Bookmark::resolve(definition, state, start_date))
            .clone()
    }
}

/// Orders two replication values: as timestamps when both parse, else as strings.
#[must_use]
pub fn compare_replication_values(a: &str, b: &str) -> Ordering {
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

pub(crate) fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::find_definition;
    use chrono::TimeZone;
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_full_table_has_no_bookmark() {
        let users = find_definition("users").unwrap();
        assert_eq!(
            Bookmark::resolve(users, &TapState::default(), start()),
            Bookmark::None
        );
    }

    #[test]
    fn test_incremental_falls_back_to_start_date() {
        let chat_messages = find_definition("chat_messages").unwrap();
        assert_eq!(
            Bookmark::resolve(chat_messages, &TapState::default(), start()),
            Bookmark::After("2022-01-01T00:00:00Z".into())
        );
    }

    #[test]
    fn test_incremental_uses_stored_value() {
        let chat_messages = find_definition("chat_messages").unwrap();
        let mut state = TapState::default();
        state.set_bookmark(
            "chat_messages",
            "lastModifiedDateTime",
            json!("2024-05-01T10:00:00Z"),
        );
        assert_eq!(
            Bookmark::resolve(chat_messages, &state, start()),
            Bookmark::After("2024-05-01T10:00:00Z".into())
        );
    }

    #[test]
    fn test_admits_strictly_greater() {
        let bookmark = Bookmark::After("2024-05-01T10:00:00Z".into());
        assert!(!bookmark.admits(Some("2024-05-01T10:00:00Z")));
        assert!(!bookmark.admits(Some("2024-04-30T10:00:00Z")));
        assert!(bookmark.admits(Some("2024-05-01T10:00:00.5Z")));
        assert!(!bookmark.admits(None));
        assert!(Bookmark::None.admits(None));
    }

    #[test]
    fn test_timestamps_compare_across_offsets() {
        assert_eq!(
            compare_replication_values("2024-05-01T12:00:00+02:00", "2024-05-01T11:00:00Z"),
            Ordering::Less
        );
        assert_eq!(compare_replication_values("b", "a"), Ordering::Greater);
    }

    #[test]
    fn test_cache_keeps_first_resolution() {
        let chat_messages = find_definition("chat_messages").unwrap();
        let mut state = TapState::default();
        let mut cache = BookmarkCache::new();

        let first = cache.get_or_resolve(chat_messages, &state, start());
        state.set_bookmark(
            "chat_messages",
            "lastModifiedDateTime",
            json!("2030-01-01T00:00:00Z"),
        );
        assert_eq!(cache.get_or_resolve(chat_messages, &state, start()), first);
    }
}
