//! Persisted sync state.
//!
//! Layout: `{"currently_syncing": id|null, "bookmarks": {id: {key: value}}}`.
//! Delta streams additionally keep `delta_link` (top-level) or
//! `delta_links: {parent_id: link}` (children) inside their bookmark entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::GraphResult;

const DELTA_LINK: &str = "delta_link";
const DELTA_LINKS: &str = "delta_links";

/// State carried between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TapState {
    #[serde(default)]
    pub currently_syncing: Option<String>,
    #[serde(default)]
    pub bookmarks: BTreeMap<String, Map<String, Value>>,
}

impl TapState {
    /// Parses a state document; blank input is an empty state.
    pub fn from_json(raw: &str) -> GraphResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }

    /// Stored bookmark value for `stream` under `key`.
    #[must_use]
    pub fn bookmark(&self, stream: &str, key: &str) -> Option<&Value> {
        self.bookmarks.get(stream).and_then(|entry| entry.get(key))
    }

    pub fn set_bookmark(&mut self, stream: &str, key: &str, value: Value) {
        self.bookmarks
            .entry(stream.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Stored delta link, per parent for child streams.
    #[must_use]
    pub fn delta_link(&self, stream: &str, parent_id: Option<&str>) -> Option<&str> {
        let entry = self.bookmarks.get(stream)?;
        match parent_id {
            None => entry.get(DELTA_LINK),
            Some(id) => entry.get(DELTA_LINKS).and_then(|links| links.get(id)),
        }
        .and_then(Value::as_str)
    }

    pub fn set_delta_link(&mut self, stream: &str, parent_id: Option<&str>, link: String) {
        let entry = self.bookmarks.entry(stream.to_string()).or_default();
        match parent_id {
            None => {
                entry.insert(DELTA_LINK.to_string(), Value::String(link));
            }
            Some(id) => {
                let links = entry
                    .entry(DELTA_LINKS)
                    .or_insert_with(|| Value::Object(Map::new()));
                if !links.is_object() {
                    *links = Value::Object(Map::new());
                }
                if let Value::Object(links) = links {
                    links.insert(id.to_string(), Value::String(link));
                }
            }
        }
    }

    pub fn set_currently_syncing(&mut self, stream: Option<&str>) {
        self.currently_syncing = stream.map(String::from);
    }

    /// The state as a JSON value, as written in `STATE` messages.
    pub fn to_value(&self) -> GraphResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blank_state_is_default() {
        assert_eq!(TapState::from_json("  ").unwrap(), TapState::default());
        assert_eq!(TapState::from_json("{}").unwrap(), TapState::default());
    }

    #[test]
    fn test_layout_round_trips() {
        let raw = r#"{"currently_syncing":"users","bookmarks":{"chat_messages":{"lastModifiedDateTime":"2024-01-01T00:00:00Z"}}}"#;
        let state = TapState::from_json(raw).unwrap();
        assert_eq!(state.currently_syncing.as_deref(), Some("users"));
        assert_eq!(
            state.bookmark("chat_messages", "lastModifiedDateTime"),
            Some(&json!("2024-01-01T00:00:00Z"))
        );
        assert_eq!(
            state.to_value().unwrap(),
            serde_json::from_str::<Value>(raw).unwrap()
        );
    }

    #[test]
    fn test_delta_links_per_parent() {
        let mut state = TapState::default();
        state.set_delta_link("drive_items", Some("d1"), "https://link/1".into());
        state.set_delta_link("drive_items", Some("d2"), "https://link/2".into());
        state.set_delta_link("groups", None, "https://link/g".into());

        assert_eq!(state.delta_link("drive_items", Some("d1")), Some("https://link/1"));
        assert_eq!(state.delta_link("drive_items", Some("d2")), Some("https://link/2"));
        assert_eq!(state.delta_link("drive_items", Some("d3")), None);
        assert_eq!(state.delta_link("groups", None), Some("https://link/g"));
        assert_eq!(
            state.to_value().unwrap()["bookmarks"]["drive_items"]["delta_links"]["d2"],
            json!("https://link/2")
        );
    }
}
