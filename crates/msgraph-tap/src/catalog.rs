//! Discovery output and stream selection.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::streams::{find_definition, registry, StreamDefinition};
use crate::{GraphError, GraphResult};

/// Singer catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub tap_stream_id: String,
    pub stream: String,
    #[serde(default)]
    pub key_properties: Vec<String>,
    #[serde(default = "permissive_object")]
    pub schema: Value,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

/// Metadata attached to a breadcrumb (`[]` is the stream itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub breadcrumb: Vec<String>,
    pub metadata: Map<String, Value>,
}

fn permissive_object() -> Value {
    json!({"type": ["null", "object"], "additionalProperties": true})
}

/// Schema for a stream: keys and replication keys typed, everything else open.
#[must_use]
pub fn schema_for(definition: &StreamDefinition) -> Value {
    let mut properties = Map::new();
    for key in definition.key_properties {
        properties.insert((*key).to_string(), json!({"type": ["null", "string"]}));
    }
    for key in definition.replication_keys {
        properties.insert(
            (*key).to_string(),
            json!({"type": ["null", "string"], "format": "date-time"}),
        );
    }
    json!({
        "type": ["null", "object"],
        "additionalProperties": true,
        "properties": properties,
    })
}

fn metadata_for(definition: &StreamDefinition) -> Vec<MetadataEntry> {
    let mut root = Map::new();
    root.insert(
        "table-key-properties".into(),
        json!(definition.key_properties),
    );
    root.insert(
        "forced-replication-method".into(),
        json!(definition.replication_method.as_str()),
    );
    if !definition.replication_keys.is_empty() {
        root.insert(
            "valid-replication-keys".into(),
            json!(definition.replication_keys),
        );
    }
    if let Some(parent) = definition.parent_stream() {
        root.insert("parent-tap-stream-id".into(), json!(parent));
    }
    root.insert("inclusion".into(), json!("available"));

    let mut entries = vec![MetadataEntry {
        breadcrumb: Vec::new(),
        metadata: root,
    }];

    let automatic = definition
        .key_properties
        .iter()
        .chain(definition.replication_keys.iter());
    for field in automatic {
        let mut metadata = Map::new();
        metadata.insert("inclusion".into(), json!("automatic"));
        entries.push(MetadataEntry {
            breadcrumb: vec!["properties".into(), (*field).to_string()],
            metadata,
        });
    }
    entries
}

/// Builds the catalog of every known stream, nothing selected.
#[must_use]
pub fn discover() -> Catalog {
    Catalog {
        streams: registry()
            .iter()
            .map(|definition| CatalogEntry {
                tap_stream_id: definition.tap_stream_id.to_string(),
                stream: definition.tap_stream_id.to_string(),
                key_properties: definition
                    .key_properties
                    .iter()
                    .map(|k| (*k).to_string())
                    .collect(),
                schema: schema_for(definition),
                metadata: metadata_for(definition),
            })
            .collect(),
    }
}

impl CatalogEntry {
    fn root_metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata
            .iter()
            .find(|m| m.breadcrumb.is_empty())
            .map(|m| &m.metadata)
    }

    /// `selected` on the root breadcrumb.
    #[must_use]
    pub fn is_selected(&self) -> bool {
        self.root_metadata()
            .and_then(|m| m.get("selected"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn set_selected(&mut self, selected: bool) {
        match self.metadata.iter_mut().find(|m| m.breadcrumb.is_empty()) {
            Some(root) => {
                root.metadata.insert("selected".into(), json!(selected));
            }
            None => {
                let mut metadata = Map::new();
                metadata.insert("selected".into(), json!(selected));
                self.metadata.push(MetadataEntry {
                    breadcrumb: Vec::new(),
                    metadata,
                });
            }
        }
    }
}

impl Catalog {
    pub fn from_json(raw: &str) -> GraphResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Marks every stream selected.
    #[must_use]
    pub fn with_all_selected(mut self) -> Self {
        for entry in &mut self.streams {
            entry.set_selected(true);
        }
        self
    }

    /// Marks only the named streams selected.
    pub fn select(mut self, stream_ids: &[&str]) -> GraphResult<Self> {
        for id in stream_ids {
            if !self.streams.iter().any(|e| e.tap_stream_id == *id) {
                return Err(GraphError::UnknownStream((*id).to_string()));
            }
        }
        for entry in &mut self.streams {
            let selected = stream_ids.contains(&entry.tap_stream_id.as_str());
            entry.set_selected(selected);
        }
        Ok(self)
    }

    #[must_use]
    pub fn entry(&self, tap_stream_id: &str) -> Option<&CatalogEntry> {
        self.streams.iter().find(|e| e.tap_stream_id == tap_stream_id)
    }

    /// Definitions of the selected streams, in registry order.
    pub fn selected_definitions(&self) -> GraphResult<Vec<&'static StreamDefinition>> {
        let mut selected = Vec::new();
        for entry in self.streams.iter().filter(|e| e.is_selected()) {
            let definition = find_definition(&entry.tap_stream_id)
                .ok_or_else(|| GraphError::UnknownStream(entry.tap_stream_id.clone()))?;
            selected.push(definition);
        }
        selected.sort_by_key(|d| {
            registry()
                .iter()
                .position(|r| r.tap_stream_id == d.tap_stream_id)
        });
        Ok(selected)
    }

    pub fn to_json_pretty(&self) -> GraphResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_lists_every_stream() {
        let catalog = discover();
        assert_eq!(catalog.streams.len(), registry().len());
        assert!(catalog.selected_definitions().unwrap().is_empty());
    }

    #[test]
    fn test_discovery_metadata() {
        let catalog = discover();
        let entry = catalog.entry("drive_items").unwrap();
        let root = entry.root_metadata().unwrap();
        assert_eq!(root["forced-replication-method"], "INCREMENTAL");
        assert_eq!(root["valid-replication-keys"], json!(["lastModifiedDateTime"]));
        assert_eq!(root["parent-tap-stream-id"], "drives");
        assert_eq!(root["table-key-properties"], json!(["drive_id", "id"]));

        let users = catalog.entry("users").unwrap().root_metadata().unwrap();
        assert_eq!(users["forced-replication-method"], "FULL_TABLE");
        assert!(users.get("parent-tap-stream-id").is_none());
        assert!(users.get("valid-replication-keys").is_none());
    }

    #[test]
    fn test_select_keeps_registry_order() {
        let catalog = discover().select(&["users", "groups"]).unwrap();
        let ids: Vec<_> = catalog
            .selected_definitions()
            .unwrap()
            .iter()
            .map(|d| d.tap_stream_id)
            .collect();
        assert_eq!(ids, vec!["groups", "users"]);
    }

    #[test]
    fn test_select_unknown_stream_rejected() {
        assert!(matches!(
            discover().select(&["planets"]),
            Err(GraphError::UnknownStream(_))
        ));
    }

    #[test]
    fn test_selection_read_from_catalog_file() {
        let raw = r#"{"streams":[{"tap_stream_id":"users","stream":"users",
            "metadata":[{"breadcrumb":[],"metadata":{"selected":true}}]},
            {"tap_stream_id":"groups","stream":"groups",
            "metadata":[{"breadcrumb":[],"metadata":{"selected":false}}]}]}"#;
        let catalog = Catalog::from_json(raw).unwrap();
        let selected = catalog.selected_definitions().unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].tap_stream_id, "users");
    }

    #[test]
    fn test_all_selected() {
        let catalog = discover().with_all_selected();
        assert_eq!(
            catalog.selected_definitions().unwrap().len(),
            registry().len()
        );
    }
}
