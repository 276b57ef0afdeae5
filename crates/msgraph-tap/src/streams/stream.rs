//! Runtime view of a stream definition.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::bookmark::value_as_string;
use super::{Bookmark, PageSize, ReplicationMethod, StreamDefinition};
use crate::{GraphError, GraphResult, TapState};

/// A stream bound to a base URL and page size.
#[derive(Debug, Clone)]
pub struct Stream {
    definition: &'static StreamDefinition,
    base_url: String,
    page_size: u32,
}

impl Stream {
    /// Binds `definition` to the versioned Graph base URL.
    #[must_use]
    pub fn new(definition: &'static StreamDefinition, base_url: &str, page_size: u32) -> Self {
        Self {
            definition,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size,
        }
    }

    #[must_use]
    pub fn definition(&self) -> &'static StreamDefinition {
        self.definition
    }

    #[must_use]
    pub fn tap_stream_id(&self) -> &'static str {
        self.definition.tap_stream_id
    }

    #[must_use]
    pub fn is_incremental(&self) -> bool {
        self.definition.replication_method == ReplicationMethod::Incremental
    }

    /// Starting bookmark read from `state`.
    #[must_use]
    pub fn get_bookmark(&self, state: &TapState, start_date: DateTime<Utc>) -> Bookmark {
        Bookmark::resolve(self.definition, state, start_date)
    }

    /// Full URL of the first page.
    ///
    /// Child streams substitute the parent's key into the path; values are
    /// percent-encoded.
    pub fn get_url_endpoint(&self, parent_record: Option<&Value>) -> GraphResult<String> {
        let path = match &self.definition.parent {
            None => self.definition.path.to_string(),
            Some(link) => {
                let value = parent_record
                    .and_then(|record| record.get(link.parent_field))
                    .and_then(value_as_string)
                    .ok_or_else(|| GraphError::MissingParent {
                        stream: self.tap_stream_id().to_string(),
                        field: link.parent_field.to_string(),
                    })?;
                self.definition.path.replace(
                    &format!("{{{}}}", link.foreign_key),
                    &urlencoding::encode(&value),
                )
            }
        };
        Ok(format!("{}/{}", self.base_url, path))
    }

    /// First-page query parameters with `overrides` merged on top.
    #[must_use]
    pub fn update_params(&self, overrides: &[(String, String)]) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .definition
            .params
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();

        let top = match self.definition.page_size {
            PageSize::Unsupported => None,
            PageSize::Configured => Some(self.page_size),
            PageSize::Fixed(max) => Some(max.min(self.page_size)),
        };
        if let Some(top) = top {
            params.push(("$top".to_string(), top.to_string()));
        }

        for (key, value) in overrides {
            match params.iter_mut().find(|(k, _)| k == key) {
                Some(existing) => existing.1 = value.clone(),
                None => params.push((key.clone(), value.clone())),
            }
        }
        params
    }

    /// Injects the parent's key into a child record.
    #[must_use]
    pub fn modify_object(&self, mut record: Value, parent_record: Option<&Value>) -> Value {
        let (Some(link), Some(parent)) = (&self.definition.parent, parent_record) else {
            return record;
        };
        if let (Value::Object(fields), Some(parent_key)) =
            (&mut record, parent.get(link.parent_field))
        {
            fields.insert(link.foreign_key.to_string(), parent_key.clone());
        }
        record
    }

    /// Parent key used to scope per-parent state (delta links).
    #[must_use]
    pub fn parent_key(&self, parent_record: Option<&Value>) -> Option<String> {
        let link = self.definition.parent.as_ref()?;
        parent_record?.get(link.parent_field).and_then(value_as_string)
    }

    /// Replication-key value of a record, if present.
    #[must_use]
    pub fn replication_value(&self, record: &Value) -> Option<String> {
        let key = self.definition.replication_key()?;
        record.get(key).and_then(value_as_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::find_definition;
    use serde_json::json;

    const BASE: &str = "https://graph.microsoft.com/v1.0";

    fn stream(id: &str) -> Stream {
        Stream::new(find_definition(id).unwrap(), BASE, 999)
    }

    #[test]
    fn test_top_level_endpoint() {
        assert_eq!(
            stream("users").get_url_endpoint(None).unwrap(),
            "https://graph.microsoft.com/v1.0/users"
        );
        assert_eq!(
            stream("teams").get_url_endpoint(None).unwrap(),
            "https://graph.microsoft.com/v1.0/groups"
        );
    }

    #[test]
    fn test_child_endpoint_substitutes_parent_id() {
        let url = stream("group_member")
            .get_url_endpoint(Some(&json!({"id": "g1"})))
            .unwrap();
        assert_eq!(url, "https://graph.microsoft.com/v1.0/groups/g1/members");
    }

    #[test]
    fn test_child_endpoint_encodes_value() {
        let url = stream("calendar_events")
            .get_url_endpoint(Some(&json!({"id": "a b/c"})))
            .unwrap();
        assert_eq!(
            url,
            "https://graph.microsoft.com/v1.0/users/a%20b%2Fc/events"
        );
    }

    #[test]
    fn test_child_endpoint_requires_parent() {
        let err = stream("channels").get_url_endpoint(None).unwrap_err();
        assert!(matches!(err, GraphError::MissingParent { .. }));

        let err = stream("channels")
            .get_url_endpoint(Some(&json!({"displayName": "x"})))
            .unwrap_err();
        assert!(matches!(err, GraphError::MissingParent { .. }));
    }

    #[test]
    fn test_update_params_injects_top() {
        assert_eq!(
            stream("users").update_params(&[]),
            vec![("$top".to_string(), "999".to_string())]
        );
        assert!(stream("directory_roles").update_params(&[]).is_empty());
        assert_eq!(
            stream("chats").update_params(&[]),
            vec![("$top".to_string(), "50".to_string())]
        );
    }

    #[test]
    fn test_update_params_overrides_win() {
        let params = stream("teams").update_params(&[
            ("$top".to_string(), "10".to_string()),
            ("$select".to_string(), "id".to_string()),
        ]);
        assert_eq!(params.len(), 3);
        assert!(params.contains(&("$top".to_string(), "10".to_string())));
        assert!(params.contains(&("$select".to_string(), "id".to_string())));
        assert_eq!(params[0].0, "$filter");
    }

    #[test]
    fn test_modify_object_injects_foreign_key() {
        let record = stream("channels").modify_object(
            json!({"id": "c1"}),
            Some(&json!({"id": "t1", "displayName": "Team"})),
        );
        assert_eq!(record, json!({"id": "c1", "team_id": "t1"}));

        let untouched = stream("users").modify_object(json!({"id": "u1"}), None);
        assert_eq!(untouched, json!({"id": "u1"}));
    }

    #[test]
    fn test_replication_value() {
        let drive_items = stream("drive_items");
        assert_eq!(
            drive_items.replication_value(&json!({"lastModifiedDateTime": "2024-01-01T00:00:00Z"})),
            Some("2024-01-01T00:00:00Z".to_string())
        );
        assert_eq!(drive_items.replication_value(&json!({"id": "x"})), None);
        assert_eq!(
            stream("users").replication_value(&json!({"lastModifiedDateTime": "x"})),
            None
        );
    }
}
