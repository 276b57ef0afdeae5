//! Canonical stream definitions, in sync order.

use super::{PageSize, ParentLink, ReplicationMethod, StreamDefinition};

const VALUE: &str = "value";
const LAST_MODIFIED: &[&str] = &["lastModifiedDateTime"];
const NO_PARAMS: &[(&str, &str)] = &[];

const fn top_level(
    tap_stream_id: &'static str,
    path: &'static str,
    page_size: PageSize,
) -> StreamDefinition {
    StreamDefinition {
        tap_stream_id,
        key_properties: &["id"],
        replication_method: ReplicationMethod::FullTable,
        replication_keys: &[],
        path,
        data_key: VALUE,
        params: NO_PARAMS,
        page_size,
        delta: false,
        parent: None,
    }
}

const fn child(
    tap_stream_id: &'static str,
    key_properties: &'static [&'static str],
    path: &'static str,
    parent: &'static str,
    foreign_key: &'static str,
    page_size: PageSize,
) -> StreamDefinition {
    StreamDefinition {
        tap_stream_id,
        key_properties,
        replication_method: ReplicationMethod::FullTable,
        replication_keys: &[],
        path,
        data_key: VALUE,
        params: NO_PARAMS,
        page_size,
        delta: false,
        parent: Some(ParentLink {
            stream: parent,
            foreign_key,
            parent_field: "id",
        }),
    }
}

const fn delta_child(
    tap_stream_id: &'static str,
    key_properties: &'static [&'static str],
    path: &'static str,
    parent: &'static str,
    foreign_key: &'static str,
    page_size: PageSize,
) -> StreamDefinition {
    StreamDefinition {
        replication_method: ReplicationMethod::Incremental,
        replication_keys: LAST_MODIFIED,
        delta: true,
        ..child(tap_stream_id, key_properties, path, parent, foreign_key, page_size)
    }
}

static STREAMS: &[StreamDefinition] = &[
    top_level("applications", "applications", PageSize::Configured),
    top_level(
        "audit_logs_directory",
        "auditLogs/directoryAudits",
        PageSize::Configured,
    ),
    top_level("audit_logs_signins", "auditLogs/signIns", PageSize::Configured),
    child(
        "calendar_events",
        &["id", "user_id"],
        "users/{user_id}/events",
        "users",
        "user_id",
        PageSize::Configured,
    ),
    child(
        "channels",
        &["id", "team_id"],
        "teams/{team_id}/channels",
        "teams",
        "team_id",
        PageSize::Unsupported,
    ),
    delta_child(
        "chat_messages",
        &["chat_id", "id"],
        "chats/{chat_id}/messages/delta",
        "chats",
        "chat_id",
        PageSize::Fixed(50),
    ),
    top_level("chats", "chats", PageSize::Fixed(50)),
    top_level(
        "conditional_access_policies",
        "identity/conditionalAccess/policies",
        PageSize::Unsupported,
    ),
    child(
        "contacts",
        &["id", "user_id"],
        "users/{user_id}/contacts",
        "users",
        "user_id",
        PageSize::Configured,
    ),
    child(
        "directory_role_member",
        &["id", "role_id"],
        "directoryRoles/{role_id}/members",
        "directory_roles",
        "role_id",
        PageSize::Configured,
    ),
    top_level(
        "directory_role_templates",
        "directoryRoleTemplates",
        PageSize::Unsupported,
    ),
    top_level("directory_roles", "directoryRoles", PageSize::Unsupported),
    delta_child(
        "drive_items",
        &["drive_id", "id"],
        "drives/{drive_id}/items/delta",
        "drives",
        "drive_id",
        PageSize::Configured,
    ),
    top_level("drives", "drives", PageSize::Configured),
    child(
        "group_member",
        &["group_id", "id"],
        "groups/{group_id}/members",
        "groups",
        "group_id",
        PageSize::Configured,
    ),
    child(
        "group_owner",
        &["group_id", "id"],
        "groups/{group_id}/owners",
        "groups",
        "group_id",
        PageSize::Configured,
    ),
    top_level("groups", "groups", PageSize::Configured),
    delta_child(
        "mail_messages",
        &["user_id", "id"],
        "users/{user_id}/messages/delta",
        "users",
        "user_id",
        PageSize::Unsupported,
    ),
    top_level("service_principals", "servicePrincipals", PageSize::Configured),
    child(
        "team_member",
        &["id", "team_id"],
        "teams/{team_id}/members",
        "teams",
        "team_id",
        PageSize::Unsupported,
    ),
    StreamDefinition {
        params: &[(
            "$filter",
            "resourceProvisioningOptions/Any(x:x eq 'Team')",
        )],
        ..top_level("teams", "groups", PageSize::Configured)
    },
    top_level("users", "users", PageSize::Configured),
];

/// All stream definitions in sync order.
#[must_use]
pub fn registry() -> &'static [StreamDefinition] {
    STREAMS
}

/// Looks a definition up by `tap_stream_id`.
#[must_use]
pub fn find_definition(tap_stream_id: &str) -> Option<&'static StreamDefinition> {
    STREAMS.iter().find(|d| d.tap_stream_id == tap_stream_id)
}

/// Direct children of a stream, in registry order.
pub fn children_of(tap_stream_id: &str) -> impl Iterator<Item = &'static StreamDefinition> + '_ {
    STREAMS
        .iter()
        .filter(move |d| d.parent_stream() == Some(tap_stream_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_unique() {
        let ids: HashSet<_> = registry().iter().map(|d| d.tap_stream_id).collect();
        assert_eq!(ids.len(), registry().len());
        assert_eq!(registry().len(), 22);
    }

    #[test]
    fn test_parents_resolve_and_are_top_level() {
        for definition in registry() {
            let Some(link) = &definition.parent else {
                continue;
            };
            let parent = find_definition(link.stream)
                .unwrap_or_else(|| panic!("{} has unknown parent", definition.tap_stream_id));
            assert!(parent.parent.is_none());
            assert!(definition
                .path
                .contains(&format!("{{{}}}", link.foreign_key)));
            assert!(definition.key_properties.contains(&link.foreign_key));
        }
    }

    #[test]
    fn test_delta_streams_are_incremental() {
        for definition in registry().iter().filter(|d| d.delta) {
            assert_eq!(definition.replication_method, ReplicationMethod::Incremental);
            assert_eq!(definition.replication_key(), Some("lastModifiedDateTime"));
            assert!(definition.path.ends_with("/delta"));
        }
    }

    #[test]
    fn test_teams_filters_groups() {
        let teams = find_definition("teams").unwrap();
        assert_eq!(teams.path, "groups");
        assert_eq!(teams.params[0].0, "$filter");
    }

    #[test]
    fn test_children_of_groups() {
        let ids: Vec<_> = children_of("groups").map(|d| d.tap_stream_id).collect();
        assert_eq!(ids, vec!["group_member", "group_owner"]);
    }
}
