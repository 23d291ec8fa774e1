//! workspace_app_server_groups - APP server groups matching the filters

use std::collections::HashMap;

use async_trait::async_trait;
use deskform_core::resource::{Resource, Value};
use deskform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use serde_json::Value as JsonValue;

use super::{WorkspaceDataSource, computed_list, filter_param, object_type, pick, tag_list};
use crate::client::{ServiceClient, with_query};
use crate::config::Service;
use crate::error::ApiResult;
use crate::pagination::{DEFAULT_PAGE_LIMIT, list_by_offset};

pub struct AppServerGroups;

const FILTERS: &[&str] = &[
    "server_group_name",
    "server_group_id",
    "app_type",
    "is_secondary_server_group",
    "tags",
    "enterprise_project_id",
];

const GROUP_FIELDS: &[&str] = &[
    "id",
    "name",
    "description",
    "image_id",
    "os_type",
    "product_id",
    "subnet_id",
    "system_disk_type",
    "system_disk_size",
    "is_vdi",
    "extra_session_type",
    "extra_session_size",
    "app_type",
    "create_time",
    "update_time",
    "storage_mount_policy",
    "enterprise_project_id",
    "primary_server_group_ids",
    "secondary_server_group_ids",
    "server_group_status",
    "site_type",
    "site_id",
    "app_server_flavor_count",
    "app_server_count",
    "app_group_count",
    "image_name",
    "subnet_name",
    "ou_name",
    "product_info",
];

#[async_trait]
impl WorkspaceDataSource for AppServerGroups {
    fn name(&self) -> &'static str {
        "workspace_app_server_groups"
    }

    fn service(&self) -> Service {
        Service::AppStream
    }

    fn schema(&self) -> ResourceSchema {
        let scaling_policy = object_type(&[
            ("enable", AttributeType::Bool),
            ("max_scaling_amount", AttributeType::Int),
            ("single_expansion_count", AttributeType::Int),
            (
                "scaling_policy_by_session",
                object_type(&[
                    ("session_usage_threshold", AttributeType::Int),
                    ("shrink_after_session_idle_minutes", AttributeType::Int),
                ]),
            ),
        ]);
        ResourceSchema::new(self.name())
            .with_description("Workspace APP server groups")
            .attribute(AttributeSchema::new("server_group_name", AttributeType::String))
            .attribute(AttributeSchema::new("server_group_id", AttributeType::String))
            .attribute(AttributeSchema::new(
                "app_type",
                types::string_enum(&["SESSION_DESKTOP_APP", "COMMON_APP"]),
            ))
            .attribute(AttributeSchema::new(
                "is_secondary_server_group",
                types::string_enum(&["true", "false"]),
            ))
            .attribute(
                AttributeSchema::new("tags", AttributeType::String)
                    .with_description("Tag filter in the form key=value"),
            )
            .attribute(AttributeSchema::new("enterprise_project_id", AttributeType::String))
            .attribute(computed_list(
                "server_groups",
                &[
                    ("id", AttributeType::String),
                    ("name", AttributeType::String),
                    ("description", AttributeType::String),
                    ("image_id", AttributeType::String),
                    ("os_type", AttributeType::String),
                    ("product_id", AttributeType::String),
                    ("subnet_id", AttributeType::String),
                    ("system_disk_type", AttributeType::String),
                    ("system_disk_size", AttributeType::Int),
                    ("is_vdi", AttributeType::Bool),
                    ("app_type", AttributeType::String),
                    ("create_time", AttributeType::String),
                    ("update_time", AttributeType::String),
                    ("server_group_status", AttributeType::Bool),
                    ("app_server_count", AttributeType::Int),
                    ("image_name", AttributeType::String),
                    ("subnet_name", AttributeType::String),
                    ("ou_name", AttributeType::String),
                    ("primary_server_group_ids", types::string_list()),
                    ("secondary_server_group_ids", types::string_list()),
                    ("scaling_policy", scaling_policy),
                    (
                        "tags",
                        AttributeType::List(Box::new(object_type(&[
                            ("key", AttributeType::String),
                            ("value", AttributeType::String),
                        ]))),
                    ),
                ],
            ))
    }

    async fn read(
        &self,
        client: &ServiceClient,
        query: &Resource,
    ) -> ApiResult<HashMap<String, Value>> {
        let params: Vec<(&str, String)> = FILTERS
            .iter()
            .map(|key| (*key, filter_param(query, key)))
            .collect();
        let path = with_query("v1/{project_id}/app-server-groups", &params);
        let items = list_by_offset(client, &path, "items", DEFAULT_PAGE_LIMIT).await?;

        let groups = items.iter().map(flatten_server_group).collect();
        Ok(HashMap::from([(
            "server_groups".to_string(),
            Value::List(groups),
        )]))
    }
}

fn flatten_server_group(item: &JsonValue) -> Value {
    let mut group = pick(item, GROUP_FIELDS);
    if let Some(policy) = item.get("scaling_policy").and_then(Value::from_json) {
        group.insert("scaling_policy".to_string(), policy);
    }
    if let Some(tags) = tag_list(item) {
        group.insert("tags".to_string(), tags);
    }
    Value::Map(group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::client_for;
    use deskform_core::resource::AttributeMap;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lists_groups_with_encoded_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/proj/app-server-groups"))
            .and(query_param("server_group_name", "team a"))
            .and(query_param("tags", "env=prod"))
            .and(query_param("limit", "100"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 1,
                "items": [{
                    "id": "g1",
                    "name": "team a",
                    "app_server_count": 3,
                    "scaling_policy": {"enable": true, "max_scaling_amount": 5},
                    "tags": [{"key": "env", "value": "prod"}]
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let query = Resource::new("workspace_app_server_groups", "team")
            .with_read_only(true)
            .with_attribute("server_group_name", Value::from("team a"))
            .with_attribute("tags", Value::from("env=prod"));
        let client = client_for(&server.uri());
        let attributes = AppServerGroups.read(&client, &query).await.unwrap();

        let groups = attributes.get_list("server_groups");
        assert_eq!(groups.len(), 1);
        let group = groups[0].as_map().unwrap();
        assert_eq!(group.get_str("id"), Some("g1"));
        assert_eq!(group.get_int("app_server_count"), Some(3));
        assert_eq!(
            group.get_map("scaling_policy").and_then(|p| p.get_bool("enable")),
            Some(true)
        );
        assert_eq!(group.get_list("tags").len(), 1);
    }
}
