//! workspace_desktop_pool_associated_desktops - desktops of a desktop pool

use std::collections::HashMap;

use async_trait::async_trait;
use deskform_core::resource::{AttributeMap, Resource, Value};
use deskform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use serde_json::Value as JsonValue;

use super::{WorkspaceDataSource, computed_list, object_type, pick};
use crate::client::{JsonExt, ServiceClient};
use crate::config::Service;
use crate::error::{ApiError, ApiResult};
use crate::pagination::{DEFAULT_PAGE_LIMIT, list_by_offset};
use crate::tags::flatten_tags;

pub struct DesktopPoolAssociatedDesktops;

const DESKTOP_FIELDS: &[&str] = &[
    "desktop_id",
    "computer_name",
    "os_host_name",
    "ip_addresses",
    "ipv4",
    "ipv6",
    "desktop_type",
    "status",
    "in_maintenance_mode",
    "created",
    "login_status",
    "product_id",
    "availability_zone",
    "site_type",
    "site_name",
    "os_version",
    "sid",
    "is_support_internet",
    "is_attaching_eip",
    "attach_state",
    "enterprise_project_id",
    "subnet_id",
    "bill_resource_id",
];

const VOLUME_FIELDS: &[&str] = &[
    "type",
    "size",
    "device",
    "id",
    "volume_id",
    "bill_resource_id",
    "create_time",
    "display_name",
    "resource_spec_code",
];

const PRODUCT_FIELDS: &[&str] = &[
    "product_id",
    "flavor_id",
    "type",
    "cpu",
    "memory",
    "descriptions",
    "charge_mode",
    "architecture",
    "is_gpu",
    "package_type",
    "system_disk_type",
    "system_disk_size",
    "contain_data_disk",
    "resource_type",
    "cloud_service_type",
    "volume_product_type",
    "status",
];

fn volume_type() -> AttributeType {
    object_type(&[
        ("type", AttributeType::String),
        ("size", AttributeType::Int),
        ("device", AttributeType::String),
        ("id", AttributeType::String),
        ("volume_id", AttributeType::String),
        ("create_time", AttributeType::String),
        ("display_name", AttributeType::String),
    ])
}

#[async_trait]
impl WorkspaceDataSource for DesktopPoolAssociatedDesktops {
    fn name(&self) -> &'static str {
        "workspace_desktop_pool_associated_desktops"
    }

    fn service(&self) -> Service {
        Service::Workspace
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.name())
            .with_description("Desktops associated with a desktop pool")
            .attribute(AttributeSchema::new("pool_id", AttributeType::String).required())
            .attribute(computed_list(
                "desktops",
                &[
                    ("desktop_id", AttributeType::String),
                    ("computer_name", AttributeType::String),
                    ("os_host_name", AttributeType::String),
                    ("ip_addresses", types::string_list()),
                    ("ipv4", AttributeType::String),
                    ("desktop_type", AttributeType::String),
                    ("status", AttributeType::String),
                    ("in_maintenance_mode", AttributeType::Bool),
                    ("created", AttributeType::String),
                    ("login_status", AttributeType::String),
                    ("product_id", AttributeType::String),
                    ("availability_zone", AttributeType::String),
                    ("root_volume", volume_type()),
                    ("data_volumes", AttributeType::List(Box::new(volume_type()))),
                    (
                        "product",
                        object_type(&[
                            ("product_id", AttributeType::String),
                            ("flavor_id", AttributeType::String),
                            ("cpu", AttributeType::String),
                            ("memory", AttributeType::String),
                        ]),
                    ),
                    ("tags", types::string_map()),
                    ("enterprise_project_id", AttributeType::String),
                    ("subnet_id", AttributeType::String),
                ],
            ))
    }

    async fn read(
        &self,
        client: &ServiceClient,
        query: &Resource,
    ) -> ApiResult<HashMap<String, Value>> {
        let pool_id = query
            .get_str("pool_id")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::Validation("pool_id is required".to_string()))?;
        let path = format!(
            "v2/{{project_id}}/desktop-pools/{}/desktops",
            urlencoding::encode(pool_id)
        );
        let items = list_by_offset(client, &path, "pool_desktops", DEFAULT_PAGE_LIMIT).await?;

        let desktops = items.iter().map(flatten_desktop).collect();
        Ok(HashMap::from([("desktops".to_string(), Value::List(desktops))]))
    }
}

fn flatten_desktop(item: &JsonValue) -> Value {
    let mut desktop = pick(item, DESKTOP_FIELDS);
    if let Some(root) = item.get("root_volume").filter(|v| v.is_object()) {
        desktop.insert("root_volume".to_string(), Value::Map(pick(root, VOLUME_FIELDS)));
    }
    let data_volumes: Vec<Value> = item
        .array_at("/data_volumes")
        .iter()
        .map(|v| Value::Map(pick(v, VOLUME_FIELDS)))
        .collect();
    if !data_volumes.is_empty() {
        desktop.insert("data_volumes".to_string(), Value::List(data_volumes));
    }
    if let Some(product) = item.get("product").filter(|p| p.is_object()) {
        desktop.insert("product".to_string(), Value::Map(pick(product, PRODUCT_FIELDS)));
    }
    let tags = flatten_tags(item.array_at("/tags"));
    if !tags.is_empty() {
        desktop.insert("tags".to_string(), Value::Map(tags));
    }
    Value::Map(desktop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::client_for;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lists_pool_desktops() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/desktop-pools/pool-1/desktops"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pool_desktops": [{
                    "desktop_id": "d1",
                    "computer_name": "pool-001",
                    "status": "ACTIVE",
                    "root_volume": {"type": "SAS", "size": 80},
                    "data_volumes": [{"type": "SAS", "size": 20, "device": "/dev/vdb"}],
                    "tags": [{"key": "team", "value": "a"}]
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let query = Resource::new("workspace_desktop_pool_associated_desktops", "pool")
            .with_read_only(true)
            .with_attribute("pool_id", Value::from("pool-1"));
        let client = client_for(&server.uri());
        let attributes = DesktopPoolAssociatedDesktops
            .read(&client, &query)
            .await
            .unwrap();

        let desktops = attributes.get_list("desktops");
        assert_eq!(desktops.len(), 1);
        let desktop = desktops[0].as_map().unwrap();
        assert_eq!(desktop.get_str("computer_name"), Some("pool-001"));
        assert_eq!(
            desktop.get_map("root_volume").and_then(|v| v.get_int("size")),
            Some(80)
        );
        assert_eq!(
            desktop.get_map("tags").and_then(|t| t.get_str("team")),
            Some("a")
        );
    }

    #[tokio::test]
    async fn missing_pool_id_is_rejected() {
        let client = client_for("http://127.0.0.1:9");
        let query = Resource::new("workspace_desktop_pool_associated_desktops", "pool");
        let err = DesktopPoolAssociatedDesktops
            .read(&client, &query)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
