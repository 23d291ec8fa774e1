//! workspace_app_servers - APP servers matching the filters

use std::collections::HashMap;

use async_trait::async_trait;
use deskform_core::resource::{Resource, Value};
use deskform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use serde_json::Value as JsonValue;

use super::{WorkspaceDataSource, computed_list, filter_param, object_type, pick, tag_list};
use crate::client::{JsonExt, ServiceClient, with_query};
use crate::config::Service;
use crate::error::ApiResult;
use crate::pagination::{DEFAULT_PAGE_LIMIT, list_by_offset};
use crate::resources::flatten_fields;

pub struct AppServers;

const FILTERS: &[&str] = &[
    "server_group_id",
    "server_name",
    "machine_name",
    "ip_addr",
    "server_id",
    "maintain_status",
    "scaling_auto_create",
];

const SERVER_FIELDS: &[&str] = &[
    "id",
    "name",
    "machine_name",
    "description",
    "server_group_id",
    "server_group_name",
    "status",
    "create_time",
    "update_time",
    "image_id",
    "availability_zone",
    "domain",
    "ou_name",
    "sid",
    "instance_id",
    "os_version",
    "os_type",
    "order_id",
    "maintain_status",
    "scaling_auto_create",
    "job_id",
    "job_type",
    "job_status",
    "job_time",
    "resource_pool_id",
    "resource_pool_type",
    "host_id",
    "session_count",
    "vm_status",
    "task_status",
    "enterprise_project_id",
    "metadata",
    "product_info",
];

#[async_trait]
impl WorkspaceDataSource for AppServers {
    fn name(&self) -> &'static str {
        "workspace_app_servers"
    }

    fn service(&self) -> Service {
        Service::AppStream
    }

    fn schema(&self) -> ResourceSchema {
        let host_address = AttributeType::List(Box::new(object_type(&[
            ("addr", AttributeType::String),
            ("version", AttributeType::Int),
            ("mac_addr", AttributeType::String),
            ("type", AttributeType::String),
            ("port_id", AttributeType::String),
            ("vpc_id", AttributeType::String),
            ("subnet_id", AttributeType::String),
            ("tenant_type", AttributeType::String),
        ])));
        ResourceSchema::new(self.name())
            .with_description("Workspace APP servers")
            .attribute(AttributeSchema::new("server_group_id", AttributeType::String))
            .attribute(AttributeSchema::new("server_name", AttributeType::String))
            .attribute(AttributeSchema::new("machine_name", AttributeType::String))
            .attribute(AttributeSchema::new("ip_addr", types::ipv4()))
            .attribute(AttributeSchema::new("server_id", AttributeType::String))
            .attribute(AttributeSchema::new("maintain_status", AttributeType::Bool))
            .attribute(AttributeSchema::new("scaling_auto_create", AttributeType::Bool))
            .attribute(computed_list(
                "servers",
                &[
                    ("id", AttributeType::String),
                    ("name", AttributeType::String),
                    ("machine_name", AttributeType::String),
                    ("description", AttributeType::String),
                    ("server_group_id", AttributeType::String),
                    ("status", AttributeType::String),
                    ("create_time", AttributeType::String),
                    ("image_id", AttributeType::String),
                    ("availability_zone", AttributeType::String),
                    ("os_type", AttributeType::String),
                    ("maintain_status", AttributeType::Bool),
                    ("scaling_auto_create", AttributeType::Bool),
                    ("session_count", AttributeType::Int),
                    ("enterprise_project_id", AttributeType::String),
                    ("metadata", types::string_map()),
                    (
                        "flavor",
                        object_type(&[
                            ("id", AttributeType::String),
                            ("links", types::string_list()),
                        ]),
                    ),
                    (
                        "freeze",
                        AttributeType::List(Box::new(object_type(&[
                            ("effect", AttributeType::Int),
                            ("scene", AttributeType::String),
                        ]))),
                    ),
                    ("host_address", host_address),
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
        let path = with_query("v1/{project_id}/app-servers", &params);
        let items = list_by_offset(client, &path, "items", DEFAULT_PAGE_LIMIT).await?;

        let servers = items.iter().map(flatten_server).collect();
        Ok(HashMap::from([("servers".to_string(), Value::List(servers))]))
    }
}

fn flatten_server(item: &JsonValue) -> Value {
    let mut server = pick(item, SERVER_FIELDS);
    if let Some(flavor) = item.get("flavor").filter(|f| f.is_object()) {
        server.insert("flavor".to_string(), Value::Map(pick(flavor, &["id", "links"])));
    }
    let freeze: Vec<Value> = item
        .array_at("/freeze")
        .iter()
        .map(|f| Value::Map(pick(f, &["effect", "scene"])))
        .collect();
    if !freeze.is_empty() {
        server.insert("freeze".to_string(), Value::List(freeze));
    }
    let addresses: Vec<Value> = item
        .array_at("/host_address")
        .iter()
        .map(|address| {
            let mut flat = HashMap::new();
            flatten_fields(
                address,
                &[
                    ("addr", "/addr"),
                    ("version", "/version"),
                    ("mac_addr", "/OS-EXT-IPS-MAC:mac_addr"),
                    ("type", "/OS-EXT-IPS:type"),
                    ("port_id", "/OS-EXT-IPS:port_id"),
                    ("vpc_id", "/vpc_id"),
                    ("subnet_id", "/subnet_id"),
                    ("tenant_type", "/tenant_type"),
                ],
                &mut flat,
            );
            Value::Map(flat)
        })
        .collect();
    if !addresses.is_empty() {
        server.insert("host_address".to_string(), Value::List(addresses));
    }
    if let Some(tags) = tag_list(item) {
        server.insert("tags".to_string(), tags);
    }
    Value::Map(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::client_for;
    use deskform_core::resource::AttributeMap;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn servers(from: usize, count: usize) -> Vec<JsonValue> {
        (from..from + count)
            .map(|i| json!({"id": format!("srv-{}", i), "server_group_id": "g1"}))
            .collect()
    }

    #[tokio::test]
    async fn follows_offset_until_short_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/proj/app-servers"))
            .and(query_param("server_group_id", "g1"))
            .and(query_param("offset", "0"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"items": servers(0, 100)})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/proj/app-servers"))
            .and(query_param("offset", "100"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"items": servers(100, 2)})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let query = Resource::new("workspace_app_servers", "g1")
            .with_read_only(true)
            .with_attribute("server_group_id", Value::from("g1"));
        let client = client_for(&server.uri());
        let attributes = AppServers.read(&client, &query).await.unwrap();
        assert_eq!(attributes.get_list("servers").len(), 102);
    }

    #[test]
    fn host_addresses_use_plain_names() {
        let flat = flatten_server(&json!({
            "id": "srv-1",
            "flavor": {"id": "f1", "links": []},
            "host_address": [{
                "addr": "10.0.0.5",
                "version": 4,
                "OS-EXT-IPS-MAC:mac_addr": "fa:16:3e:00:00:01",
                "OS-EXT-IPS:type": "fixed"
            }]
        }));
        let flat = flat.as_map().unwrap();
        let address = flat.get_list("host_address")[0].as_map().unwrap();
        assert_eq!(address.get_str("mac_addr"), Some("fa:16:3e:00:00:01"));
        assert_eq!(address.get_str("type"), Some("fixed"));
        assert_eq!(
            flat.get_map("flavor").and_then(|f| f.get_str("id")),
            Some("f1")
        );
    }
}
