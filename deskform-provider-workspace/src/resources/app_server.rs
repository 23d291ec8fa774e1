//! workspace_app_server - an application server inside an app server group

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deskform_core::differ::AttributeChanges;
use deskform_core::provider::Timeouts;
use deskform_core::resource::{AttributeMap, Resource, State, Value};
use deskform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use deskform_core::waiter::Refresh;
use log::{error, warn};
use serde_json::{Map, Value as JsonValue, json};

use super::{WorkspaceResource, flatten_fields, opt_str, remove_nulls, timeouts_attribute};
use crate::client::{JsonExt, ServiceClient};
use crate::config::Service;
use crate::error::{ApiError, ApiResult};
use crate::jobs::{PollTiming, wait_for_app_server_job_completed, wait_until};
use crate::orders::wait_for_order_resource;

const SERVER_DELETE_TIMING: PollTiming = PollTiming::secs(10, 20);

/// Attributes applied through `PATCH app-servers/{id}`
const PATCHABLE: &[&str] = &["name", "description", "maintain_status"];

pub struct AppServer;

#[async_trait]
impl WorkspaceResource for AppServer {
    fn name(&self) -> &'static str {
        "workspace_app_server"
    }

    fn service(&self) -> Service {
        Service::AppStream
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.name())
            .with_description("Workspace APP server")
            .attribute(
                AttributeSchema::new("server_group_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("name", AttributeType::String).optional_computed())
            .attribute(
                AttributeSchema::new("type", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("flavor_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "root_volume",
                    AttributeType::Struct(vec![
                        AttributeSchema::new("type", AttributeType::String).required(),
                        AttributeSchema::new("size", types::positive_int()).required(),
                    ]),
                )
                .required()
                .force_new(),
            )
            .attribute(
                AttributeSchema::new("vpc_id", types::uuid())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("subnet_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("os_type", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("availability_zone", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(AttributeSchema::new("maintain_status", AttributeType::Bool))
            .attribute(AttributeSchema::new("ou_name", AttributeType::String))
            .attribute(
                AttributeSchema::new("update_access_agent", AttributeType::Bool)
                    .with_default(Value::Bool(true)),
            )
            .attribute(
                AttributeSchema::new(
                    "scheduler_hints",
                    AttributeType::Struct(vec![
                        AttributeSchema::new("dedicated_host_id", AttributeType::String),
                        AttributeSchema::new("tenancy", AttributeType::String),
                    ]),
                )
                .force_new(),
            )
            .attribute(
                AttributeSchema::new("charging_mode", types::string_enum(&["prePaid", "postPaid"]))
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("period_unit", types::string_enum(&["month", "year"]))
                    .force_new(),
            )
            .attribute(AttributeSchema::new("period", types::positive_int()).force_new())
            .attribute(AttributeSchema::new("auto_renew", types::string_enum(&["true", "false"])))
            .attribute(timeouts_attribute())
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::minutes(40, 20, 10)
    }

    async fn create(
        &self,
        client: &ServiceClient,
        resource: &Resource,
        timeout: Duration,
    ) -> ApiResult<String> {
        let body = remove_nulls(build_create_body(resource));
        let response = client
            .post("v1/{project_id}/app-servers/actions/create", &body)
            .await?;

        let server_id = match response.str_at("/job_id").filter(|id| !id.is_empty()) {
            Some(job_id) => {
                let outcome = wait_for_app_server_job_completed(client, job_id, timeout).await?;
                let server_id = outcome.resource_id().map(str::to_string);
                outcome.into_result(job_id)?;
                server_id
                    .ok_or(ApiError::MissingField("/sub_jobs/0/job_resource_info/resource_id"))?
            }
            // Prepaid servers are bought through an order
            None => {
                let order_id = response
                    .str_at("/order_id")
                    .filter(|id| !id.is_empty())
                    .ok_or(ApiError::MissingField("/job_id"))?;
                wait_for_order_resource(client, order_id, timeout)
                    .await
                    .map_err(|e| {
                        error!("APP server order ({}) did not complete: {}", order_id, e);
                        e
                    })?
            }
        };

        // Name, description and maintenance status are only settable after creation
        let patch = patch_body(PATCHABLE.iter().copied().filter(|k| resource.attr(k).is_some()), resource);
        if !patch.is_empty() {
            patch_server(client, &server_id, patch).await?;
        }
        Ok(server_id)
    }

    async fn read(
        &self,
        client: &ServiceClient,
        identifier: &str,
    ) -> ApiResult<Option<HashMap<String, Value>>> {
        let server = match get_server(client, identifier).await {
            Ok(server) => server,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(flatten_server(&server)))
    }

    async fn update(
        &self,
        client: &ServiceClient,
        identifier: &str,
        changes: &AttributeChanges<'_>,
        to: &Resource,
        _timeout: Duration,
    ) -> ApiResult<()> {
        let patch = patch_body(PATCHABLE.iter().copied().filter(|k| changes.has_change(k)), to);
        if !patch.is_empty() {
            patch_server(client, identifier, patch).await?;
        }
        if changes.has_change("auto_renew") {
            warn!(
                "auto_renew of APP server ({}) is managed through the billing console",
                identifier
            );
        }
        Ok(())
    }

    async fn delete(
        &self,
        client: &ServiceClient,
        identifier: &str,
        _state: &State,
        timeout: Duration,
    ) -> ApiResult<()> {
        let path = format!("v1/{{project_id}}/app-servers/{}", identifier);
        // Deleting an unknown server also answers 200
        let response = match client.delete(&path).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        match response.str_at("/job_id").filter(|id| !id.is_empty()) {
            Some(job_id) => {
                wait_for_app_server_job_completed(client, job_id, timeout)
                    .await?
                    .into_result(job_id)?;
            }
            None => error!("unable to find job ID from API response"),
        }

        wait_for_server_gone(client, identifier, timeout).await
    }
}

async fn get_server(client: &ServiceClient, server_id: &str) -> ApiResult<JsonValue> {
    client
        .get(&format!("v1/{{project_id}}/app-servers/{}", server_id))
        .await
}

async fn patch_server(
    client: &ServiceClient,
    server_id: &str,
    body: Map<String, JsonValue>,
) -> ApiResult<()> {
    client
        .patch(
            &format!("v1/{{project_id}}/app-servers/{}", server_id),
            &JsonValue::Object(body),
        )
        .await?;
    Ok(())
}

fn patch_body<'a>(
    keys: impl Iterator<Item = &'a str>,
    resource: &Resource,
) -> Map<String, JsonValue> {
    keys.map(|key| (key.to_string(), resource.get_json(key)))
        .collect()
}

/// `period_type` code of the order API
fn period_type(unit: Option<&str>) -> Option<i64> {
    match unit {
        Some("month") => Some(2),
        Some("year") => Some(3),
        _ => None,
    }
}

fn build_create_body(resource: &Resource) -> JsonValue {
    let mut body = json!({
        "server_group_id": resource.get_str("server_group_id"),
        "type": resource.get_str("type"),
        "product_id": resource.get_str("flavor_id"),
        "subscription_num": 1,
        "root_volume": resource.get_map("root_volume").map(|v| json!({
            "type": v.get_str("type"),
            "size": v.get_int("size"),
        })),
        "vpc_id": resource.get_str("vpc_id"),
        "subnet_id": resource.get_str("subnet_id"),
        "os_type": opt_str(resource, "os_type"),
        "availability_zone": opt_str(resource, "availability_zone"),
        "update_access_agent": resource.get_bool("update_access_agent").unwrap_or(true),
        "ou_name": opt_str(resource, "ou_name"),
        "scheduler_hints": resource.get_map("scheduler_hints").map(|h| json!({
            "dedicated_host_id": opt_str(h, "dedicated_host_id"),
            "tenancy": opt_str(h, "tenancy"),
        })),
    });

    if resource.get_str("charging_mode") == Some("prePaid") {
        body["create_server_extend_param"] = json!({
            "charging_mode": "prePaid",
            "period_type": period_type(resource.get_str("period_unit")),
            "period_num": resource.get_int("period"),
            "is_auto_renew": resource.get_str("auto_renew") == Some("true"),
            "is_auto_pay": true,
        });
    }
    body
}

fn flatten_server(server: &JsonValue) -> HashMap<String, Value> {
    let mut attributes = HashMap::new();
    flatten_fields(
        server,
        &[
            ("server_group_id", "/server_group_id"),
            ("name", "/name"),
            ("flavor_id", "/product_info/product_id"),
            ("os_type", "/os_type"),
            ("availability_zone", "/availability_zone"),
            ("description", "/description"),
            ("ou_name", "/ou_name"),
            ("maintain_status", "/maintain_status"),
        ],
        &mut attributes,
    );

    if let Some(product) = server.pointer("/product_info") {
        let mut root = HashMap::new();
        if let Some(kind) = product.str_at("/system_disk_type") {
            root.insert("type".to_string(), Value::from(kind));
        }
        // The size comes back as a string
        if let Some(size) = product
            .str_at("/system_disk_size")
            .and_then(|s| s.parse::<i64>().ok())
        {
            root.insert("size".to_string(), Value::Int(size));
        }
        attributes.insert("root_volume".to_string(), Value::Map(root));
    }

    match server.str_at("/metadata/charging_mode") {
        Some("1") => {
            attributes.insert("charging_mode".to_string(), Value::from("prePaid"));
        }
        Some("0") => {
            attributes.insert("charging_mode".to_string(), Value::from("postPaid"));
        }
        _ => warn!("error parsing charging_mode from API response"),
    }
    attributes
}

async fn wait_for_server_gone(
    client: &ServiceClient,
    server_id: &str,
    timeout: Duration,
) -> ApiResult<()> {
    let waiter = SERVER_DELETE_TIMING.waiter(client, &["PENDING"], &["COMPLETED"], timeout);
    wait_until(&waiter, || async move {
        match get_server(client, server_id).await {
            Ok(server) => Ok(Refresh::found(server, "PENDING")),
            Err(e) if e.is_not_found() => Ok(Refresh::found(JsonValue::Null, "COMPLETED")),
            Err(e) => Err(e),
        }
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::client_for;
    use wiremock::matchers::{body_json, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn server_resource() -> Resource {
        Resource::new("workspace_app_server", "app")
            .with_attribute("server_group_id", Value::from("g-1"))
            .with_attribute("type", Value::from("createApps"))
            .with_attribute("flavor_id", Value::from("workspace.appstream.general.xlarge.4"))
            .with_attribute(
                "root_volume",
                Value::Map(HashMap::from([
                    ("type".to_string(), Value::from("SAS")),
                    ("size".to_string(), Value::Int(80)),
                ])),
            )
            .with_attribute("vpc_id", Value::from("vpc-1"))
            .with_attribute("subnet_id", Value::from("subnet-1"))
    }

    #[test]
    fn prepaid_body_carries_order_params() {
        let resource = server_resource()
            .with_attribute("charging_mode", Value::from("prePaid"))
            .with_attribute("period_unit", Value::from("year"))
            .with_attribute("period", Value::Int(1))
            .with_attribute("auto_renew", Value::from("true"));
        let body = remove_nulls(build_create_body(&resource));
        assert_eq!(
            body["create_server_extend_param"],
            json!({
                "charging_mode": "prePaid",
                "period_type": 3,
                "period_num": 1,
                "is_auto_renew": true,
                "is_auto_pay": true
            })
        );
        assert_eq!(body["subscription_num"], 1);
        assert_eq!(body["update_access_agent"], true);
    }

    #[test]
    fn flatten_parses_disk_size_and_charging_mode() {
        let attributes = flatten_server(&json!({
            "name": "app-01",
            "product_info": {"product_id": "p-1", "system_disk_type": "SAS", "system_disk_size": "80"},
            "metadata": {"charging_mode": "0"}
        }));
        let root = attributes.get_map("root_volume").unwrap();
        assert_eq!(root.get_int("size"), Some(80));
        assert_eq!(attributes.get_str("charging_mode"), Some("postPaid"));
        assert_eq!(attributes.get_str("flavor_id"), Some("p-1"));
    }

    #[tokio::test]
    async fn create_reads_server_id_from_sub_job_and_patches_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/proj/app-servers/actions/create"))
            .and(body_partial_json(json!({"server_group_id": "g-1", "subscription_num": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/job/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "sub_jobs": [{"id": "s1", "status": "SUCCESS", "job_resource_info": {"resource_id": "srv-1"}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/v1/proj/app-servers/srv-1"))
            .and(body_json(json!({"name": "app-01"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let resource = server_resource().with_attribute("name", Value::from("app-01"));
        let id = AppServer.create(&client, &resource, TIMEOUT).await.unwrap();
        assert_eq!(id, "srv-1");
    }

    #[tokio::test]
    async fn prepaid_create_waits_for_order_resource() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/proj/app-servers/actions/create"))
            .and(body_partial_json(json!({
                "create_server_extend_param": {"charging_mode": "prePaid", "is_auto_pay": true}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"order_id": "ord-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/orders/customer-orders/details/ord-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"order_info": {"status": 5}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/orders/suscriptions/resources/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"resource_id": "srv-3"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/v1/proj/app-servers/srv-3"))
            .and(body_json(json!({"name": "app-03"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let resource = server_resource()
            .with_attribute("name", Value::from("app-03"))
            .with_attribute("charging_mode", Value::from("prePaid"))
            .with_attribute("period_unit", Value::from("month"))
            .with_attribute("period", Value::Int(1));
        let id = AppServer.create(&client, &resource, TIMEOUT).await.unwrap();
        assert_eq!(id, "srv-3");
    }

    #[tokio::test]
    async fn create_without_job_or_order_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let err = AppServer
            .create(&client, &server_resource(), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingField("/job_id")));
    }

    #[tokio::test]
    async fn create_surfaces_failed_sub_job_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job-2"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/job/job-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "sub_jobs": [{
                    "id": "s1", "status": "FAIL", "job_type": "CREATE_SERVER",
                    "fail_reason": "quota exceeded",
                    "job_resource_info": {"resource_id": "srv-2"}
                }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let err = AppServer
            .create(&client, &server_resource(), TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"), "{}", err);
    }

    #[tokio::test]
    async fn delete_without_job_still_waits_for_404() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/proj/app-servers/srv-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/proj/app-servers/srv-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "srv-1"})))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/proj/app-servers/srv-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let state = State::not_found(deskform_core::resource::ResourceId::new(
            "workspace_app_server",
            "app",
        ));
        let client = client_for(&server.uri());
        AppServer
            .delete(&client, "srv-1", &state, TIMEOUT)
            .await
            .unwrap();
    }
}
