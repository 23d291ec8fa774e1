//! workspace_app_image_server - a build server used to author APP images

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deskform_core::differ::AttributeChanges;
use deskform_core::provider::Timeouts;
use deskform_core::resource::{AttributeMap, Resource, State, Value};
use deskform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use serde_json::{Value as JsonValue, json};

use super::{WorkspaceResource, flatten_fields, opt_str, remove_nulls, timeouts_attribute};
use crate::client::{JsonExt, ServiceClient, required_str, with_query};
use crate::config::Service;
use crate::error::{ApiError, ApiResult};
use crate::jobs::wait_for_image_server_job_completed;
use crate::tags::expand_tags;

pub struct AppImageServer;

fn optional_int(attributes: &impl AttributeMap, key: &str) -> Option<i64> {
    attributes.get_int(key).filter(|v| *v != 0)
}

#[async_trait]
impl WorkspaceResource for AppImageServer {
    fn name(&self) -> &'static str {
        "workspace_app_image_server"
    }

    fn service(&self) -> Service {
        Service::AppStream
    }

    fn schema(&self) -> ResourceSchema {
        let force_new = |name: &str, attr_type: AttributeType| {
            AttributeSchema::new(name, attr_type).force_new()
        };
        ResourceSchema::new(self.name())
            .with_description("Workspace APP image server")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(force_new("flavor_id", AttributeType::String).required())
            .attribute(force_new("vpc_id", AttributeType::String).required())
            .attribute(force_new("subnet_id", AttributeType::String).required())
            .attribute(
                force_new(
                    "root_volume",
                    AttributeType::Struct(vec![
                        AttributeSchema::new("type", AttributeType::String).required(),
                        AttributeSchema::new("size", types::positive_int()).required(),
                    ]),
                )
                .required(),
            )
            .attribute(
                force_new(
                    "authorize_accounts",
                    AttributeType::List(Box::new(AttributeType::Struct(vec![
                        AttributeSchema::new("account", AttributeType::String).required(),
                        AttributeSchema::new("type", AttributeType::String).required(),
                        AttributeSchema::new("domain", AttributeType::String),
                    ]))),
                )
                .required(),
            )
            .attribute(force_new("image_id", AttributeType::String).required())
            .attribute(force_new("image_type", AttributeType::String).required())
            .attribute(force_new("spec_code", AttributeType::String).optional_computed())
            .attribute(force_new("image_source_product_id", AttributeType::String))
            .attribute(force_new("is_vdi", AttributeType::Bool))
            .attribute(force_new("availability_zone", AttributeType::String))
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(force_new("ou_name", AttributeType::String))
            .attribute(force_new("extra_session_type", AttributeType::String))
            .attribute(force_new("extra_session_size", AttributeType::Int))
            .attribute(force_new(
                "route_policy",
                AttributeType::Struct(vec![
                    AttributeSchema::new("max_session", AttributeType::Int),
                    AttributeSchema::new("cpu_threshold", AttributeType::Int),
                    AttributeSchema::new("mem_threshold", AttributeType::Int),
                ]),
            ))
            .attribute(force_new("tags", types::string_map()))
            .attribute(force_new("enterprise_project_id", AttributeType::String).optional_computed())
            .attribute(force_new(
                "scheduler_hints",
                AttributeType::Struct(vec![
                    AttributeSchema::new("dedicated_host_id", AttributeType::String),
                    AttributeSchema::new("tenancy", AttributeType::String),
                ]),
            ))
            .attribute(
                AttributeSchema::new("is_delete_associated_resources", AttributeType::Bool)
                    .with_description("Also delete the image and APP resources on destroy"),
            )
            .attribute(force_new("attach_apps", types::string_list()))
            .attribute(AttributeSchema::new("created_at", AttributeType::String).computed())
            .attribute(timeouts_attribute())
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::minutes(30, 20, 20)
    }

    async fn create(
        &self,
        client: &ServiceClient,
        resource: &Resource,
        timeout: Duration,
    ) -> ApiResult<String> {
        let body = remove_nulls(build_create_body(resource));
        let response = client.post("v1/{project_id}/image-servers", &body).await?;
        let job_id = required_str(&response, "/job_id")?;

        let outcome = wait_for_image_server_job_completed(client, job_id, timeout).await?;
        let server_id = outcome.resource_id().map(str::to_string);
        outcome.into_result(job_id)?;
        server_id.ok_or(ApiError::MissingField("/sub_jobs/0/job_resource_info/resource_id"))
    }

    async fn read(
        &self,
        client: &ServiceClient,
        identifier: &str,
    ) -> ApiResult<Option<HashMap<String, Value>>> {
        // Answers 200 with an empty list for unknown ids
        let path = with_query(
            "v1/{project_id}/image-servers",
            &[("server_id", identifier.to_string())],
        );
        let body = client.get(&path).await?;
        Ok(body.array_at("/items").first().map(flatten_image_server))
    }

    async fn update(
        &self,
        client: &ServiceClient,
        identifier: &str,
        changes: &AttributeChanges<'_>,
        to: &Resource,
        _timeout: Duration,
    ) -> ApiResult<()> {
        if !changes.has_changes(&["name", "description"]) {
            return Ok(());
        }
        let body = json!({
            "name": to.str_or_empty("name"),
            "description": to.str_or_empty("description"),
        });
        client
            .patch(&format!("v1/{{project_id}}/image-servers/{}", identifier), &body)
            .await?;
        Ok(())
    }

    async fn delete(
        &self,
        client: &ServiceClient,
        identifier: &str,
        state: &State,
        timeout: Duration,
    ) -> ApiResult<()> {
        let body = json!({
            "items": [identifier],
            "recursive": state.get_bool("is_delete_associated_resources").unwrap_or(false),
        });
        let response = match client
            .patch("v1/{project_id}/image-servers/actions/batch-delete", &body)
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let job_id = required_str(&response, "/job_id")?;
        wait_for_image_server_job_completed(client, job_id, timeout)
            .await?
            .into_result(job_id)?;
        Ok(())
    }
}

fn build_create_body(resource: &Resource) -> JsonValue {
    let accounts: Vec<JsonValue> = resource
        .get_list("authorize_accounts")
        .iter()
        .filter_map(Value::as_map)
        .map(|account| {
            json!({
                "account": account.str_or_empty("account"),
                "account_type": account.str_or_empty("type"),
                "domain": account.str_or_empty("domain"),
            })
        })
        .collect();

    json!({
        "name": resource.get_str("name"),
        "product_id": resource.get_str("flavor_id"),
        "vpc_id": resource.get_str("vpc_id"),
        "subnet_id": resource.get_str("subnet_id"),
        "root_volume": resource.get_map("root_volume").map(|v| json!({
            "type": v.get_str("type"),
            "size": v.get_int("size"),
        })),
        "authorize_accounts": accounts,
        "image_ref": {
            "id": resource.get_str("image_id"),
            "image_type": resource.get_str("image_type"),
            // Field name as spelled by the API
            "spce_code": opt_str(resource, "spec_code"),
            "product_id": opt_str(resource, "image_source_product_id"),
        },
        "is_vdi": resource.get_bool("is_vdi").unwrap_or(false),
        "availability_zone": opt_str(resource, "availability_zone"),
        "description": opt_str(resource, "description"),
        "ou_name": opt_str(resource, "ou_name"),
        "extra_session_type": opt_str(resource, "extra_session_type"),
        "extra_session_size": optional_int(resource, "extra_session_size"),
        "route_policy": resource.get_map("route_policy").map(|p| json!({
            "max_session": optional_int(p, "max_session"),
            "cpu_threshold": optional_int(p, "cpu_threshold"),
            "mem_threshold": optional_int(p, "mem_threshold"),
        })),
        "tags": resource.get_map("tags").map(expand_tags),
        "enterprise_project_id": opt_str(resource, "enterprise_project_id"),
        "scheduler_hints": resource.get_map("scheduler_hints").map(|h| json!({
            "dedicated_host_id": opt_str(h, "dedicated_host_id"),
            "tenancy": opt_str(h, "tenancy"),
        })),
        "attach_apps": resource.get_strings("attach_apps"),
    })
}

fn flatten_image_server(server: &JsonValue) -> HashMap<String, Value> {
    let mut attributes = HashMap::new();
    flatten_fields(
        server,
        &[
            ("name", "/name"),
            ("image_id", "/image_ref/id"),
            ("image_type", "/image_ref/image_type"),
            ("spec_code", "/image_ref/spce_code"),
            ("description", "/description"),
            ("enterprise_project_id", "/enterprise_project_id"),
            ("created_at", "/create_time"),
        ],
        &mut attributes,
    );

    let accounts: Vec<Value> = server
        .array_at("/authorize_accounts")
        .iter()
        .map(|account| {
            let mut flat = HashMap::new();
            flatten_fields(
                account,
                &[
                    ("account", "/account"),
                    ("type", "/account_type"),
                    ("domain", "/domain"),
                ],
                &mut flat,
            );
            Value::Map(flat)
        })
        .collect();
    if !accounts.is_empty() {
        attributes.insert("authorize_accounts".to_string(), Value::List(accounts));
    }
    attributes
}
