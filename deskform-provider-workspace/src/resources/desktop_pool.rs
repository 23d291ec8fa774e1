//! workspace_desktop_pool - a pool of identical desktops shared by
//! authorized users and groups

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deskform_core::differ::AttributeChanges;
use deskform_core::provider::Timeouts;
use deskform_core::resource::{AttributeMap, Resource, State, Value};
use deskform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use deskform_core::waiter::Refresh;
use log::{debug, warn};
use serde_json::{Value as JsonValue, json};

use super::{WorkspaceResource, flatten_fields, opt_str, remove_nulls, timeouts_attribute};
use crate::client::{JsonExt, ServiceClient, required_str, with_query};
use crate::config::Service;
use crate::error::{ApiError, ApiResult};
use crate::jobs::{
    PollTiming, wait_for_job_completed_with, wait_for_workspace_job_completed,
    wait_for_workspace_pool_status_completed, wait_until,
};
use crate::pagination::{DEFAULT_PAGE_LIMIT, list_by_offset, list_until_empty};
use crate::retry::{is_operation_conflict, retry_on};
use crate::tags::{expand_tags, flatten_tags};

/// The pool does not exist (returned as 400)
const POOL_NOT_FOUND_CODE: &str = "WKS.0001";

const POOL_DESKTOPS_TIMING: PollTiming = PollTiming::secs(5, 20);

/// Attributes applied through `PUT desktop-pools/{id}`
const BASIC_ATTRIBUTES: &[&str] = &[
    "name",
    "availability_zone",
    "disconnected_retention_period",
    "enable_autoscale",
    "autoscale_policy",
    "ou_name",
    "desktop_name_policy_id",
    "tags",
    "description",
    "in_maintenance_mode",
];

pub struct DesktopPool;

fn volume_type() -> AttributeType {
    AttributeType::Struct(vec![
        AttributeSchema::new("type", AttributeType::String).required(),
        AttributeSchema::new("size", types::positive_int()).required(),
        AttributeSchema::new("id", AttributeType::String).computed(),
    ])
}

fn authorized_object_type() -> AttributeType {
    AttributeType::Struct(vec![
        AttributeSchema::new("object_id", AttributeType::String).required(),
        AttributeSchema::new("object_type", types::string_enum(&["USER", "USER_GROUP"])).required(),
        AttributeSchema::new("object_name", AttributeType::String).required(),
        AttributeSchema::new("user_group", AttributeType::String).required(),
    ])
}

#[async_trait]
impl WorkspaceResource for DesktopPool {
    fn name(&self) -> &'static str {
        "workspace_desktop_pool"
    }

    fn service(&self) -> Service {
        Service::Workspace
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.name())
            .with_description("Workspace desktop pool")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("type", types::string_enum(&["DYNAMIC", "STATIC"]))
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("size", types::positive_int())
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("flavor_id", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("image_type", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("image_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("root_volume", volume_type())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("subnet_ids", types::string_list())
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("vpc_id", AttributeType::String).force_new())
            .attribute(AttributeSchema::new("security_groups", types::string_list()).force_new())
            .attribute(AttributeSchema::new(
                "data_volumes",
                AttributeType::List(Box::new(volume_type())),
            ))
            .attribute(AttributeSchema::new(
                "authorized_objects",
                AttributeType::List(Box::new(authorized_object_type())),
            ))
            .attribute(AttributeSchema::new("availability_zone", AttributeType::String))
            .attribute(
                AttributeSchema::new("disconnected_retention_period", AttributeType::Int)
                    .with_description("Disconnection retention period in minutes"),
            )
            .attribute(AttributeSchema::new("enable_autoscale", AttributeType::Bool))
            .attribute(AttributeSchema::new(
                "autoscale_policy",
                AttributeType::Struct(vec![
                    AttributeSchema::new("autoscale_type", AttributeType::String),
                    AttributeSchema::new("max_auto_created", AttributeType::Int),
                    AttributeSchema::new("min_idle", AttributeType::Int),
                    AttributeSchema::new("once_auto_created", AttributeType::Int),
                ]),
            ))
            .attribute(AttributeSchema::new("desktop_name_policy_id", AttributeType::String))
            .attribute(AttributeSchema::new("ou_name", AttributeType::String))
            .attribute(
                AttributeSchema::new("enterprise_project_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(AttributeSchema::new("tags", types::string_map()))
            .attribute(AttributeSchema::new("in_maintenance_mode", AttributeType::Bool))
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("created_time", AttributeType::String).computed())
            .attribute(AttributeSchema::new("desktop_used", AttributeType::Int).computed())
            .attribute(
                AttributeSchema::new(
                    "product",
                    AttributeType::Struct(vec![
                        AttributeSchema::new("flavor_id", AttributeType::String).computed(),
                        AttributeSchema::new("type", AttributeType::String).computed(),
                        AttributeSchema::new("cpu", AttributeType::String).computed(),
                        AttributeSchema::new("memory", AttributeType::String).computed(),
                        AttributeSchema::new("descriptions", AttributeType::String).computed(),
                        AttributeSchema::new("charging_mode", AttributeType::String).computed(),
                    ]),
                )
                .computed(),
            )
            .attribute(AttributeSchema::new("image_name", AttributeType::String).computed())
            .attribute(AttributeSchema::new("image_os_type", AttributeType::String).computed())
            .attribute(AttributeSchema::new("image_os_version", AttributeType::String).computed())
            .attribute(AttributeSchema::new("image_os_platform", AttributeType::String).computed())
            .attribute(timeouts_attribute())
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::minutes(20, 20, 20)
    }

    async fn create(
        &self,
        client: &ServiceClient,
        resource: &Resource,
        timeout: Duration,
    ) -> ApiResult<String> {
        let name = resource.str_or_empty("name");
        let body = remove_nulls(build_create_body(resource));
        let response = client.post("v2/{project_id}/desktop-pools", &body).await?;
        let job_id = required_str(&response, "/job_id")?.to_string();

        // The job only tracks the desktops, so the pool id comes from the
        // pool list once the pool itself is steady
        let pool_id = wait_for_workspace_pool_status_completed(client, name, timeout).await?;
        debug!("desktop pool {} created as {}", name, pool_id);

        wait_for_workspace_job_completed(client, &job_id, Some(&pool_id), timeout)
            .await?
            .into_result(&job_id)?;

        if resource.get_bool("in_maintenance_mode") == Some(true) {
            update_pool(client, &pool_id, &json!({"in_maintenance_mode": true})).await?;
        }
        Ok(pool_id)
    }

    async fn read(
        &self,
        client: &ServiceClient,
        identifier: &str,
    ) -> ApiResult<Option<HashMap<String, Value>>> {
        let pool = match get_pool(client, identifier).await {
            Ok(pool) => pool,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut attributes = flatten_pool(&pool);

        // The users API is not served in every region
        match list_authorized_objects(client, identifier).await {
            Ok(objects) => {
                attributes.insert("authorized_objects".to_string(), Value::List(objects));
            }
            Err(e) => warn!(
                "error retrieving associated users under desktop pool ({}): {}",
                identifier, e
            ),
        }
        Ok(Some(attributes))
    }

    async fn update(
        &self,
        client: &ServiceClient,
        identifier: &str,
        changes: &AttributeChanges<'_>,
        to: &Resource,
        timeout: Duration,
    ) -> ApiResult<()> {
        if changes.has_changes(BASIC_ATTRIBUTES) {
            let mut body = build_update_body(to);
            if changes.has_change("name") {
                body["name"] = json!(to.str_or_empty("name"));
            }
            update_pool(client, identifier, &body).await?;
        }

        if changes.has_change("data_volumes") {
            let old = list_maps(changes.old_value("data_volumes"));
            let new = to.get_list("data_volumes").iter().filter_map(Value::as_map).collect::<Vec<_>>();
            let (add, remove) = diff_data_volumes(&old, &new);
            debug!("data volumes to add: {:?}, to remove: {:?}", add, remove);
            if !remove.is_empty() {
                remove_data_volumes(client, identifier, &remove, timeout).await?;
            }
            if !add.is_empty() {
                add_data_volumes(client, identifier, &add, timeout).await?;
            }
        }

        if changes.has_change("flavor_id") {
            let path = format!("v2/{{project_id}}/desktop-pools/{}/resize", identifier);
            let body = json!({
                "product_id": to.str_or_empty("flavor_id"),
                "mode": "STOP_DESKTOP",
            });
            let response = retry_on(client, timeout, is_operation_conflict, || {
                client.post(&path, &body)
            })
            .await?;
            wait_for_pool_job(client, &response, timeout).await?;
        }

        if changes.has_change("authorized_objects") {
            let old = list_maps(changes.old_value("authorized_objects"));
            let new = to.get_list("authorized_objects").iter().filter_map(Value::as_map).collect::<Vec<_>>();
            let removed: Vec<_> = old.iter().filter(|o| !contains_object(&new, o)).copied().collect();
            let added: Vec<_> = new.iter().filter(|o| !contains_object(&old, o)).copied().collect();
            if !removed.is_empty() {
                update_authorized_objects(client, identifier, "REMOVE", &removed).await?;
            }
            if !added.is_empty() {
                update_authorized_objects(client, identifier, "ADD", &added).await?;
            }
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
        let pool = match get_pool(client, identifier).await {
            Ok(pool) => pool,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        // Auto-created desktops would reappear while the pool is emptied
        if pool.pointer("/enable_autoscale").and_then(JsonValue::as_bool) == Some(true) {
            update_pool(client, identifier, &json!({"enable_autoscale": false})).await?;
        }

        let desktop_ids: Vec<String> = list_pool_desktops(client, identifier)
            .await?
            .iter()
            .filter_map(|d| d.str_at("/desktop_id"))
            .map(str::to_string)
            .collect();
        if !desktop_ids.is_empty() {
            debug!(
                "deleting {} desktop(s) under desktop pool {}",
                desktop_ids.len(),
                identifier
            );
            let response = client
                .post(
                    "v2/{project_id}/desktops/batch-delete",
                    &json!({"desktop_ids": desktop_ids}),
                )
                .await?;
            let job_id = required_str(&response, "/job_id")?;
            wait_for_workspace_job_completed(client, job_id, None, timeout)
                .await?
                .into_result(job_id)?;
        }

        client
            .delete(&format!("v2/{{project_id}}/desktop-pools/{}", identifier))
            .await?;
        Ok(())
    }

    fn align(&self, current: &mut HashMap<String, Value>, desired: &HashMap<String, Value>) {
        let Some(Value::List(volumes)) = current.remove("data_volumes") else {
            return;
        };
        let ordered = order_volumes_like(volumes, desired.get_list("data_volumes"));
        current.insert("data_volumes".to_string(), Value::List(ordered));
    }
}

async fn get_pool(client: &ServiceClient, pool_id: &str) -> ApiResult<JsonValue> {
    client
        .get(&format!("v2/{{project_id}}/desktop-pools/{}", pool_id))
        .await
        .map_err(|e| e.convert_400_to_404(&[POOL_NOT_FOUND_CODE]))
}

async fn update_pool(client: &ServiceClient, pool_id: &str, body: &JsonValue) -> ApiResult<()> {
    client
        .put(&format!("v2/{{project_id}}/desktop-pools/{}", pool_id), body)
        .await?;
    Ok(())
}

fn build_volume(volume: &HashMap<String, Value>) -> JsonValue {
    json!({"type": volume.get_str("type"), "size": volume.get_int("size")})
}

fn build_authorized_object(object: &HashMap<String, Value>) -> JsonValue {
    json!({
        "object_id": object.get_str("object_id"),
        "object_type": object.get_str("object_type"),
        "object_name": object.get_str("object_name"),
        "user_group": object.get_str("user_group"),
    })
}

fn build_autoscale_policy(resource: &Resource) -> JsonValue {
    let Some(policy) = resource.get_map("autoscale_policy") else {
        return json!({});
    };
    remove_nulls(json!({
        "autoscale_type": opt_str(policy, "autoscale_type"),
        "max_auto_created": policy.get_int("max_auto_created").filter(|v| *v != 0),
        "min_idle": policy.get_int("min_idle").filter(|v| *v != 0),
        "once_auto_created": policy.get_int("once_auto_created").filter(|v| *v != 0),
    }))
}

fn build_create_body(resource: &Resource) -> JsonValue {
    let maps = |key: &str| -> Vec<&HashMap<String, Value>> {
        resource.get_list(key).iter().filter_map(Value::as_map).collect()
    };
    let security_groups: Vec<JsonValue> = resource
        .get_strings("security_groups")
        .into_iter()
        .map(|id| json!({"id": id}))
        .collect();

    json!({
        "name": resource.get_str("name"),
        "type": resource.get_str("type"),
        "size": resource.get_int("size"),
        "product_id": resource.get_str("flavor_id"),
        "image_type": resource.get_str("image_type"),
        "image_id": resource.get_str("image_id"),
        "root_volume": resource.get_map("root_volume").map(build_volume),
        "subnet_ids": resource.get_strings("subnet_ids"),
        "vpc_id": opt_str(resource, "vpc_id"),
        "security_groups": security_groups,
        "availability_zone": opt_str(resource, "availability_zone"),
        "data_volumes": maps("data_volumes").into_iter().map(build_volume).collect::<Vec<_>>(),
        "authorized_objects": maps("authorized_objects")
            .into_iter()
            .map(build_authorized_object)
            .collect::<Vec<_>>(),
        "disconnected_retention_period": resource.get_int("disconnected_retention_period").filter(|v| *v != 0),
        "enable_autoscale": resource.get_bool("enable_autoscale").unwrap_or(false),
        "autoscale_policy": build_autoscale_policy(resource),
        "desktop_name_policy_id": opt_str(resource, "desktop_name_policy_id"),
        "ou_name": opt_str(resource, "ou_name"),
        "tags": resource.get_map("tags").map(expand_tags),
        "enterprise_project_id": opt_str(resource, "enterprise_project_id"),
        "description": opt_str(resource, "description"),
    })
}

/// Full `PUT` body. Cleared strings are sent empty so the API clears them.
fn build_update_body(resource: &Resource) -> JsonValue {
    let mut body = json!({
        "availability_zone": resource.str_or_empty("availability_zone"),
        "enable_autoscale": resource.get_bool("enable_autoscale").unwrap_or(false),
        "ou_name": resource.str_or_empty("ou_name"),
        "desktop_name_policy_id": resource.str_or_empty("desktop_name_policy_id"),
        "description": resource.str_or_empty("description"),
        "in_maintenance_mode": resource.get_bool("in_maintenance_mode").unwrap_or(false),
        "autoscale_policy": build_autoscale_policy(resource),
    });
    if let Some(period) = resource
        .get_int("disconnected_retention_period")
        .filter(|v| *v != 0)
    {
        body["disconnected_retention_period"] = json!(period);
    }
    if let Some(tags) = resource.get_map("tags").filter(|t| !t.is_empty()) {
        body["tags"] = json!(expand_tags(tags));
    }
    body
}

fn flatten_volume(volume: &JsonValue) -> Value {
    let mut attributes = HashMap::new();
    flatten_fields(
        volume,
        &[("type", "/type"), ("size", "/size"), ("id", "/id")],
        &mut attributes,
    );
    Value::Map(attributes)
}

fn flatten_pool(pool: &JsonValue) -> HashMap<String, Value> {
    let mut attributes = HashMap::new();
    flatten_fields(
        pool,
        &[
            ("name", "/name"),
            ("type", "/type"),
            ("size", "/desktop_count"),
            ("flavor_id", "/product/product_id"),
            ("image_id", "/image_id"),
            ("availability_zone", "/availability_zone"),
            ("disconnected_retention_period", "/disconnected_retention_period"),
            ("enable_autoscale", "/enable_autoscale"),
            ("desktop_name_policy_id", "/desktop_name_policy_id"),
            ("enterprise_project_id", "/enterprise_project_id"),
            ("description", "/description"),
            ("in_maintenance_mode", "/in_maintenance_mode"),
            ("status", "/status"),
            ("created_time", "/created_time"),
            ("desktop_used", "/desktop_used"),
            ("image_name", "/image_name"),
            ("image_os_type", "/image_os_type"),
            ("image_os_version", "/image_os_version"),
            ("image_os_platform", "/image_os_platform"),
        ],
        &mut attributes,
    );

    if let Some(root) = pool.pointer("/root_volume") {
        attributes.insert("root_volume".to_string(), flatten_volume(root));
    }
    if let Some(subnet_id) = pool.str_at("/subnet_id") {
        attributes.insert(
            "subnet_ids".to_string(),
            Value::List(vec![Value::from(subnet_id)]),
        );
    }
    attributes.insert(
        "security_groups".to_string(),
        Value::List(
            pool.array_at("/security_groups")
                .iter()
                .filter_map(|sg| sg.str_at("/id"))
                .map(Value::from)
                .collect(),
        ),
    );
    attributes.insert(
        "data_volumes".to_string(),
        Value::List(pool.array_at("/data_volumes").iter().map(flatten_volume).collect()),
    );
    if let Some(policy) = flatten_autoscale_policy(pool.pointer("/autoscale_policy")) {
        attributes.insert("autoscale_policy".to_string(), policy);
    }
    if let Some(product) = pool.pointer("/product") {
        let mut flat = HashMap::new();
        flatten_fields(
            product,
            &[
                ("flavor_id", "/flavor_id"),
                ("type", "/type"),
                ("cpu", "/cpu"),
                ("memory", "/memory"),
                ("descriptions", "/descriptions"),
                ("charging_mode", "/charge_mode"),
            ],
            &mut flat,
        );
        attributes.insert("product".to_string(), Value::Map(flat));
    }
    attributes.insert(
        "tags".to_string(),
        Value::Map(flatten_tags(pool.array_at("/tags"))),
    );
    attributes
}

/// Some regions keep returning `once_auto_created` after the policy is
/// cleared; such a policy counts as unset
fn flatten_autoscale_policy(policy: Option<&JsonValue>) -> Option<Value> {
    let object = policy?.as_object()?;
    if object.is_empty() || (object.len() == 1 && object.contains_key("once_auto_created")) {
        return None;
    }
    let mut flat = HashMap::new();
    flatten_fields(
        policy?,
        &[
            ("autoscale_type", "/autoscale_type"),
            ("max_auto_created", "/max_auto_created"),
            ("min_idle", "/min_idle"),
            ("once_auto_created", "/once_auto_created"),
        ],
        &mut flat,
    );
    Some(Value::Map(flat))
}

async fn list_authorized_objects(client: &ServiceClient, pool_id: &str) -> ApiResult<Vec<Value>> {
    let path = format!("v2/{{project_id}}/desktop-pools/{}/users", pool_id);
    let objects = list_by_offset(client, &path, "objects", DEFAULT_PAGE_LIMIT).await?;
    Ok(objects
        .iter()
        .map(|object| {
            let mut flat = HashMap::new();
            flatten_fields(
                object,
                &[
                    ("object_id", "/object_id"),
                    ("object_type", "/object_type"),
                    ("object_name", "/object_name"),
                    ("user_group", "/user_group"),
                ],
                &mut flat,
            );
            Value::Map(flat)
        })
        .collect())
}

async fn list_pool_desktops(client: &ServiceClient, pool_id: &str) -> ApiResult<Vec<JsonValue>> {
    let path = with_query("v2/{project_id}/desktops", &[("pool_id", pool_id.to_string())]);
    list_until_empty(client, &path, "desktops").await
}

fn list_maps(value: Option<&Value>) -> Vec<&HashMap<String, Value>> {
    value
        .and_then(Value::as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_map)
        .collect()
}

fn same_volume(a: &HashMap<String, Value>, b: &HashMap<String, Value>) -> bool {
    a.get_int("size") == b.get_int("size") && a.get_str("type") == b.get_str("type")
}

/// Volumes to add and to remove, matching old and new volumes one to one
/// by size and type
fn diff_data_volumes<'a>(
    old: &[&'a HashMap<String, Value>],
    new: &[&'a HashMap<String, Value>],
) -> (Vec<&'a HashMap<String, Value>>, Vec<&'a HashMap<String, Value>>) {
    let mut add: Vec<&HashMap<String, Value>> = new.to_vec();
    let mut remove = Vec::new();
    for volume in old {
        match add.iter().position(|v| same_volume(v, volume)) {
            Some(index) => {
                add.remove(index);
            }
            None => remove.push(*volume),
        }
    }
    (add, remove)
}

/// Order remote volumes the way `configured` lists them; unmatched remote
/// volumes go last in their original order
fn order_volumes_like(mut volumes: Vec<Value>, configured: &[Value]) -> Vec<Value> {
    let mut ordered = Vec::with_capacity(volumes.len());
    for wanted in configured.iter().filter_map(Value::as_map) {
        let found = volumes.iter().position(|v| {
            v.as_map()
                .is_some_and(|remote| same_volume(remote, wanted))
        });
        if let Some(index) = found {
            ordered.push(volumes.remove(index));
        }
    }
    ordered.extend(volumes);
    ordered
}

fn contains_object(objects: &[&HashMap<String, Value>], object: &HashMap<String, Value>) -> bool {
    objects.iter().any(|o| {
        ["object_id", "object_type", "object_name", "user_group"]
            .iter()
            .all(|key| o.get_str(key) == object.get_str(key))
    })
}

async fn update_authorized_objects(
    client: &ServiceClient,
    pool_id: &str,
    action: &str,
    objects: &[&HashMap<String, Value>],
) -> ApiResult<()> {
    let body = json!({
        "action": action,
        "objects": objects.iter().map(|o| build_authorized_object(o)).collect::<Vec<_>>(),
    });
    client
        .post(&format!("v2/{{project_id}}/desktop-pools/{}/users", pool_id), &body)
        .await?;
    Ok(())
}

/// Generic job behind a pool operation; the desktops settle a moment after
/// the job, so the terminal status must be seen twice
async fn wait_for_pool_job(
    client: &ServiceClient,
    response: &JsonValue,
    timeout: Duration,
) -> ApiResult<()> {
    let job_id = required_str(response, "/job_id")?;
    wait_for_job_completed_with(client, job_id, timeout, 2)
        .await?
        .into_result(job_id)?;
    Ok(())
}

async fn remove_data_volumes(
    client: &ServiceClient,
    pool_id: &str,
    volumes: &[&HashMap<String, Value>],
    timeout: Duration,
) -> ApiResult<()> {
    let path = format!("v2/{{project_id}}/desktop-pools/{}/volumes/batch-delete", pool_id);
    let items: Vec<JsonValue> = volumes
        .iter()
        .map(|v| json!({"id": v.get_str("id"), "type": v.get_str("type"), "size": v.get_int("size")}))
        .collect();
    let body = json!({"volumes": items});
    let response = retry_on(client, timeout, is_operation_conflict, || {
        client.post(&path, &body)
    })
    .await?;
    wait_for_pool_job(client, &response, timeout).await
}

async fn add_data_volumes(
    client: &ServiceClient,
    pool_id: &str,
    volumes: &[&HashMap<String, Value>],
    timeout: Duration,
) -> ApiResult<()> {
    // Volumes can only be attached while every desktop is running
    wait_for_pool_desktops_active(client, pool_id, timeout).await?;

    let path = format!("v2/{{project_id}}/desktop-pools/{}/volumes/batch-add", pool_id);
    let items: Vec<JsonValue> = volumes.iter().map(|v| build_volume(v)).collect();
    let response = client.post(&path, &json!({"volumes": items})).await?;
    wait_for_pool_job(client, &response, timeout).await
}

async fn wait_for_pool_desktops_active(
    client: &ServiceClient,
    pool_id: &str,
    timeout: Duration,
) -> ApiResult<()> {
    let waiter = POOL_DESKTOPS_TIMING.waiter(client, &["PENDING"], &["COMPLETED"], timeout);
    wait_until(&waiter, || async move {
        let desktops = list_pool_desktops(client, pool_id).await?;
        let mut state = "COMPLETED";
        for status in desktops.iter().map(|d| d.str_at("/status").unwrap_or_default()) {
            if status == "ERROR" {
                return Err(ApiError::Validation(format!(
                    "desktop under desktop pool ({}) entered unexpected status (ERROR)",
                    pool_id
                )));
            }
            if status != "ACTIVE" {
                state = "PENDING";
            }
        }
        Ok(Refresh::found(desktops, state))
    })
    .await?;
    Ok(())
}
