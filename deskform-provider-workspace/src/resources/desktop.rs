//! workspace_desktop - a dedicated cloud desktop assigned to one user

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deskform_core::differ::AttributeChanges;
use deskform_core::provider::Timeouts;
use deskform_core::resource::{AttributeMap, Resource, State, Value};
use deskform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use log::{debug, error, warn};
use serde_json::{Value as JsonValue, json};

use super::{WorkspaceResource, flatten_fields, opt_str, remove_nulls, timeouts_attribute};
use crate::client::{JsonExt, ServiceClient, required_str, with_query};
use crate::config::Service;
use crate::error::{ApiError, ApiResult};
use crate::jobs::{PollTiming, wait_for_workspace_job_completed, wait_until};
use crate::retry::{is_volume_busy, retry_on};
use crate::tags::{expand_tags, flatten_tags, update_resource_tags};
use deskform_core::waiter::Refresh;

const DESKTOP_STATUS_TIMING: PollTiming = PollTiming::secs(10, 10);

/// Power actions and the desktop status each one ends in
const POWER_ACTIONS: &[(&str, &str)] = &[
    ("os-start", "ACTIVE"),
    ("os-stop", "SHUTOFF"),
    ("reboot", "ACTIVE"),
    ("os-hibernate", "HIBERNATED"),
];

const QOS_VOLUME_TYPE: &str = "GPSSD2";

pub struct Desktop;

fn volume_type() -> AttributeType {
    AttributeType::Struct(vec![
        AttributeSchema::new("type", AttributeType::String).required(),
        AttributeSchema::new("size", types::positive_int()).required(),
        AttributeSchema::new("iops", AttributeType::Int).optional_computed(),
        AttributeSchema::new("throughput", AttributeType::Int).optional_computed(),
        AttributeSchema::new("kms_id", AttributeType::String).optional_computed(),
        AttributeSchema::new("id", AttributeType::String).computed(),
        AttributeSchema::new("name", AttributeType::String).computed(),
        AttributeSchema::new("device", AttributeType::String).computed(),
        AttributeSchema::new("created_at", AttributeType::String).computed(),
    ])
}

#[async_trait]
impl WorkspaceResource for Desktop {
    fn name(&self) -> &'static str {
        "workspace_desktop"
    }

    fn service(&self) -> Service {
        Service::Workspace
    }

    fn schema(&self) -> ResourceSchema {
        let power_actions: Vec<&str> = POWER_ACTIONS.iter().map(|(a, _)| *a).collect();
        ResourceSchema::new(self.name())
            .with_description("Dedicated Workspace desktop")
            .attribute(AttributeSchema::new("flavor_id", AttributeType::String).required())
            .attribute(
                AttributeSchema::new(
                    "image_type",
                    types::string_enum(&["market", "gold", "private"]),
                )
                .required(),
            )
            .attribute(AttributeSchema::new("image_id", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("vpc_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("user_name", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("user_email", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "user_group",
                    types::string_enum(&["sudo", "default", "administrators", "users"]),
                )
                .required()
                .force_new(),
            )
            .attribute(AttributeSchema::new("root_volume", volume_type()).required())
            .attribute(
                AttributeSchema::new("data_volume", AttributeType::List(Box::new(volume_type())))
                    .optional_computed(),
            )
            .attribute(
                AttributeSchema::new("availability_zone", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("security_groups", types::string_list()).optional_computed(),
            )
            .attribute(
                AttributeSchema::new(
                    "nic",
                    AttributeType::List(Box::new(AttributeType::Struct(vec![
                        AttributeSchema::new("network_id", AttributeType::String).required(),
                    ]))),
                )
                .optional_computed(),
            )
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("email_notification", AttributeType::Bool).force_new())
            .attribute(AttributeSchema::new("tags", types::string_map()))
            .attribute(
                AttributeSchema::new("enterprise_project_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("delete_user", AttributeType::Bool)
                    .with_description("Also delete the desktop user on destroy"),
            )
            .attribute(
                AttributeSchema::new("power_action", types::string_enum(&power_actions))
                    .optional_computed(),
            )
            .attribute(AttributeSchema::new("power_action_type", AttributeType::String))
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(timeouts_attribute())
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::minutes(30, 30, 20)
    }

    async fn create(
        &self,
        client: &ServiceClient,
        resource: &Resource,
        timeout: Duration,
    ) -> ApiResult<String> {
        let body = remove_nulls(build_create_body(resource));
        let response = client.post("v2/{project_id}/desktops", &body).await?;
        let job_id = required_str(&response, "/job_id")?.to_string();

        let job = wait_for_workspace_job_completed(client, &job_id, None, timeout)
            .await?
            .into_result(&job_id)?;
        let desktop_id = required_str(&job, "/entities/desktop_id")?.to_string();

        if let Some(action) = resource.get_str("power_action") {
            if action == "os-start" {
                warn!("the power action (os-start) is invalid after desktop created");
            } else {
                apply_power_action(
                    client,
                    &desktop_id,
                    action,
                    resource.get_str("power_action_type"),
                    timeout,
                )
                .await?;
            }
        }
        Ok(desktop_id)
    }

    async fn read(
        &self,
        client: &ServiceClient,
        identifier: &str,
    ) -> ApiResult<Option<HashMap<String, Value>>> {
        let desktop = match get_desktop(client, identifier).await {
            Ok(desktop) => desktop,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(flatten_desktop(client, identifier, &desktop).await))
    }

    async fn update(
        &self,
        client: &ServiceClient,
        identifier: &str,
        changes: &AttributeChanges<'_>,
        to: &Resource,
        timeout: Duration,
    ) -> ApiResult<()> {
        if changes.has_change("flavor_id") {
            let body = json!({
                "desktops": [{"desktop_id": identifier}],
                "product_id": to.str_or_empty("flavor_id"),
                "mode": "STOP_DESKTOP",
            });
            let response = client.post("v2/{project_id}/desktops/resize", &body).await?;
            wait_for_job_in(client, &response, timeout).await?;
        }

        if changes.has_changes(&["image_type", "image_id"]) {
            let body = json!({
                "desktop_ids": [identifier],
                "image_type": to.str_or_empty("image_type"),
                "image_id": to.str_or_empty("image_id"),
            });
            let response = client.post("v2/{project_id}/desktops/rebuild", &body).await?;
            wait_for_job_in(client, &response, timeout).await?;
        }

        if changes.has_changes(&["root_volume", "data_volume"]) {
            let old_root: Vec<&HashMap<String, Value>> =
                changes.old_value("root_volume").and_then(Value::as_map).into_iter().collect();
            let new_root: Vec<&HashMap<String, Value>> =
                to.get_map("root_volume").into_iter().collect();
            update_volumes(client, identifier, &old_root, &new_root, timeout).await?;

            let old_data = volume_maps(changes.old_value("data_volume"));
            let new_data = volume_maps(to.attr("data_volume"));
            update_volumes(client, identifier, &old_data, &new_data, timeout).await?;
        }

        if changes.has_change("tags") {
            let empty = HashMap::new();
            update_resource_tags(
                client,
                "desktops",
                identifier,
                changes.old_value("tags").and_then(Value::as_map).unwrap_or(&empty),
                to.get_map("tags").unwrap_or(&empty),
            )
            .await?;
        }

        if changes.has_changes(&["nic", "security_groups", "vpc_id"])
            && let Some(network_id) = first_network_id(to)
        {
            let body = json!({
                "vpc_id": to.str_or_empty("vpc_id"),
                "subnet_id": network_id,
                "security_group_ids": to.get_strings("security_groups"),
            });
            let path = format!("v2/{{project_id}}/desktops/{}/networks", identifier);
            let response = client.put(&path, &body).await?;
            wait_for_job_in(client, &response, timeout).await?;
        }

        if changes.has_change("power_action")
            && let Some(action) = to.get_str("power_action")
        {
            apply_power_action(
                client,
                identifier,
                action,
                to.get_str("power_action_type"),
                timeout,
            )
            .await?;
        }
        Ok(())
    }

    async fn delete(
        &self,
        client: &ServiceClient,
        identifier: &str,
        state: &State,
        timeout: Duration,
    ) -> ApiResult<()> {
        let delete_user = state.get_bool("delete_user").unwrap_or(false);
        let path = with_query(
            &format!("v2/{{project_id}}/desktops/{}", identifier),
            &[
                ("delete_users", delete_user.to_string()),
                (
                    "email_notification",
                    state.get_bool("email_notification").unwrap_or(false).to_string(),
                ),
            ],
        );
        match client.delete(&path).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }

        wait_for_desktop_deleted(client, identifier, timeout).await?;

        if delete_user {
            wait_for_desktop_user_deleted(client, state.str_or_empty("user_name"), timeout).await?;
        }
        Ok(())
    }
}

/// `desktop` object of `GET v2/{project_id}/desktops/{id}`
pub async fn get_desktop(client: &ServiceClient, desktop_id: &str) -> ApiResult<JsonValue> {
    let body = client
        .get(&format!("v2/{{project_id}}/desktops/{}", desktop_id))
        .await?;
    body.get("desktop")
        .cloned()
        .ok_or(ApiError::MissingField("desktop"))
}

fn build_volume(volume: &HashMap<String, Value>) -> JsonValue {
    json!({
        "type": volume.get_str("type"),
        "size": volume.get_int("size"),
        "iops": volume.get_int("iops").filter(|v| *v > 0),
        "throughput": volume.get_int("throughput").filter(|v| *v > 0),
        "kms_id": opt_str(volume, "kms_id"),
    })
}

fn build_create_body(resource: &Resource) -> JsonValue {
    let data_volumes: Vec<JsonValue> = volume_maps(resource.attr("data_volume"))
        .into_iter()
        .map(build_volume)
        .collect();
    let nics: Vec<JsonValue> = resource
        .get_list("nic")
        .iter()
        .filter_map(Value::as_map)
        .map(|nic| json!({"subnet_id": nic.get_str("network_id")}))
        .collect();
    let security_groups: Vec<JsonValue> = resource
        .get_strings("security_groups")
        .into_iter()
        .map(|id| json!({"id": id}))
        .collect();

    json!({
        "desktops": [{
            "user_name": resource.get_str("user_name"),
            "user_email": resource.get_str("user_email"),
            "user_group": resource.get_str("user_group"),
            "computer_name": opt_str(resource, "name"),
        }],
        "desktop_type": "DEDICATED",
        "product_id": resource.get_str("flavor_id"),
        "root_volume": resource.get_map("root_volume").map(build_volume),
        "availability_zone": opt_str(resource, "availability_zone"),
        "image_type": resource.get_str("image_type"),
        "image_id": resource.get_str("image_id"),
        "vpc_id": resource.get_str("vpc_id"),
        "email_notification": resource.get_bool("email_notification"),
        "data_volumes": data_volumes,
        "nics": nics,
        "security_groups": security_groups,
        "tags": resource.get_map("tags").map(expand_tags),
        "enterprise_project_id": opt_str(resource, "enterprise_project_id"),
    })
}

fn flatten_volume(volume: &JsonValue) -> Value {
    let mut attributes = HashMap::new();
    flatten_fields(
        volume,
        &[
            ("type", "/type"),
            ("size", "/size"),
            ("iops", "/iops"),
            ("throughput", "/throughput"),
            ("kms_id", "/kms_id"),
            ("id", "/volume_id"),
            ("name", "/display_name"),
            ("device", "/device"),
            ("created_at", "/create_time"),
        ],
        &mut attributes,
    );
    Value::Map(attributes)
}

async fn flatten_desktop(
    client: &ServiceClient,
    desktop_id: &str,
    desktop: &JsonValue,
) -> HashMap<String, Value> {
    let mut attributes = HashMap::new();
    flatten_fields(
        desktop,
        &[
            ("flavor_id", "/product/product_id"),
            ("user_name", "/user_name"),
            ("user_group", "/user_group"),
            ("availability_zone", "/availability_zone"),
            ("enterprise_project_id", "/enterprise_project_id"),
            ("status", "/status"),
            ("name", "/computer_name"),
            ("image_id", "/metadata/metering.image_id"),
        ],
        &mut attributes,
    );

    if let Some(root) = desktop.pointer("/root_volume") {
        attributes.insert("root_volume".to_string(), flatten_volume(root));
    }

    // The API returns data volumes unordered
    let mut data_volumes: Vec<&JsonValue> = desktop.array_at("/data_volumes").iter().collect();
    data_volumes.sort_by_key(|v| v.str_at("/device").unwrap_or_default().to_string());
    attributes.insert(
        "data_volume".to_string(),
        Value::List(data_volumes.into_iter().map(flatten_volume).collect()),
    );

    let security_groups: Vec<Value> = desktop
        .array_at("/security_groups")
        .iter()
        .filter_map(|sg| sg.str_at("/id"))
        .map(Value::from)
        .collect();
    if !security_groups.is_empty() {
        attributes.insert("security_groups".to_string(), Value::List(security_groups));
    }

    attributes.insert(
        "tags".to_string(),
        Value::Map(flatten_tags(desktop.array_at("/tags"))),
    );

    // Not every region serves the network API
    match get_desktop_network_id(client, desktop_id).await {
        Ok(network_id) => {
            let nic = HashMap::from([("network_id".to_string(), Value::String(network_id))]);
            attributes.insert("nic".to_string(), Value::List(vec![Value::Map(nic)]));
        }
        Err(e) => error!("error getting desktop network info: {}", e),
    }

    attributes
}

async fn get_desktop_network_id(client: &ServiceClient, desktop_id: &str) -> ApiResult<String> {
    let body = client
        .get(&format!("v2/{{project_id}}/desktops/{}/networks", desktop_id))
        .await?;
    body.array_at("/network_infos")
        .first()
        .and_then(|info| info.str_at("/subnet_info/id"))
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "network information under Workspace desktop ({})",
                desktop_id
            ))
        })
}

fn first_network_id(resource: &Resource) -> Option<&str> {
    resource
        .get_list("nic")
        .first()
        .and_then(Value::as_map)
        .and_then(|nic| nic.get_str("network_id"))
}

fn volume_maps(value: Option<&Value>) -> Vec<&HashMap<String, Value>> {
    value
        .and_then(Value::as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_map)
        .collect()
}

/// Wait for the workspace job named by `job_id` in a response
async fn wait_for_job_in(
    client: &ServiceClient,
    response: &JsonValue,
    timeout: Duration,
) -> ApiResult<JsonValue> {
    let job_id = required_str(response, "/job_id")?;
    let job = wait_for_workspace_job_completed(client, job_id, None, timeout)
        .await?
        .into_result(job_id)?;
    Ok(job)
}

/// Reject volume changes the API cannot apply
fn check_volume_changes(
    old: &[&HashMap<String, Value>],
    new: &[&HashMap<String, Value>],
) -> ApiResult<()> {
    if new.len() < old.len() {
        return Err(ApiError::Validation(
            "the number of volumes cannot be reduced".to_string(),
        ));
    }

    let mut errors = Vec::new();
    for (old_volume, new_volume) in old.iter().zip(new) {
        let name = old_volume.str_or_empty("name");
        if new_volume.get_str("type") != old_volume.get_str("type") {
            errors.push("volume type does not support updates".to_string());
        }
        let (old_size, new_size) = (
            old_volume.get_int("size").unwrap_or(0),
            new_volume.get_int("size").unwrap_or(0),
        );
        if new_size < old_size {
            errors.push(format!(
                "volume ({}) size (old:{}, new:{}) cannot be smaller than the size before the change",
                name, old_size, new_size
            ));
        }
        if new_volume.get_str("type") != Some(QOS_VOLUME_TYPE) && qos_changed(old_volume, new_volume) {
            errors.push(format!(
                "the type of the volume ({}) is not {}, cannot set QoS options",
                name, QOS_VOLUME_TYPE
            ));
        }
    }

    for (index, volume) in new.iter().enumerate().skip(old.len()) {
        let has_qos = volume.get_int("iops").is_some_and(|v| v > 0)
            && volume.get_int("throughput").is_some_and(|v| v > 0);
        if volume.get_str("type") == Some(QOS_VOLUME_TYPE) && !has_qos {
            errors.push(format!(
                "the type of the volume (index number: {}) is {}, iops and throughput cannot be empty",
                index, QOS_VOLUME_TYPE
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors.join("; ")))
    }
}

/// An unset desired iops/throughput keeps the current value
fn qos_changed(old: &HashMap<String, Value>, new: &HashMap<String, Value>) -> bool {
    ["iops", "throughput"]
        .iter()
        .any(|key| new.get_int(key).is_some_and(|v| Some(v) != old.get_int(key)))
}

async fn update_volumes(
    client: &ServiceClient,
    desktop_id: &str,
    old: &[&HashMap<String, Value>],
    new: &[&HashMap<String, Value>],
    timeout: Duration,
) -> ApiResult<()> {
    check_volume_changes(old, new)?;

    if new.len() > old.len() {
        let volumes: Vec<JsonValue> = new[old.len()..].iter().map(|v| build_volume(v)).collect();
        let body = remove_nulls(json!({
            "addDesktopVolumesReq": [{"desktop_id": desktop_id, "volumes": volumes}]
        }));
        let response = retry_on(client, timeout, is_volume_busy, || {
            client.post("v2/{project_id}/volumes", &body)
        })
        .await?;
        wait_for_job_in(client, &response, timeout).await?;
    }

    let expansions: Vec<JsonValue> = old
        .iter()
        .zip(new)
        .filter(|(o, n)| n.get_int("size").unwrap_or(0) > o.get_int("size").unwrap_or(0))
        .map(|(o, n)| {
            json!({
                "desktop_id": desktop_id,
                "volume_id": o.get_str("id"),
                "new_size": n.get_int("size"),
            })
        })
        .collect();
    if !expansions.is_empty() {
        debug!("expanding {} volume(s) of desktop {}", expansions.len(), desktop_id);
        let body = json!({"desktop_volumes_expansion": expansions});
        let response = client.post("v2/{project_id}/volumes/expand", &body).await?;
        wait_for_job_in(client, &response, timeout).await?;
    }

    for (o, n) in old.iter().zip(new) {
        if n.get_str("type") != Some(QOS_VOLUME_TYPE) || !qos_changed(o, n) {
            continue;
        }
        let body = json!({
            "volume_ids": [o.get_str("id")],
            "qos": {
                "iops": n.get_int("iops").or(o.get_int("iops")),
                "throughput": n.get_int("throughput").or(o.get_int("throughput")),
            },
        });
        let response = client
            .put("v2/{project_id}/volumes/batch-modify-qos", &body)
            .await?;
        wait_for_job_in(client, &response, timeout).await?;
    }
    Ok(())
}

/// Run a power action and wait until the desktop settles in the matching status
async fn apply_power_action(
    client: &ServiceClient,
    desktop_id: &str,
    action: &str,
    action_type: Option<&str>,
    timeout: Duration,
) -> ApiResult<()> {
    let Some((_, expected)) = POWER_ACTIONS.iter().find(|(a, _)| *a == action) else {
        return Err(ApiError::Validation(format!("unknown power action ({})", action)));
    };

    let body = remove_nulls(json!({
        "desktop_ids": [desktop_id],
        "op_type": action,
        "type": action_type,
    }));
    let response = client.post("v2/{project_id}/desktops/action", &body).await?;
    if response.str_at("/job_id").is_some() {
        wait_for_job_in(client, &response, timeout).await?;
    }

    // Reboot ends in ACTIVE as well, so require the status twice in a row
    let waiter = DESKTOP_STATUS_TIMING
        .waiter(client, &["PENDING"], &["COMPLETED"], timeout)
        .continuous_target_occurrence(2);
    wait_until(&waiter, || async move {
        let desktop = get_desktop(client, desktop_id).await?;
        let task_status = desktop.str_at("/task_status").unwrap_or_default();
        let status = desktop.str_at("/status").unwrap_or_default();
        if task_status.is_empty() && status == *expected {
            Ok(Refresh::found(desktop, "COMPLETED"))
        } else {
            Ok(Refresh::found(desktop, "PENDING"))
        }
    })
    .await
    .map_err(|e| {
        ApiError::Validation(format!(
            "error waiting for power action ({}) for desktop ({}): {}",
            action, desktop_id, e
        ))
    })?;
    Ok(())
}

async fn wait_for_desktop_deleted(
    client: &ServiceClient,
    desktop_id: &str,
    timeout: Duration,
) -> ApiResult<()> {
    let waiter = DESKTOP_STATUS_TIMING.waiter(
        client,
        &["ACTIVE", "DELETING", "SHUTOFF", "HIBERNATED"],
        &["DELETED"],
        timeout,
    );
    wait_until(&waiter, || async move {
        match get_desktop(client, desktop_id).await {
            Err(e) if e.is_not_found() => Ok(Refresh::found(JsonValue::Null, "DELETED")),
            Err(e) => Err(e),
            Ok(desktop) => {
                // The status is empty while the underlying server is being removed
                let status = match desktop.str_at("/status").unwrap_or_default() {
                    "" => "DELETING".to_string(),
                    status => status.to_uppercase(),
                };
                Ok(Refresh::found(desktop, status))
            }
        }
    })
    .await?;
    Ok(())
}

async fn wait_for_desktop_user_deleted(
    client: &ServiceClient,
    user_name: &str,
    timeout: Duration,
) -> ApiResult<()> {
    let path = with_query("v2/{project_id}/users", &[("user_name", user_name.to_string())]);
    let waiter = DESKTOP_STATUS_TIMING.waiter(client, &["ACTIVE"], &["DELETED"], timeout);
    wait_until(&waiter, || {
        let path = path.clone();
        async move {
            let body = client.get(&path).await?;
            let state = if body.array_at("/users").is_empty() {
                "DELETED"
            } else {
                "ACTIVE"
            };
            Ok(Refresh::found(body, state))
        }
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::client_for;
    use deskform_core::differ::{Diff, diff};
    use deskform_core::resource::ResourceId;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn volume(kind: &str, size: i64) -> HashMap<String, Value> {
        HashMap::from([
            ("type".to_string(), Value::from(kind)),
            ("size".to_string(), Value::Int(size)),
        ])
    }

    fn desktop_resource() -> Resource {
        Resource::new("workspace_desktop", "dev")
            .with_attribute("flavor_id", Value::from("workspace.x86.ultimate.large2"))
            .with_attribute("image_type", Value::from("market"))
            .with_attribute("image_id", Value::from("img-1"))
            .with_attribute("vpc_id", Value::from("vpc-1"))
            .with_attribute("user_name", Value::from("alice"))
            .with_attribute("user_email", Value::from("alice@example.com"))
            .with_attribute("user_group", Value::from("users"))
            .with_attribute("root_volume", Value::Map(volume("SSD", 80)))
            .with_attribute(
                "nic",
                Value::List(vec![Value::Map(HashMap::from([(
                    "network_id".to_string(),
                    Value::from("subnet-1"),
                )]))]),
            )
    }

    #[test]
    fn schema_accepts_minimal_desktop() {
        assert!(Desktop.schema().validate(&desktop_resource().attributes).is_ok());
    }

    #[test]
    fn moving_enterprise_project_replaces_desktop() {
        let schema = Desktop.schema();
        let current = State::existing(
            ResourceId::new("workspace_desktop", "dev"),
            HashMap::from([("enterprise_project_id".to_string(), Value::from("0"))]),
        );
        let desired = Resource::new("workspace_desktop", "dev")
            .with_attribute("enterprise_project_id", Value::from("ep-2"));
        assert!(matches!(
            diff(&desired, &current, Some(&schema)),
            Diff::Replace { ref changed_attributes, .. }
                if changed_attributes == &vec!["enterprise_project_id".to_string()]
        ));
    }

    #[test]
    fn create_body_shape() {
        let body = remove_nulls(build_create_body(&desktop_resource()));
        assert_eq!(body["desktop_type"], "DEDICATED");
        assert_eq!(body["product_id"], "workspace.x86.ultimate.large2");
        assert_eq!(body["desktops"][0]["user_name"], "alice");
        assert_eq!(body["root_volume"], json!({"type": "SSD", "size": 80}));
        assert_eq!(body["nics"], json!([{"subnet_id": "subnet-1"}]));
        assert!(body.get("data_volumes").is_none());
        assert!(body.get("computer_name").is_none());
    }

    #[test]
    fn volume_changes_are_validated() {
        let old = volume("SAS", 100);
        let smaller = volume("SAS", 50);
        let err = check_volume_changes(&[&old], &[&smaller]).unwrap_err();
        assert!(err.to_string().contains("cannot be smaller"));

        let retyped = volume("SSD", 100);
        assert!(check_volume_changes(&[&old], &[&retyped]).is_err());

        assert!(check_volume_changes(&[&old], &[]).is_err());

        let mut qos = volume("SAS", 100);
        qos.insert("iops".to_string(), Value::Int(5000));
        let err = check_volume_changes(&[&old], &[&qos]).unwrap_err();
        assert!(err.to_string().contains("cannot set QoS"));

        let new_gpssd2 = volume("GPSSD2", 100);
        let err = check_volume_changes(&[&old], &[&old, &new_gpssd2]).unwrap_err();
        assert!(err.to_string().contains("index number: 1"));

        let grown = volume("SAS", 200);
        assert!(check_volume_changes(&[&old], &[&grown]).is_ok());
    }

    #[tokio::test]
    async fn create_waits_for_job_and_returns_desktop_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/proj/desktops"))
            .and(body_partial_json(json!({"desktop_type": "DEDICATED", "image_id": "img-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/workspace-sub-jobs"))
            .and(query_param("job_id", "job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobs": [{"id": "s1", "status": "SUCCESS", "entities": {"desktop_id": "d-1"}}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let id = Desktop
            .create(&client, &desktop_resource(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(id, "d-1");
    }

    #[tokio::test]
    async fn read_flattens_desktop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/desktops/d-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "desktop": {
                    "computer_name": "dev-01",
                    "user_name": "alice",
                    "user_group": "users",
                    "status": "ACTIVE",
                    "product": {"product_id": "flavor-1"},
                    "metadata": {"metering.image_id": "img-1"},
                    "root_volume": {"type": "SSD", "size": 80, "volume_id": "v-root", "device": "/dev/vda"},
                    "data_volumes": [
                        {"type": "SAS", "size": 20, "volume_id": "v-c", "device": "/dev/vdc"},
                        {"type": "SAS", "size": 10, "volume_id": "v-b", "device": "/dev/vdb"}
                    ],
                    "security_groups": [{"id": "sg-1"}],
                    "tags": [{"key": "env", "value": "dev"}]
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/desktops/d-1/networks"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let attributes = Desktop.read(&client, "d-1").await.unwrap().unwrap();
        assert_eq!(attributes.get_str("flavor_id"), Some("flavor-1"));
        assert_eq!(attributes.get_str("image_id"), Some("img-1"));
        assert_eq!(attributes.get_str("name"), Some("dev-01"));
        let data = attributes.get_list("data_volume");
        assert_eq!(data[0].as_map().unwrap().get_str("id"), Some("v-b"));
        assert_eq!(attributes.get_strings("security_groups"), vec!["sg-1"]);
        assert!(attributes.get("nic").is_none());
    }

    #[tokio::test]
    async fn read_missing_desktop_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error_code": "WKS.0002", "error_msg": "desktop not found"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        assert!(Desktop.read(&client, "gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_waits_for_removal_and_user() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v2/proj/desktops/d-1"))
            .and(query_param("delete_users", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job-9"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/desktops/d-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"desktop": {"status": ""}})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/desktops/d-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/users"))
            .and(query_param("user_name", "alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"users": []})))
            .expect(1)
            .mount(&server)
            .await;

        let state = State::existing(
            deskform_core::resource::ResourceId::new("workspace_desktop", "dev"),
            HashMap::from([
                ("delete_user".to_string(), Value::Bool(true)),
                ("user_name".to_string(), Value::from("alice")),
            ]),
        );
        let client = client_for(&server.uri());
        Desktop.delete(&client, "d-1", &state, TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn power_action_waits_for_target_status_twice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/proj/desktops/action"))
            .and(body_partial_json(json!({"op_type": "os-stop", "desktop_ids": ["d-1"]})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/desktops/d-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "desktop": {"status": "SHUTOFF", "task_status": ""}
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        apply_power_action(&client, "d-1", "os-stop", None, TIMEOUT)
            .await
            .unwrap();
    }
}
