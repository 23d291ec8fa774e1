//! workspace_service - registration of the Workspace service in a project
//!
//! There is a single service per project, so every endpoint here is
//! project-scoped and the identifier is only used for import and display.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deskform_core::differ::AttributeChanges;
use deskform_core::provider::Timeouts;
use deskform_core::resource::{AttributeMap, Resource, State, Value};
use deskform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use deskform_core::waiter::Refresh;
use log::debug;
use serde_json::{Value as JsonValue, json};

use super::{WorkspaceResource, flatten_fields, is_uuid, opt_str, remove_nulls, timeouts_attribute};
use crate::client::{JsonExt, ServiceClient, required_str};
use crate::config::Service;
use crate::error::{ApiError, ApiResult};
use crate::jobs::{PollTiming, wait_for_job_completed, wait_until};

pub struct WorkspaceService;

const SERVICE_PATH: &str = "v2/{project_id}/workspaces";
const OTP_CONFIG_PATH: &str = "v2/{project_id}/assist-auth-config/method-config";
const LOCK_STATUS_PATH: &str = "v2/{project_id}/workspaces/lock-status";

const REGISTER_TIMING: PollTiming = PollTiming::secs(10, 15);
const DEREGISTER_TIMING: PollTiming = PollTiming::secs(10, 10);

const AUTH_TYPE_LOCAL: &str = "LITE_AS";
const AUTH_TYPE_AD: &str = "LOCAL_AD";

fn security_group() -> AttributeType {
    AttributeType::Struct(vec![
        AttributeSchema::new("id", AttributeType::String).computed(),
        AttributeSchema::new("name", AttributeType::String).computed(),
    ])
}

#[async_trait]
impl WorkspaceResource for WorkspaceService {
    fn name(&self) -> &'static str {
        "workspace_service"
    }

    fn service(&self) -> Service {
        Service::Workspace
    }

    fn schema(&self) -> ResourceSchema {
        let ad_domain = AttributeType::Struct(vec![
            AttributeSchema::new("name", AttributeType::String).required(),
            AttributeSchema::new("admin_account", AttributeType::String).required(),
            AttributeSchema::new("password", AttributeType::String)
                .required()
                .sensitive(),
            AttributeSchema::new("active_domain_ip", types::ipv4()).required(),
            AttributeSchema::new("active_domain_name", AttributeType::String).required(),
            AttributeSchema::new("standby_domain_ip", types::ipv4()),
            AttributeSchema::new("standby_domain_name", AttributeType::String),
            AttributeSchema::new("active_dns_ip", types::ipv4()),
            AttributeSchema::new("standby_dns_ip", types::ipv4()),
            AttributeSchema::new("delete_computer_object", AttributeType::Bool)
                .optional_computed(),
        ]);
        let otp_config = AttributeType::Struct(vec![
            AttributeSchema::new("enable", AttributeType::Bool).required(),
            AttributeSchema::new("receive_mode", AttributeType::String).required(),
            AttributeSchema::new("auth_url", AttributeType::String),
            AttributeSchema::new("app_id", AttributeType::String),
            AttributeSchema::new("app_secret", AttributeType::String).sensitive(),
            AttributeSchema::new("auth_server_access_mode", AttributeType::String),
            AttributeSchema::new("cert_content", AttributeType::String),
            AttributeSchema::new("rule_type", AttributeType::String),
            AttributeSchema::new("rule", AttributeType::String),
        ]);

        ResourceSchema::new(self.name())
            .with_description("Workspace service registration")
            .attribute(
                AttributeSchema::new("vpc_id", types::uuid())
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("network_ids", types::string_list()).required())
            .attribute(
                AttributeSchema::new(
                    "access_mode",
                    types::string_enum(&["INTERNET", "DEDICATED", "BOTH"]),
                )
                .required(),
            )
            .attribute(
                AttributeSchema::new(
                    "auth_type",
                    types::string_enum(&[AUTH_TYPE_LOCAL, AUTH_TYPE_AD]),
                )
                .force_new()
                .with_default(Value::from(AUTH_TYPE_LOCAL)),
            )
            .attribute(AttributeSchema::new("ad_domain", ad_domain))
            .attribute(AttributeSchema::new("enterprise_id", AttributeType::String).optional_computed())
            .attribute(
                AttributeSchema::new("internet_access_port", types::port()).optional_computed(),
            )
            .attribute(
                AttributeSchema::new("dedicated_subnets", types::string_list())
                    .optional_computed()
                    .with_description("At most 5 CIDRs"),
            )
            .attribute(
                AttributeSchema::new("management_subnet_cidr", types::cidr())
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("otp_config_info", otp_config))
            .attribute(
                AttributeSchema::new("lock_enabled", AttributeType::Bool)
                    .with_description("Unlock the service when set to true"),
            )
            .attribute(AttributeSchema::new("internet_access_address", AttributeType::String).computed())
            .attribute(AttributeSchema::new("infrastructure_security_group", security_group()).computed())
            .attribute(AttributeSchema::new("desktop_security_group", security_group()).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("is_locked", AttributeType::Int).computed())
            .attribute(AttributeSchema::new("lock_time", AttributeType::String).computed())
            .attribute(AttributeSchema::new("lock_reason", AttributeType::String).computed())
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
        if resource.get_list("dedicated_subnets").len() > 5 {
            return Err(ApiError::Validation(
                "at most 5 dedicated subnets can be configured".to_string(),
            ));
        }
        let body = remove_nulls(build_create_body(resource));
        client.post(SERVICE_PATH, &body).await?;

        let waiter = REGISTER_TIMING.waiter(
            client,
            &["PREPARING", "SUBSCRIBING"],
            &["SUBSCRIBED"],
            timeout,
        );
        let service = wait_until(&waiter, || async move {
            let service = client.get(SERVICE_PATH).await?;
            let status = service.str_at("/status").unwrap_or_default().to_string();
            Ok(Refresh::found(service, status))
        })
        .await?;
        let service_id = required_str(&service, "/id")?.to_string();

        if let Some(port) = resource.get_int("internet_access_port") {
            update_and_wait(
                client,
                &json!({"internet_access_port": port.to_string()}),
                timeout,
            )
            .await?;
        }
        Ok(service_id)
    }

    async fn read(
        &self,
        client: &ServiceClient,
        _identifier: &str,
    ) -> ApiResult<Option<HashMap<String, Value>>> {
        let service = match client.get(SERVICE_PATH).await {
            Ok(service) => service,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if service.str_at("/status") == Some("CLOSED") {
            return Ok(None);
        }

        let mut attributes = flatten_service(&service);

        let otp = client.get(OTP_CONFIG_PATH).await?;
        if let Some(config) = flatten_otp_config(&otp) {
            attributes.insert("otp_config_info".to_string(), config);
        }

        let lock = client.get(LOCK_STATUS_PATH).await?;
        flatten_fields(
            &lock,
            &[
                ("is_locked", "/is_locked"),
                ("lock_time", "/lock_time"),
                ("lock_reason", "/lock_reason"),
            ],
            &mut attributes,
        );
        Ok(Some(attributes))
    }

    async fn update(
        &self,
        client: &ServiceClient,
        _identifier: &str,
        changes: &AttributeChanges<'_>,
        to: &Resource,
        timeout: Duration,
    ) -> ApiResult<()> {
        if changes.has_changes(&["ad_domain", "access_mode", "dedicated_subnets"]) {
            debug!("start to update the service connection");
            let body = remove_nulls(json!({
                "ad_domains": build_ad_domain(to),
                "access_mode": to.get_str("access_mode"),
                "dedicated_subnets": to.get_strings("dedicated_subnets").join(";"),
            }));
            update_and_wait(client, &body, timeout).await?;
        }
        if changes.has_change("network_ids") {
            // Subnet updates finish synchronously
            debug!("start updating the network ID list of service");
            let body = json!({"subnet_ids": to.get_strings("network_ids")});
            client.put(SERVICE_PATH, &body).await?;
        }
        if changes.has_change("internet_access_port")
            && let Some(port) = to.get_int("internet_access_port")
        {
            debug!("start to update the internet access port of service");
            update_and_wait(
                client,
                &json!({"internet_access_port": port.to_string()}),
                timeout,
            )
            .await?;
        }
        if changes.has_change("enterprise_id") {
            debug!("start to update the enterprise ID of service");
            update_and_wait(
                client,
                &json!({"enterprise_id": to.str_or_empty("enterprise_id")}),
                timeout,
            )
            .await?;
        }
        if changes.has_change("otp_config_info")
            && let Some(config) = to.get_map("otp_config_info")
        {
            let body = json!({
                "auth_type": "OTP",
                "otp_config_info": build_otp_config(config),
            });
            client.put(OTP_CONFIG_PATH, &body).await?;
        }
        // Locking is done by the service itself, only unlocking is requested
        if changes.has_change("lock_enabled") && to.get_bool("lock_enabled") == Some(true) {
            let response = client
                .put(LOCK_STATUS_PATH, &json!({"operate_type": "unlock"}))
                .await?;
            let job_id = required_str(&response, "/job_id")?;
            wait_for_job_completed(client, job_id, timeout)
                .await?
                .into_result(job_id)?;
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
        let waiter = DEREGISTER_TIMING.waiter(client, &["PENDING"], &["COMPLETE"], timeout);
        wait_until(&waiter, || async move {
            let service = client.get(SERVICE_PATH).await?;
            let closable = service.pointer("/closable").and_then(JsonValue::as_bool);
            let state = if closable == Some(true) {
                "COMPLETE"
            } else {
                "PENDING"
            };
            Ok(Refresh::found(service, state))
        })
        .await
        .map_err(|e| {
            ApiError::Validation(format!(
                "the service ({}) is not allowed to be deleted (closable is false): {}",
                identifier, e
            ))
        })?;

        client.delete(SERVICE_PATH).await?;

        let waiter = DEREGISTER_TIMING.waiter(client, &["DEREGISTERING"], &["CLOSED"], timeout);
        wait_until(&waiter, || async move {
            let service = client.get(SERVICE_PATH).await?;
            let status = service.str_at("/status").unwrap_or_default().to_string();
            Ok(Refresh::found(service, status))
        })
        .await?;
        Ok(())
    }

    async fn resolve_import(&self, client: &ServiceClient, import_id: &str) -> ApiResult<String> {
        if is_uuid(import_id) {
            return Ok(import_id.to_string());
        }
        let service = client.get(SERVICE_PATH).await?;
        Ok(required_str(&service, "/id")?.to_string())
    }

    fn align(&self, current: &mut HashMap<String, Value>, desired: &HashMap<String, Value>) {
        // Secrets are never echoed back
        keep_configured_secret(current, desired, "ad_domain", "password");
        keep_configured_secret(current, desired, "otp_config_info", "app_secret");
    }
}

fn keep_configured_secret(
    current: &mut HashMap<String, Value>,
    desired: &HashMap<String, Value>,
    block: &str,
    field: &str,
) {
    let Some(secret) = desired.get_map(block).and_then(|b| b.get(field)) else {
        return;
    };
    if let Some(Value::Map(current_block)) = current.get_mut(block) {
        current_block
            .entry(field.to_string())
            .or_insert_with(|| secret.clone());
    }
}

async fn update_and_wait(
    client: &ServiceClient,
    body: &JsonValue,
    timeout: Duration,
) -> ApiResult<()> {
    let response = client.put(SERVICE_PATH, body).await?;
    let job_id = required_str(&response, "/job_id")?;
    wait_for_job_completed(client, job_id, timeout)
        .await?
        .into_result(job_id)
        .map_err(|e| {
            ApiError::Validation(format!("error waiting for the job ({}) completed: {}", job_id, e))
        })?;
    Ok(())
}

fn build_ad_domain(resource: &Resource) -> JsonValue {
    let Some(domain) = resource.get_map("ad_domain") else {
        return JsonValue::Null;
    };
    let delete_object = i64::from(domain.get_bool("delete_computer_object").unwrap_or(false));
    json!({
        "domain_type": AUTH_TYPE_AD,
        "domain_name": domain.get_str("name"),
        "domain_admin_account": domain.get_str("admin_account"),
        "domain_password": domain.get_str("password"),
        "active_domain_ip": domain.get_str("active_domain_ip"),
        "active_domain_name": domain.get_str("active_domain_name"),
        "standby_domain_ip": opt_str(domain, "standby_domain_ip"),
        "standby_domain_name": opt_str(domain, "standby_domain_name"),
        "active_dns_ip": opt_str(domain, "active_dns_ip"),
        "standby_dns_ip": opt_str(domain, "standby_dns_ip"),
        "delete_computer_object": delete_object,
    })
}

fn build_create_body(resource: &Resource) -> JsonValue {
    let auth_type = resource.get_str("auth_type").unwrap_or(AUTH_TYPE_LOCAL);
    let ad_domain = if auth_type == AUTH_TYPE_LOCAL {
        json!({"domain_type": AUTH_TYPE_LOCAL})
    } else {
        build_ad_domain(resource)
    };
    let subnets: Vec<JsonValue> = resource
        .get_strings("network_ids")
        .into_iter()
        .map(|id| json!({"subnet_id": id}))
        .collect();

    json!({
        "ad_domains": ad_domain,
        "vpc_id": resource.get_str("vpc_id"),
        "subnet_ids": subnets,
        "access_mode": resource.get_str("access_mode"),
        "enterprise_id": opt_str(resource, "enterprise_id"),
        "dedicated_subnets": resource.get_strings("dedicated_subnets").join(";"),
        "management_subnet_cidr": opt_str(resource, "management_subnet_cidr"),
    })
}

fn flatten_service(service: &JsonValue) -> HashMap<String, Value> {
    let mut attributes = HashMap::new();
    flatten_fields(
        service,
        &[
            ("auth_type", "/ad_domains/domain_type"),
            ("vpc_id", "/vpc_id"),
            ("access_mode", "/access_mode"),
            ("enterprise_id", "/enterprise_id"),
            ("management_subnet_cidr", "/management_subnet_cidr"),
            ("internet_access_address", "/internet_access_address"),
            ("status", "/status"),
        ],
        &mut attributes,
    );

    if let Some(domain) = service.get("ad_domains")
        && domain.str_at("/domain_type") == Some(AUTH_TYPE_AD)
    {
        let mut flat = HashMap::new();
        flatten_fields(
            domain,
            &[
                ("name", "/domain_name"),
                ("admin_account", "/domain_admin_account"),
                ("active_domain_ip", "/active_domain_ip"),
                ("active_domain_name", "/active_domain_name"),
                ("standby_domain_ip", "/standby_domain_ip"),
                ("standby_domain_name", "/standby_domain_name"),
                ("active_dns_ip", "/active_dns_ip"),
                ("standby_dns_ip", "/standby_dns_ip"),
            ],
            &mut flat,
        );
        let delete_object = match domain.pointer("/delete_computer_object") {
            Some(JsonValue::String(s)) => s == "1",
            Some(JsonValue::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        };
        flat.insert("delete_computer_object".to_string(), Value::Bool(delete_object));
        attributes.insert("ad_domain".to_string(), Value::Map(flat));
    }

    let network_ids: Vec<Value> = service
        .array_at("/subnet_ids")
        .iter()
        .filter_map(|subnet| subnet.str_at("/subnet_id"))
        .map(Value::from)
        .collect();
    if !network_ids.is_empty() {
        attributes.insert("network_ids".to_string(), Value::List(network_ids));
    }

    if let Some(subnets) = service.str_at("/dedicated_subnets")
        && !subnets.is_empty()
    {
        let subnets = subnets.split(';').map(Value::from).collect();
        attributes.insert("dedicated_subnets".to_string(), Value::List(subnets));
    }

    // Reported as a string
    let port = match service.pointer("/internet_access_port") {
        Some(JsonValue::String(s)) => s.parse::<i64>().ok(),
        Some(JsonValue::Number(n)) => n.as_i64(),
        _ => None,
    };
    if let Some(port) = port {
        attributes.insert("internet_access_port".to_string(), Value::Int(port));
    }

    for key in ["infrastructure_security_group", "desktop_security_group"] {
        if let Some(group) = service.get(key).filter(|g| g.is_object()) {
            let mut flat = HashMap::new();
            flatten_fields(group, &[("id", "/id"), ("name", "/name")], &mut flat);
            if !flat.is_empty() {
                attributes.insert(key.to_string(), Value::Map(flat));
            }
        }
    }
    attributes
}

fn build_otp_config(config: &HashMap<String, Value>) -> JsonValue {
    remove_nulls(json!({
        "enable": config.get_bool("enable").unwrap_or(false),
        "receive_mode": config.get_str("receive_mode"),
        "auth_url": opt_str(config, "auth_url"),
        "app_id": opt_str(config, "app_id"),
        // Field name as spelled by the API
        "app_secrte": opt_str(config, "app_secret"),
        "auth_server_access_mode": opt_str(config, "auth_server_access_mode"),
        "cert_content": opt_str(config, "cert_content"),
        "apply_rule": {
            "rule_type": opt_str(config, "rule_type"),
            "rule": opt_str(config, "rule"),
        },
    }))
}

/// The OTP block is only reported while enabled
fn flatten_otp_config(body: &JsonValue) -> Option<Value> {
    let config = body.get("otp_config_info")?;
    if config.pointer("/enable").and_then(JsonValue::as_bool) != Some(true) {
        return None;
    }
    let mut flat = HashMap::new();
    flatten_fields(
        config,
        &[
            ("enable", "/enable"),
            ("receive_mode", "/receive_mode"),
            ("auth_url", "/auth_url"),
            ("app_id", "/app_id"),
            ("app_secret", "/app_secrte"),
            ("auth_server_access_mode", "/auth_server_access_mode"),
            ("cert_content", "/cert_content"),
            ("rule_type", "/apply_rule/rule_type"),
            ("rule", "/apply_rule/rule"),
        ],
        &mut flat,
    );
    Some(Value::Map(flat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::client_for;
    use deskform_core::resource::ResourceId;
    use wiremock::matchers::{body_json, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);
    const SERVICE_ID: &str = "0b5a5d6c-9a2a-4b7e-8f52-3d1f1e0b8a11";

    fn service_resource() -> Resource {
        Resource::new("workspace_service", "main")
            .with_attribute("vpc_id", Value::from("vpc-1"))
            .with_attribute(
                "network_ids",
                Value::List(vec![Value::from("net-1"), Value::from("net-2")]),
            )
            .with_attribute("access_mode", Value::from("INTERNET"))
    }

    fn ad_resource() -> Resource {
        service_resource()
            .with_attribute("auth_type", Value::from(AUTH_TYPE_AD))
            .with_attribute(
                "ad_domain",
                Value::Map(HashMap::from([
                    ("name".to_string(), Value::from("corp.example.com")),
                    ("admin_account".to_string(), Value::from("admin")),
                    ("password".to_string(), Value::from("s3cret")),
                    ("active_domain_ip".to_string(), Value::from("10.0.0.10")),
                    ("active_domain_name".to_string(), Value::from("dc1.corp.example.com")),
                    ("delete_computer_object".to_string(), Value::Bool(true)),
                ])),
            )
    }

    fn registered(status: &str) -> JsonValue {
        json!({
            "id": SERVICE_ID,
            "status": status,
            "closable": true,
            "vpc_id": "vpc-1",
            "access_mode": "INTERNET",
            "subnet_ids": [{"subnet_id": "net-1"}, {"subnet_id": "net-2"}],
            "dedicated_subnets": "10.1.0.0/24;10.2.0.0/24",
            "internet_access_port": "443",
            "internet_access_address": "https://ws.example.com",
            "ad_domains": {"domain_type": "LITE_AS"},
            "infrastructure_security_group": {"id": "sg-1", "name": "WorkspaceUserSecurityGroup"},
            "desktop_security_group": {"id": "sg-2", "name": "WorkspaceHDASecurityGroup"}
        })
    }

    #[test]
    fn local_auth_only_sends_domain_type() {
        let resource = service_resource().with_attribute(
            "dedicated_subnets",
            Value::List(vec![Value::from("10.1.0.0/24"), Value::from("10.2.0.0/24")]),
        );
        let body = remove_nulls(build_create_body(&resource));
        assert_eq!(body["ad_domains"], json!({"domain_type": "LITE_AS"}));
        assert_eq!(
            body["subnet_ids"],
            json!([{"subnet_id": "net-1"}, {"subnet_id": "net-2"}])
        );
        assert_eq!(body["dedicated_subnets"], "10.1.0.0/24;10.2.0.0/24");
        assert!(body.get("enterprise_id").is_none());
    }

    #[test]
    fn ad_auth_sends_domain_fields() {
        let body = remove_nulls(build_create_body(&ad_resource()));
        assert_eq!(
            body["ad_domains"],
            json!({
                "domain_type": "LOCAL_AD",
                "domain_name": "corp.example.com",
                "domain_admin_account": "admin",
                "domain_password": "s3cret",
                "active_domain_ip": "10.0.0.10",
                "active_domain_name": "dc1.corp.example.com",
                "delete_computer_object": 1
            })
        );
    }

    #[test]
    fn flatten_parses_port_and_splits_subnets() {
        let attributes = flatten_service(&registered("SUBSCRIBED"));
        assert_eq!(attributes.get_int("internet_access_port"), Some(443));
        assert_eq!(
            attributes.get_strings("dedicated_subnets"),
            vec!["10.1.0.0/24", "10.2.0.0/24"]
        );
        assert_eq!(attributes.get_strings("network_ids"), vec!["net-1", "net-2"]);
        assert_eq!(attributes.get_str("auth_type"), Some("LITE_AS"));
        assert!(attributes.get("ad_domain").is_none());
        assert_eq!(
            attributes
                .get_map("desktop_security_group")
                .and_then(|g| g.get_str("id")),
            Some("sg-2")
        );
    }

    #[test]
    fn disabled_otp_config_is_dropped() {
        assert!(flatten_otp_config(&json!({"otp_config_info": {"enable": false}})).is_none());
        let config = flatten_otp_config(&json!({
            "otp_config_info": {
                "enable": true,
                "receive_mode": "VMFA",
                "app_secrte": "xyz",
                "apply_rule": {"rule_type": "ACCESS_MODE", "rule": "INTERNET"}
            }
        }))
        .unwrap();
        let config = config.as_map().unwrap();
        assert_eq!(config.get_str("app_secret"), Some("xyz"));
        assert_eq!(config.get_str("rule"), Some("INTERNET"));
    }

    #[test]
    fn align_restores_domain_password() {
        let mut current = HashMap::from([(
            "ad_domain".to_string(),
            Value::Map(HashMap::from([("name".to_string(), Value::from("corp.example.com"))])),
        )]);
        WorkspaceService.align(&mut current, &ad_resource().attributes);
        assert_eq!(
            current.get_map("ad_domain").and_then(|d| d.get_str("password")),
            Some("s3cret")
        );
    }

    #[tokio::test]
    async fn create_waits_until_subscribed_then_sets_port() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/proj/workspaces"))
            .and(body_partial_json(json!({"vpc_id": "vpc-1", "access_mode": "INTERNET"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job-reg"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/workspaces"))
            .respond_with(ResponseTemplate::new(200).set_body_json(registered("SUBSCRIBING")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/workspaces"))
            .respond_with(ResponseTemplate::new(200).set_body_json(registered("SUBSCRIBED")))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v2/proj/workspaces"))
            .and(body_json(json!({"internet_access_port": "8443"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job-port"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/workspace-jobs/job-port"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "SUCCESS"})))
            .mount(&server)
            .await;

        let resource = service_resource().with_attribute("internet_access_port", Value::Int(8443));
        let client = client_for(&server.uri());
        let id = WorkspaceService
            .create(&client, &resource, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(id, SERVICE_ID);
    }

    #[tokio::test]
    async fn closed_service_reads_as_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/workspaces"))
            .respond_with(ResponseTemplate::new(200).set_body_json(registered("CLOSED")))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        assert!(WorkspaceService.read(&client, SERVICE_ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_includes_lock_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/workspaces"))
            .respond_with(ResponseTemplate::new(200).set_body_json(registered("SUBSCRIBED")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/assist-auth-config/method-config"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"otp_config_info": {"enable": false}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/workspaces/lock-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "is_locked": 1,
                "lock_time": "2026-01-01T00:00:00Z",
                "lock_reason": "arrears"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let attributes = WorkspaceService
            .read(&client, SERVICE_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attributes.get_int("is_locked"), Some(1));
        assert_eq!(attributes.get_str("lock_reason"), Some("arrears"));
        assert!(attributes.get("otp_config_info").is_none());
    }

    #[tokio::test]
    async fn unlock_waits_for_job() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v2/proj/workspaces/lock-status"))
            .and(body_json(json!({"operate_type": "unlock"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job-unlock"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/workspace-jobs/job-unlock"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "SUCCESS"})))
            .expect(1)
            .mount(&server)
            .await;

        let current = State::existing(
            ResourceId::new("workspace_service", "main"),
            HashMap::from([("lock_enabled".to_string(), Value::Bool(false))]),
        );
        let desired = service_resource().with_attribute("lock_enabled", Value::Bool(true));
        let changes = AttributeChanges::between(&current, &desired);
        let client = client_for(&server.uri());
        WorkspaceService
            .update(&client, SERVICE_ID, &changes, &desired, TIMEOUT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn port_update_waits_for_job_once() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v2/proj/workspaces"))
            .and(body_json(json!({"internet_access_port": "8443"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job-port"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/workspace-jobs/job-port"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "FAIL"})))
            .expect(1)
            .mount(&server)
            .await;

        let current = State::existing(
            ResourceId::new("workspace_service", "main"),
            HashMap::from([("internet_access_port".to_string(), Value::Int(443))]),
        );
        let desired = service_resource().with_attribute("internet_access_port", Value::Int(8443));
        let changes = AttributeChanges::between(&current, &desired);
        let client = client_for(&server.uri());
        let err = WorkspaceService
            .update(&client, SERVICE_ID, &changes, &desired, TIMEOUT)
            .await
            .unwrap_err();
        assert!(
            err.to_string()
                .starts_with("error waiting for the job (job-port) completed")
        );
    }

    #[tokio::test]
    async fn delete_waits_for_closable_then_closed() {
        let server = MockServer::start().await;
        let mut busy = registered("SUBSCRIBED");
        busy["closable"] = json!(false);
        Mock::given(method("GET"))
            .and(path("/v2/proj/workspaces"))
            .respond_with(ResponseTemplate::new(200).set_body_json(busy))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/workspaces"))
            .respond_with(ResponseTemplate::new(200).set_body_json(registered("SUBSCRIBED")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v2/proj/workspaces"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job-del"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/workspaces"))
            .respond_with(ResponseTemplate::new(200).set_body_json(registered("CLOSED")))
            .mount(&server)
            .await;

        let state = State::existing(ResourceId::new("workspace_service", "main"), HashMap::new());
        let client = client_for(&server.uri());
        WorkspaceService
            .delete(&client, SERVICE_ID, &state, TIMEOUT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn import_by_name_resolves_service_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/workspaces"))
            .respond_with(ResponseTemplate::new(200).set_body_json(registered("SUBSCRIBED")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let id = WorkspaceService
            .resolve_import(&client, "main")
            .await
            .unwrap();
        assert_eq!(id, SERVICE_ID);
        let id = WorkspaceService
            .resolve_import(&client, SERVICE_ID)
            .await
            .unwrap();
        assert_eq!(id, SERVICE_ID);
    }
}
