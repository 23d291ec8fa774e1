//! Deskform Workspace Provider
//!
//! Manages the vendor Workspace (virtual desktop) service: the service
//! registration, desktops, desktop pools, APP servers and APP image servers,
//! plus read-only queries over server groups, servers and pool desktops.
//!
//! ## Module Structure
//!
//! - `provider` - WorkspaceProvider, routing resource types to handlers
//! - `resources` - Resource handlers, one per resource type
//! - `data_sources` - Read-only queries
//! - `jobs` - Job polling helpers
//! - `client` / `auth` - HTTP client and token handling
//! - `retry` / `pagination` / `tags` - Shared API patterns
//! - `config` / `error` - Provider configuration and error types

pub mod auth;
pub mod client;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod jobs;
pub mod orders;
pub mod pagination;
pub mod provider;
pub mod resources;
pub mod retry;
pub mod tags;

// Re-export main types
pub use config::{AuthConfig, ProviderConfig, Service};
pub use error::{ApiError, ApiResult};
pub use provider::WorkspaceProvider;

use deskform_core::provider::{BoxFuture, Provider, ProviderResult, ResourceType};
use deskform_core::resource::{Resource, ResourceId, State};

use data_sources::DataSourceType;
use resources::HandlerType;

/// Every resource and data source type, usable without credentials
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    let resources = resources::handlers()
        .into_iter()
        .map(|h| Box::new(HandlerType::of(h.as_ref())) as Box<dyn ResourceType>);
    let queries = data_sources::data_sources()
        .into_iter()
        .map(|s| Box::new(DataSourceType::of(s.as_ref())) as Box<dyn ResourceType>);
    resources.chain(queries).collect()
}

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl Provider for WorkspaceProvider {
    fn name(&self) -> &'static str {
        "workspace"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(&resource).await })
    }

    fn update(
        &self,
        _id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move { self.update_resource(&identifier, &from, &to).await })
    }

    fn delete(
        &self,
        id: &ResourceId,
        identifier: &str,
        state: &State,
    ) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let state = state.clone();
        Box::pin(async move { self.delete_resource(&id, &identifier, &state).await })
    }

    fn import(&self, id: &ResourceId, import_id: &str) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let import_id = import_id.to_string();
        Box::pin(async move { self.import_resource(&id, &import_id).await })
    }

    fn align_state(&self, mut state: State, desired: &Resource) -> State {
        if state.exists
            && let Ok(handler) = self.handler(&state.id)
        {
            handler.align(&mut state.attributes, &desired.attributes);
        }
        state
    }

    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.query_data_source(&resource).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::client_for;
    use deskform_core::resource::{AttributeMap, Value};
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> WorkspaceProvider {
        WorkspaceProvider::with_clients(client_for(&server.uri()), client_for(&server.uri()))
    }

    #[test]
    fn lists_resources_and_data_sources() {
        let provider = WorkspaceProvider::with_clients(
            client_for("http://127.0.0.1:9"),
            client_for("http://127.0.0.1:9"),
        );
        let types = provider.resource_types();
        let names: Vec<&str> = types.iter().map(|t| t.name()).collect();
        assert!(names.contains(&"workspace_desktop_pool"));
        assert!(names.contains(&"workspace_service"));
        let pool_desktops = types
            .iter()
            .find(|t| t.name() == "workspace_desktop_pool_associated_desktops")
            .unwrap();
        assert!(pool_desktops.is_data_source());
    }

    #[tokio::test]
    async fn read_without_identifier_is_not_found() {
        let server = MockServer::start().await;
        let provider = provider_for(&server);
        let id = ResourceId::new("workspace_desktop", "d1");
        let state = provider.read(&id, None).await.unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn read_maps_404_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/desktops/d-404"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error_code": "WKS.0003",
                "error_msg": "desktop not found"
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let id = ResourceId::new("workspace_desktop", "d1");
        let state = provider.read(&id, Some("d-404")).await.unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn unknown_type_is_an_error() {
        let server = MockServer::start().await;
        let provider = provider_for(&server);
        let id = ResourceId::new("workspace_bucket", "b");
        let err = provider.read(&id, Some("x")).await.unwrap_err();
        assert!(err.to_string().contains("Unknown resource type"));
    }

    #[tokio::test]
    async fn data_source_gets_random_identifier() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/proj/app-servers"))
            .and(query_param("server_group_id", "g1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"items": [{"id": "srv-1"}]})),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let query = Resource::new("workspace_app_servers", "group")
            .with_read_only(true)
            .with_attribute("server_group_id", Value::from("g1"));
        let first = provider.read_data_source(&query).await.unwrap();
        let second = provider.read_data_source(&query).await.unwrap();

        assert_eq!(first.get_list("servers").len(), 1);
        assert_eq!(first.get_str("server_group_id"), Some("g1"));
        let first_id = first.identifier.unwrap();
        assert!(uuid::Uuid::parse_str(&first_id).is_ok());
        assert_ne!(Some(first_id), second.identifier);
    }

    #[test]
    fn align_state_restores_secrets() {
        let provider = WorkspaceProvider::with_clients(
            client_for("http://127.0.0.1:9"),
            client_for("http://127.0.0.1:9"),
        );
        let id = ResourceId::new("workspace_service", "main");
        let state = State::existing(
            id.clone(),
            HashMap::from([(
                "ad_domain".to_string(),
                Value::Map(HashMap::from([("name".to_string(), Value::from("corp"))])),
            )]),
        );
        let desired = Resource::new("workspace_service", "main").with_attribute(
            "ad_domain",
            Value::Map(HashMap::from([
                ("name".to_string(), Value::from("corp")),
                ("password".to_string(), Value::from("pw")),
            ])),
        );
        let aligned = provider.align_state(state, &desired);
        assert_eq!(
            aligned
                .get_map("ad_domain")
                .and_then(|d| d.get_str("password")),
            Some("pw")
        );
    }
}
