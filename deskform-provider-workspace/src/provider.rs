//! Workspace provider implementation
//!
//! Routes each resource type to its handler and the client of the service
//! the handler belongs to, and reads the object back after every change.

use std::sync::Arc;

use deskform_core::differ::AttributeChanges;
use deskform_core::provider::{ProviderError, ProviderResult};
use deskform_core::resource::{Resource, ResourceId, State};
use log::{debug, info};

use crate::auth::Authenticator;
use crate::client::ServiceClient;
use crate::config::{ProviderConfig, Service};
use crate::data_sources::{WorkspaceDataSource, data_sources};
use crate::error::{ApiError, ApiResult, ResultExt};
use crate::resources::{WorkspaceResource, effective_timeouts, handlers};

/// Vendor Workspace provider
pub struct WorkspaceProvider {
    workspace: ServiceClient,
    appstream: ServiceClient,
    handlers: Vec<Box<dyn WorkspaceResource>>,
    data_sources: Vec<Box<dyn WorkspaceDataSource>>,
}

impl WorkspaceProvider {
    /// Build the provider from a validated configuration
    pub fn new(config: &ProviderConfig) -> ApiResult<Self> {
        config.validate()?;
        let auth_config = config
            .auth
            .clone()
            .ok_or_else(|| ApiError::Config("no credentials configured".to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.insecure)
            .build()?;
        let auth = Arc::new(Authenticator::new(
            auth_config,
            config.endpoint(Service::Iam),
            config.project_id.clone(),
            http.clone(),
        ));

        let client_for = |service: Service| {
            ServiceClient::new(
                http.clone(),
                config.endpoint(service),
                config.project_id.clone(),
                Arc::clone(&auth),
            )
            .with_max_retries(config.max_retries())
            .with_poll_override(config.poll_override())
            .with_order_endpoint(config.endpoint(Service::Bss))
        };
        Ok(Self::with_clients(
            client_for(Service::Workspace),
            client_for(Service::AppStream),
        ))
    }

    /// Build the provider over existing service clients
    pub fn with_clients(workspace: ServiceClient, appstream: ServiceClient) -> Self {
        Self {
            workspace,
            appstream,
            handlers: handlers(),
            data_sources: data_sources(),
        }
    }

    /// Client of a service (IAM is only used for authentication, billing
    /// through [`ServiceClient::orders`])
    pub fn client(&self, service: Service) -> &ServiceClient {
        match service {
            Service::AppStream => &self.appstream,
            Service::Workspace | Service::Iam | Service::Bss => &self.workspace,
        }
    }

    pub(crate) fn handler(&self, id: &ResourceId) -> ProviderResult<&dyn WorkspaceResource> {
        self.handlers
            .iter()
            .find(|h| h.name() == id.resource_type)
            .map(|h| h.as_ref())
            .ok_or_else(|| {
                ProviderError::new(format!("Unknown resource type: {}", id.resource_type))
                    .for_resource(id.clone())
            })
    }

    pub(crate) fn data_source(&self, id: &ResourceId) -> ProviderResult<&dyn WorkspaceDataSource> {
        self.data_sources
            .iter()
            .find(|s| s.name() == id.resource_type)
            .map(|s| s.as_ref())
            .ok_or_else(|| {
                ProviderError::new(format!("Unknown data source: {}", id.resource_type))
                    .for_resource(id.clone())
            })
    }

    pub(crate) async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let handler = self.handler(id)?;
        let Some(identifier) = identifier else {
            return Ok(State::not_found(id.clone()));
        };
        let client = self.client(handler.service());
        match handler.read(client, identifier).await {
            Ok(Some(attributes)) => {
                Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
            }
            Ok(None) => Ok(State::not_found(id.clone())),
            Err(e) if e.is_not_found() => {
                debug!("{} ({}) no longer exists: {}", id, identifier, e);
                Ok(State::not_found(id.clone()))
            }
            Err(e) => Err(ProviderError::from(e).for_resource(id.clone())),
        }
    }

    /// Read back after a change, keeping configured values the API does not echo
    async fn read_back(
        &self,
        handler: &dyn WorkspaceResource,
        resource: &Resource,
        identifier: &str,
    ) -> ProviderResult<State> {
        let state = self.read_resource(&resource.id, Some(identifier)).await?;
        if !state.exists {
            return Err(ProviderError::new(format!(
                "{} ({}) disappeared right after being written",
                resource.id, identifier
            ))
            .for_resource(resource.id.clone()));
        }
        let mut state = state;
        handler.align(&mut state.attributes, &resource.attributes);
        Ok(state.merge_configured(&resource.attributes))
    }

    pub(crate) async fn create_resource(&self, resource: &Resource) -> ProviderResult<State> {
        let handler = self.handler(&resource.id)?;
        let client = self.client(handler.service());
        let timeouts = effective_timeouts(handler.timeouts(), &resource.attributes);

        info!("creating {}", resource.id);
        let identifier = handler
            .create(client, resource, timeouts.create)
            .await
            .context(format!("error creating {}", resource.id))
            .map_err(|e| e.for_resource(resource.id.clone()))?;
        debug!("{} created with identifier {}", resource.id, identifier);

        self.read_back(handler, resource, &identifier).await
    }

    pub(crate) async fn update_resource(
        &self,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let handler = self.handler(&to.id)?;
        let client = self.client(handler.service());
        let timeouts = effective_timeouts(handler.timeouts(), &to.attributes);
        let changes = AttributeChanges::between(from, to);

        info!("updating {} ({})", to.id, identifier);
        handler
            .update(client, identifier, &changes, to, timeouts.update)
            .await
            .context(format!("error updating {}", to.id))
            .map_err(|e| e.for_resource(to.id.clone()))?;

        self.read_back(handler, to, identifier).await
    }

    pub(crate) async fn delete_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        state: &State,
    ) -> ProviderResult<()> {
        let handler = self.handler(id)?;
        let client = self.client(handler.service());
        let timeouts = effective_timeouts(handler.timeouts(), &state.attributes);

        info!("deleting {} ({})", id, identifier);
        match handler.delete(client, identifier, state, timeouts.delete).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("{} ({}) was already gone", id, identifier);
                Ok(())
            }
            Err(e) => Err(ProviderError::new(format!("error deleting {}: {}", id, e))
                .with_cause(e)
                .for_resource(id.clone())),
        }
    }

    pub(crate) async fn import_resource(
        &self,
        id: &ResourceId,
        import_id: &str,
    ) -> ProviderResult<State> {
        let handler = self.handler(id)?;
        let client = self.client(handler.service());
        let identifier = handler
            .resolve_import(client, import_id)
            .await
            .context(format!("error resolving import id {}", import_id))
            .map_err(|e| e.for_resource(id.clone()))?;

        let state = self.read_resource(id, Some(&identifier)).await?;
        if !state.exists {
            return Err(
                ProviderError::new(format!("Cannot import non-existent remote object {}", import_id))
                    .for_resource(id.clone()),
            );
        }
        Ok(state)
    }

    pub(crate) async fn query_data_source(&self, query: &Resource) -> ProviderResult<State> {
        let source = self.data_source(&query.id)?;
        let client = self.client(source.service());
        let attributes = source
            .read(client, query)
            .await
            .context(format!("error querying {}", query.id))
            .map_err(|e| e.for_resource(query.id.clone()))?;

        Ok(State::existing(query.id.clone(), attributes)
            .with_identifier(uuid::Uuid::new_v4().to_string())
            .merge_configured(&query.attributes))
    }
}
