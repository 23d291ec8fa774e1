//! Managed resource types
//!
//! Each resource type implements [`WorkspaceResource`] against the client of
//! the service it belongs to. The provider turns these handlers into
//! `Provider` operations (create, read back, merge configured values).

pub mod app_image_server;
pub mod app_server;
pub mod desktop;
pub mod desktop_pool;
pub mod service;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deskform_core::differ::AttributeChanges;
use deskform_core::provider::{ResourceType, Timeouts};
use deskform_core::resource::{AttributeMap, Resource, State, Value};
use deskform_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use serde_json::Value as JsonValue;

use crate::client::ServiceClient;
use crate::config::Service;
use crate::error::ApiResult;

/// Attribute holding per-resource timeout overrides, in minutes
pub const TIMEOUTS_ATTRIBUTE: &str = "_timeouts";

/// CRUD handler for one resource type
#[async_trait]
pub trait WorkspaceResource: Send + Sync {
    fn name(&self) -> &'static str;

    fn service(&self) -> Service;

    fn schema(&self) -> ResourceSchema;

    fn timeouts(&self) -> Timeouts;

    /// Create the remote object and return its identifier
    async fn create(
        &self,
        client: &ServiceClient,
        resource: &Resource,
        timeout: Duration,
    ) -> ApiResult<String>;

    /// Current attributes, or `None` when the object is gone
    async fn read(
        &self,
        client: &ServiceClient,
        identifier: &str,
    ) -> ApiResult<Option<HashMap<String, Value>>>;

    async fn update(
        &self,
        client: &ServiceClient,
        identifier: &str,
        changes: &AttributeChanges<'_>,
        to: &Resource,
        timeout: Duration,
    ) -> ApiResult<()>;

    async fn delete(
        &self,
        client: &ServiceClient,
        identifier: &str,
        state: &State,
        timeout: Duration,
    ) -> ApiResult<()>;

    /// Identifier to read for an import id
    async fn resolve_import(&self, _client: &ServiceClient, import_id: &str) -> ApiResult<String> {
        Ok(import_id.to_string())
    }

    /// Reorder read attributes whose remote order is unstable to follow
    /// the configuration
    fn align(&self, _current: &mut HashMap<String, Value>, _desired: &HashMap<String, Value>) {}
}

/// All managed resource handlers
pub fn handlers() -> Vec<Box<dyn WorkspaceResource>> {
    vec![
        Box::new(service::WorkspaceService),
        Box::new(desktop::Desktop),
        Box::new(desktop_pool::DesktopPool),
        Box::new(app_server::AppServer),
        Box::new(app_image_server::AppImageServer),
    ]
}

/// `ResourceType` view of a handler
pub struct HandlerType {
    name: &'static str,
    schema: ResourceSchema,
    timeouts: Timeouts,
}

impl HandlerType {
    pub fn of(handler: &dyn WorkspaceResource) -> Self {
        Self {
            name: handler.name(),
            schema: handler.schema(),
            timeouts: handler.timeouts(),
        }
    }
}

impl ResourceType for HandlerType {
    fn name(&self) -> &'static str {
        self.name
    }

    fn schema(&self) -> ResourceSchema {
        self.schema.clone()
    }

    fn timeouts(&self) -> Timeouts {
        self.timeouts
    }
}

/// Schema of the `_timeouts` block shared by every resource
pub fn timeouts_attribute() -> AttributeSchema {
    AttributeSchema::new(
        TIMEOUTS_ATTRIBUTE,
        AttributeType::Struct(vec![
            AttributeSchema::new("create", AttributeType::Int),
            AttributeSchema::new("update", AttributeType::Int),
            AttributeSchema::new("delete", AttributeType::Int),
        ]),
    )
    .with_description("Operation timeouts in minutes")
}

/// Apply `_timeouts` overrides from the attributes onto the defaults
pub fn effective_timeouts(defaults: Timeouts, attributes: &HashMap<String, Value>) -> Timeouts {
    let Some(overrides) = attributes.get_map(TIMEOUTS_ATTRIBUTE) else {
        return defaults;
    };
    let minutes = |key: &str, default: Duration| {
        overrides
            .get_int(key)
            .filter(|m| *m > 0)
            .map(|m| Duration::from_secs(m as u64 * 60))
            .unwrap_or(default)
    };
    Timeouts {
        create: minutes("create", defaults.create),
        read: defaults.read,
        update: minutes("update", defaults.update),
        delete: minutes("delete", defaults.delete),
    }
}

/// Drop `null` members, empty strings and empty objects/arrays from a
/// request body, recursively
pub fn remove_nulls(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.into_iter()
                .map(|(k, v)| (k, remove_nulls(v)))
                .filter(|(_, v)| !is_blank(v))
                .collect(),
        ),
        JsonValue::Array(items) => JsonValue::Array(
            items
                .into_iter()
                .map(remove_nulls)
                .filter(|v| !is_blank(v))
                .collect(),
        ),
        other => other,
    }
}

fn is_blank(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Optional string attribute as JSON (`null` when unset or empty)
pub fn opt_str(attributes: &impl AttributeMap, key: &str) -> JsonValue {
    match attributes.get_str(key) {
        Some(s) if !s.is_empty() => JsonValue::String(s.to_string()),
        _ => JsonValue::Null,
    }
}

/// Copy JSON fields into attributes; `(attribute, JSON pointer)` pairs
pub fn flatten_fields(
    source: &JsonValue,
    fields: &[(&str, &str)],
    attributes: &mut HashMap<String, Value>,
) {
    for (attribute, pointer) in fields {
        if let Some(value) = source.pointer(pointer).and_then(Value::from_json) {
            attributes.insert(attribute.to_string(), value);
        }
    }
}

/// Whether `id` looks like a UUID
pub fn is_uuid(id: &str) -> bool {
    id.len() == 36 && uuid::Uuid::try_parse(id).is_ok()
}
