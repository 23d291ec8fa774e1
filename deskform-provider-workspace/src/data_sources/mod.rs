//! Read-only queries over live API listings
//!
//! A data source lists everything matching its filters and stores the
//! flattened items in one computed list attribute. The provider gives each
//! query result a random identifier.

pub mod app_server_groups;
pub mod app_servers;
pub mod desktop_pool_associated_desktops;

use std::collections::HashMap;

use async_trait::async_trait;
use deskform_core::provider::ResourceType;
use deskform_core::resource::{AttributeMap, Resource, Value};
use deskform_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use serde_json::Value as JsonValue;

use crate::client::{JsonExt, ServiceClient};
use crate::config::Service;
use crate::error::ApiResult;

/// Query handler for one data source type
#[async_trait]
pub trait WorkspaceDataSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn service(&self) -> Service;

    fn schema(&self) -> ResourceSchema;

    /// Run the query; the returned attributes are merged over the filters
    async fn read(
        &self,
        client: &ServiceClient,
        query: &Resource,
    ) -> ApiResult<HashMap<String, Value>>;
}

pub fn data_sources() -> Vec<Box<dyn WorkspaceDataSource>> {
    vec![
        Box::new(app_server_groups::AppServerGroups),
        Box::new(app_servers::AppServers),
        Box::new(desktop_pool_associated_desktops::DesktopPoolAssociatedDesktops),
    ]
}

/// `ResourceType` view of a data source
pub struct DataSourceType {
    name: &'static str,
    schema: ResourceSchema,
}

impl DataSourceType {
    pub fn of(source: &dyn WorkspaceDataSource) -> Self {
        Self {
            name: source.name(),
            schema: source.schema(),
        }
    }
}

impl ResourceType for DataSourceType {
    fn name(&self) -> &'static str {
        self.name
    }

    fn schema(&self) -> ResourceSchema {
        self.schema.clone()
    }

    fn is_data_source(&self) -> bool {
        true
    }
}

/// Computed list of objects with the given fields
pub fn computed_list(name: &str, fields: &[(&str, AttributeType)]) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::List(Box::new(object_type(fields)))).computed()
}

/// Object type with the given optional fields
pub fn object_type(fields: &[(&str, AttributeType)]) -> AttributeType {
    AttributeType::Struct(
        fields
            .iter()
            .map(|(field, attr_type)| AttributeSchema::new(*field, attr_type.clone()))
            .collect(),
    )
}

/// Copy the named top-level fields of a listed item
pub fn pick(item: &JsonValue, keys: &[&str]) -> HashMap<String, Value> {
    keys.iter()
        .filter_map(|key| {
            item.get(*key)
                .and_then(Value::from_json)
                .map(|v| (key.to_string(), v))
        })
        .collect()
}

/// `[{key, value}]` tag list kept as a list of maps
pub fn tag_list(item: &JsonValue) -> Option<Value> {
    let tags: Vec<Value> = item
        .array_at("/tags")
        .iter()
        .map(|tag| Value::Map(pick(tag, &["key", "value"])))
        .collect();
    (!tags.is_empty()).then_some(Value::List(tags))
}

/// Query parameter from an optional filter attribute
pub fn filter_param(query: &Resource, key: &str) -> String {
    match query.attr(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Int(n)) => n.to_string(),
        _ => String::new(),
    }
}
