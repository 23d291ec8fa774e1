//! Configuration files read by the CLI
//!
//! The resource configuration lists what should exist:
//!
//! ```json
//! {
//!   "resources": [
//!     {"type": "workspace_desktop", "name": "dev", "attributes": {"flavor_id": "..."}}
//!   ],
//!   "data_sources": [
//!     {"type": "workspace_app_servers", "name": "all", "attributes": {}}
//!   ]
//! }
//! ```
//!
//! The provider configuration is a separate JSON file holding a
//! `ProviderConfig`; the environment fills whatever it leaves unset.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use deskform_core::resource::{Resource, Value};
use deskform_provider_workspace::ProviderConfig;
use serde::Deserialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub resources: Vec<ResourceBlock>,
    #[serde(default)]
    pub data_sources: Vec<ResourceBlock>,
}

#[derive(Debug, Deserialize)]
pub struct ResourceBlock {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, JsonValue>,
}

impl ResourceBlock {
    fn into_resource(self, read_only: bool) -> Resource {
        let mut resource = Resource::new(self.resource_type, self.name).with_read_only(read_only);
        // JSON null means "not set"
        for (key, value) in &self.attributes {
            if let Some(value) = Value::from_json(value) {
                resource.attributes.insert(key.clone(), value);
            }
        }
        resource
    }
}

impl ConfigFile {
    pub fn parse(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| format!("Parse error: {}", e))
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::parse(&content)
    }

    /// Resources followed by data sources, in declaration order.
    ///
    /// A `type.name` pair may only be declared once.
    pub fn into_resources(self) -> Result<Vec<Resource>, String> {
        let managed = self.resources.into_iter().map(|b| b.into_resource(false));
        let queries = self.data_sources.into_iter().map(|b| b.into_resource(true));

        let mut seen = HashSet::new();
        let mut resources = Vec::new();
        for resource in managed.chain(queries) {
            if !seen.insert(resource.id.clone()) {
                return Err(format!("{} is declared more than once", resource.id));
            }
            resources.push(resource);
        }
        Ok(resources)
    }
}

/// Provider settings from an optional file, then the environment, then flags
pub fn load_provider_config(
    path: Option<&Path>,
    region: Option<&str>,
    project_id: Option<&str>,
) -> Result<ProviderConfig, String> {
    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
            serde_json::from_str::<ProviderConfig>(&content)
                .map_err(|e| format!("Invalid provider configuration {}: {}", path.display(), e))?
        }
        None => ProviderConfig::default(),
    };
    Ok(override_config(
        config.merge_env(|key| std::env::var(key).ok()),
        region,
        project_id,
    ))
}

fn override_config(
    mut config: ProviderConfig,
    region: Option<&str>,
    project_id: Option<&str>,
) -> ProviderConfig {
    if let Some(region) = region {
        config.region = region.to_string();
    }
    if let Some(project_id) = project_id {
        config.project_id = project_id.to_string();
    }
    config
}
