//! State file structures

use std::collections::HashMap;

use deskform_core::resource::{ResourceId, State, Value};
use serde::{Deserialize, Serialize};

/// Everything deskform manages, as persisted by a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// Format version
    pub version: u32,
    /// Incremented on every write
    pub serial: u64,
    /// Fixed for the lifetime of a state, guards against overwriting another one
    pub lineage: String,
    /// deskform version that wrote the file
    pub deskform_version: String,
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            deskform_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    /// Prepare for a write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.deskform_version = env!("CARGO_PKG_VERSION").to_string();
    }

    pub fn find(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| r.resource_type == id.resource_type && r.name == id.name)
    }

    /// Identifier recorded for a resource
    pub fn identifier(&self, id: &ResourceId) -> Option<&str> {
        self.find(id).and_then(|r| r.identifier.as_deref())
    }

    /// Record a state read from the provider; a missing object is removed
    pub fn record(&mut self, state: &State) {
        if !state.exists {
            self.remove(&state.id);
            return;
        }
        let entry = ResourceState::from_state(state);
        match self
            .resources
            .iter_mut()
            .find(|r| r.resource_type == entry.resource_type && r.name == entry.name)
        {
            Some(existing) => *existing = entry,
            None => self.resources.push(entry),
        }
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<ResourceState> {
        let pos = self
            .resources
            .iter()
            .position(|r| r.resource_type == id.resource_type && r.name == id.name)?;
        Some(self.resources.remove(pos))
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// One managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// e.g. "workspace_desktop"
    pub resource_type: String,
    pub name: String,
    /// Remote id assigned by the vendor API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub attributes: HashMap<String, serde_json::Value>,
}

impl ResourceState {
    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.resource_type, &self.name)
    }

    pub fn from_state(state: &State) -> Self {
        Self {
            resource_type: state.id.resource_type.clone(),
            name: state.id.name.clone(),
            identifier: state.identifier.clone(),
            attributes: state
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        }
    }

    /// Recorded state as the core model sees it
    pub fn to_state(&self) -> State {
        let attributes = self
            .attributes
            .iter()
            .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
            .collect();
        let state = State::existing(self.id(), attributes);
        match &self.identifier {
            Some(identifier) => state.with_identifier(identifier.clone()),
            None => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskform_core::resource::AttributeMap;

    fn desktop_state(size: i64) -> State {
        State::existing(
            ResourceId::new("workspace_desktop", "dev"),
            HashMap::from([
                ("flavor_id".to_string(), Value::from("workspace.x86.ultimate.large2")),
                ("root_volume_size".to_string(), Value::Int(size)),
            ]),
        )
        .with_identifier("d-1")
    }

    #[test]
    fn new_state_file_is_empty() {
        let state = StateFile::new();
        assert_eq!(state.version, StateFile::CURRENT_VERSION);
        assert_eq!(state.serial, 0);
        assert!(!state.lineage.is_empty());
        assert!(state.resources.is_empty());
    }

    #[test]
    fn record_replaces_existing_entry() {
        let mut file = StateFile::new();
        file.record(&desktop_state(80));
        file.record(&desktop_state(100));
        assert_eq!(file.resources.len(), 1);

        let id = ResourceId::new("workspace_desktop", "dev");
        assert_eq!(file.identifier(&id), Some("d-1"));
        let state = file.find(&id).unwrap().to_state();
        assert_eq!(state.get_int("root_volume_size"), Some(100));
        assert_eq!(state.identifier.as_deref(), Some("d-1"));
    }

    #[test]
    fn recording_a_missing_object_forgets_it() {
        let mut file = StateFile::new();
        file.record(&desktop_state(80));
        file.record(&State::not_found(ResourceId::new("workspace_desktop", "dev")));
        assert!(file.resources.is_empty());
    }

    #[test]
    fn serial_bumps_on_write() {
        let mut file = StateFile::new();
        file.increment_serial();
        file.increment_serial();
        assert_eq!(file.serial, 2);
    }
}
