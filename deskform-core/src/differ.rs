//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the "desired state" declared in the configuration file with the
//! "current state" fetched from the Provider, and generates a list of
//! required Effects (Plan).

use std::collections::{HashMap, HashSet};

use crate::effect::Effect;
use crate::plan::Plan;
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::ResourceSchema;

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with differences that cannot be applied in place
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State, schema: Option<&ResourceSchema>) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes);

    if changed.is_empty() {
        return Diff::NoChange(desired.id.clone());
    }

    let force_new = schema.is_some_and(|s| {
        changed
            .iter()
            .any(|name| s.attributes.get(name).is_some_and(|a| a.force_new))
    });

    if force_new {
        Diff::Replace {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Whether a desired value is satisfied by the current value.
///
/// Maps only compare the keys present in the desired map, so attributes
/// filled by the remote API (ids, timestamps) do not count as drift.
pub fn value_matches(desired: &Value, current: &Value) -> bool {
    match (desired, current) {
        (Value::Map(d), Value::Map(c)) => d
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .all(|(k, v)| c.get(k).is_some_and(|cv| value_matches(v, cv))),
        (Value::List(d), Value::List(c)) => {
            d.len() == c.len() && d.iter().zip(c).all(|(dv, cv)| value_matches(dv, cv))
        }
        (Value::Int(d), Value::Float(c)) | (Value::Float(c), Value::Int(d)) => *d as f64 == *c,
        _ => desired == current,
    }
}

/// Find changed attributes between desired and current state
fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
) -> Vec<String> {
    let mut changed: Vec<String> = desired
        .iter()
        // Skip internal attributes (starting with _)
        .filter(|(key, _)| !key.starts_with('_'))
        .filter(|(key, desired_value)| match current.get(key.as_str()) {
            Some(current_value) => !value_matches(desired_value, current_value),
            None => !desired_value.is_empty(),
        })
        .map(|(key, _)| key.clone())
        .collect();
    changed.sort();
    changed
}

/// Compute Diff for multiple resources and generate a Plan
///
/// Resources recorded in `current_states` but absent from `desired` are
/// scheduled for deletion, after all creates and updates.
pub fn create_plan(
    desired: &[Resource],
    current_states: &HashMap<ResourceId, State>,
    schemas: &HashMap<String, ResourceSchema>,
) -> Plan {
    let mut plan = Plan::new();

    for resource in desired {
        if resource.is_data_source() {
            plan.add(Effect::Read(resource.clone()));
            continue;
        }

        let current = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        let schema = schemas.get(&resource.id.resource_type);
        match diff(resource, &current, schema) {
            Diff::Create(r) => plan.add(Effect::Create(r)),
            Diff::Update {
                id,
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Update {
                id,
                from,
                to,
                changed_attributes,
            }),
            Diff::Replace {
                id,
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Replace {
                id,
                from,
                to,
                changed_attributes,
            }),
            Diff::NoChange(_) => {}
        }
    }

    let declared: HashSet<&ResourceId> = desired.iter().map(|r| &r.id).collect();
    let mut orphans: Vec<&State> = current_states
        .values()
        .filter(|s| s.exists && !declared.contains(&s.id))
        .collect();
    orphans.sort_by(|a, b| a.id.to_string().cmp(&b.id.to_string()));
    for state in orphans {
        if let Some(identifier) = &state.identifier {
            plan.add(Effect::Delete {
                id: state.id.clone(),
                identifier: identifier.clone(),
                state: state.clone(),
            });
        }
    }

    plan
}

/// Plan deleting every recorded resource, in reverse declaration order
pub fn destroy_plan(states: &[State]) -> Plan {
    let mut plan = Plan::new();
    for state in states.iter().rev() {
        if let (true, Some(identifier)) = (state.exists, &state.identifier) {
            plan.add(Effect::Delete {
                id: state.id.clone(),
                identifier: identifier.clone(),
                state: state.clone(),
            });
        }
    }
    plan
}

/// Attribute-level view of an update, answering "did this attribute change?"
pub struct AttributeChanges<'a> {
    from: &'a HashMap<String, Value>,
    to: &'a HashMap<String, Value>,
}

impl<'a> AttributeChanges<'a> {
    pub fn between(from: &'a State, to: &'a Resource) -> Self {
        Self {
            from: &from.attributes,
            to: &to.attributes,
        }
    }

    pub fn has_change(&self, key: &str) -> bool {
        match (self.to.get(key), self.from.get(key)) {
            (Some(desired), Some(current)) => !value_matches(desired, current),
            (Some(desired), None) => !desired.is_empty(),
            (None, _) => false,
        }
    }

    pub fn has_changes(&self, keys: &[&str]) -> bool {
        keys.iter().any(|k| self.has_change(k))
    }

    pub fn old_value(&self, key: &str) -> Option<&'a Value> {
        self.from.get(key)
    }

    pub fn new_value(&self, key: &str) -> Option<&'a Value> {
        self.to.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeSchema, AttributeType};

    fn state_with(attrs: &[(&str, Value)]) -> State {
        State::existing(
            ResourceId::new("workspace_desktop", "dev"),
            attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
        .with_identifier("d-1")
    }

    #[test]
    fn diff_create_when_not_exists() {
        let desired = Resource::new("workspace_desktop", "dev");
        let current = State::not_found(ResourceId::new("workspace_desktop", "dev"));

        let result = diff(&desired, &current, None);
        assert!(matches!(result, Diff::Create(_)));
    }

    #[test]
    fn diff_no_change_ignores_computed_members() {
        let mut volume = HashMap::new();
        volume.insert("type".to_string(), Value::from("SAS"));
        volume.insert("size".to_string(), Value::Int(80));
        let desired = Resource::new("workspace_desktop", "dev")
            .with_attribute("root_volume", Value::Map(volume.clone()))
            .with_attribute("_timeouts", Value::Map(HashMap::new()));

        volume.insert("id".to_string(), Value::from("vol-1"));
        let current = state_with(&[
            ("root_volume", Value::Map(volume)),
            ("status", Value::from("ACTIVE")),
        ]);

        assert!(matches!(
            diff(&desired, &current, None),
            Diff::NoChange(_)
        ));
    }

    #[test]
    fn diff_update_when_different() {
        let desired = Resource::new("workspace_desktop", "dev")
            .with_attribute("flavor_id", Value::from("workspace.x86.ultimate.large2"));
        let current = state_with(&[("flavor_id", Value::from("workspace.x86.ultimate.large"))]);

        match diff(&desired, &current, None) {
            Diff::Update {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["flavor_id".to_string()]),
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn diff_replace_on_force_new() {
        let schema = ResourceSchema::new("workspace_desktop")
            .attribute(AttributeSchema::new("user_name", AttributeType::String).force_new());
        let desired = Resource::new("workspace_desktop", "dev")
            .with_attribute("user_name", Value::from("bob"));
        let current = state_with(&[("user_name", Value::from("alice"))]);

        assert!(matches!(
            diff(&desired, &current, Some(&schema)),
            Diff::Replace { .. }
        ));
    }

    #[test]
    fn create_plan_orders_deletes_last() {
        let resources = vec![
            Resource::new("workspace_desktop", "new"),
            Resource::new("workspace_desktop", "dev").with_attribute("image_id", "img-2".into()),
            Resource::new("workspace_app_servers", "all").with_read_only(true),
        ];

        let mut current_states = HashMap::new();
        current_states.insert(
            ResourceId::new("workspace_desktop", "dev"),
            state_with(&[("image_id", Value::from("img-1"))]),
        );
        let mut orphan = state_with(&[]);
        orphan.id = ResourceId::new("workspace_desktop", "old");
        current_states.insert(orphan.id.clone(), orphan);

        let plan = create_plan(&resources, &current_states, &HashMap::new());

        assert_eq!(plan.effects().len(), 4);
        assert!(matches!(plan.effects()[0], Effect::Create(_)));
        assert!(matches!(plan.effects()[1], Effect::Update { .. }));
        assert!(matches!(plan.effects()[2], Effect::Read(_)));
        assert!(matches!(plan.effects()[3], Effect::Delete { ref identifier, .. } if identifier == "d-1"));
    }

    #[test]
    fn destroy_plan_reverses_order() {
        let mut first = state_with(&[]);
        first.id.name = "first".to_string();
        let mut second = state_with(&[]);
        second.id.name = "second".to_string();

        let plan = destroy_plan(&[first, second]);
        let names: Vec<_> = plan
            .effects()
            .iter()
            .map(|e| e.resource_id().name.clone())
            .collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[test]
    fn attribute_changes() {
        let from = state_with(&[
            ("name", Value::from("a")),
            ("size", Value::Int(2)),
        ]);
        let to = Resource::new("workspace_desktop", "dev")
            .with_attribute("name", "b".into())
            .with_attribute("size", Value::Int(2));

        let changes = AttributeChanges::between(&from, &to);
        assert!(changes.has_change("name"));
        assert!(!changes.has_change("size"));
        assert!(!changes.has_change("tags"));
        assert!(changes.has_changes(&["size", "name"]));
        assert_eq!(changes.old_value("name"), Some(&Value::from("a")));
        assert_eq!(changes.new_value("name"), Some(&Value::from("b")));
    }

    #[test]
    fn numeric_values_compare_across_kinds() {
        assert!(value_matches(&Value::Int(2), &Value::Float(2.0)));
        assert!(!value_matches(&Value::Int(2), &Value::Float(2.5)));
    }
}
