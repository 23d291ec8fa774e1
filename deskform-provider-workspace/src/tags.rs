//! Resource tags
//!
//! Tags are a `Value::Map` of strings in configuration and a list of
//! `{key, value}` objects on the wire.

use std::collections::HashMap;

use deskform_core::resource::Value;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::ServiceClient;
use crate::error::ApiResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Map of tags to the wire list, sorted by key
pub fn expand_tags(tags: &HashMap<String, Value>) -> Vec<Tag> {
    let mut expanded: Vec<Tag> = tags
        .iter()
        .map(|(key, value)| Tag {
            key: key.clone(),
            value: value.as_str().map(str::to_string).unwrap_or_else(|| value.to_json().to_string()),
        })
        .collect();
    expanded.sort_by(|a, b| a.key.cmp(&b.key));
    expanded
}

/// Wire list of tags (skipping malformed entries) to a map
pub fn flatten_tags(tags: &[serde_json::Value]) -> HashMap<String, Value> {
    tags.iter()
        .filter_map(|tag| serde_json::from_value::<Tag>(tag.clone()).ok())
        .map(|tag| (tag.key, Value::String(tag.value)))
        .collect()
}

/// Tags to remove and tags to add to go from `old` to `new`.
///
/// A changed value shows up in both lists.
pub fn diff_tags(
    old: &HashMap<String, Value>,
    new: &HashMap<String, Value>,
) -> (Vec<Tag>, Vec<Tag>) {
    let removed: HashMap<String, Value> = old
        .iter()
        .filter(|(key, value)| new.get(*key) != Some(*value))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let added: HashMap<String, Value> = new
        .iter()
        .filter(|(key, value)| old.get(*key) != Some(*value))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (expand_tags(&removed), expand_tags(&added))
}

/// Apply a tag change through `v2/{project_id}/{resource_type}/{id}/tags/action`
pub async fn update_resource_tags(
    client: &ServiceClient,
    resource_type: &str,
    resource_id: &str,
    old: &HashMap<String, Value>,
    new: &HashMap<String, Value>,
) -> ApiResult<()> {
    let path = format!("v2/{{project_id}}/{}/{}/tags/action", resource_type, resource_id);
    let (remove, add) = diff_tags(old, new);

    if !remove.is_empty() {
        debug!("removing {} tag(s) from {} {}", remove.len(), resource_type, resource_id);
        client
            .post(&path, &json!({"action": "delete", "tags": remove}))
            .await?;
    }
    if !add.is_empty() {
        debug!("adding {} tag(s) to {} {}", add.len(), resource_type, resource_id);
        client
            .post(&path, &json!({"action": "create", "tags": add}))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::client_for;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn flatten_skips_malformed_entries() {
        let flat = flatten_tags(&[
            json!({"key": "env", "value": "prod"}),
            json!({"value": "orphan"}),
            json!({"key": "team"}),
        ]);
        assert_eq!(flat, tags(&[("env", "prod"), ("team", "")]));
    }

    #[test]
    fn changed_value_is_removed_and_added() {
        let (remove, add) = diff_tags(
            &tags(&[("env", "dev"), ("keep", "1"), ("gone", "x")]),
            &tags(&[("env", "prod"), ("keep", "1"), ("new", "y")]),
        );
        let keys = |t: &[Tag]| t.iter().map(|t| t.key.clone()).collect::<Vec<_>>();
        assert_eq!(keys(remove.as_slice()), vec!["env", "gone"]);
        assert_eq!(keys(add.as_slice()), vec!["env", "new"]);
        assert_eq!(add[0].value, "prod");
    }

    #[tokio::test]
    async fn update_deletes_before_creating() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/proj/desktops/d-1/tags/action"))
            .and(body_json(json!({"action": "delete", "tags": [{"key": "env", "value": "dev"}]})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/proj/desktops/d-1/tags/action"))
            .and(body_json(json!({"action": "create", "tags": [{"key": "env", "value": "prod"}]})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        update_resource_tags(
            &client,
            "desktops",
            "d-1",
            &tags(&[("env", "dev")]),
            &tags(&[("env", "prod")]),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unchanged_tags_send_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let same = tags(&[("env", "prod")]);
        update_resource_tags(&client, "desktops", "d-1", &same, &same)
            .await
            .unwrap();
    }
}
