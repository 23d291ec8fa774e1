//! Offset-based list pagination

use serde_json::Value as JsonValue;

use crate::client::{JsonExt, ServiceClient, with_query};
use crate::error::ApiResult;

pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Collect `key` items across pages of `limit`, stopping at a short page
pub async fn list_by_offset(
    client: &ServiceClient,
    path: &str,
    key: &str,
    limit: usize,
) -> ApiResult<Vec<JsonValue>> {
    let pointer = format!("/{}", key);
    let mut items = Vec::new();
    let mut offset = 0usize;
    loop {
        let page_path = with_query(
            path,
            &[("limit", limit.to_string()), ("offset", offset.to_string())],
        );
        let body = client.get(&page_path).await?;
        let page = body.array_at(&pointer);
        let len = page.len();
        items.extend(page.iter().cloned());
        if len < limit {
            return Ok(items);
        }
        offset += len;
    }
}

/// Collect `key` items page by page until the API returns an empty page
pub async fn list_until_empty(
    client: &ServiceClient,
    path: &str,
    key: &str,
) -> ApiResult<Vec<JsonValue>> {
    let pointer = format!("/{}", key);
    let mut items = Vec::new();
    loop {
        let page_path = with_query(path, &[("offset", items.len().to_string())]);
        let body = client.get(&page_path).await?;
        let page = body.array_at(&pointer);
        if page.is_empty() {
            return Ok(items);
        }
        items.extend(page.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::client_for;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn offset_pages_stop_at_short_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/proj/app-servers"))
            .and(query_param("offset", "0"))
            .and(query_param("limit", "2"))
            .and(query_param("server_group_id", "g1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"id": "a"}, {"id": "b"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/proj/app-servers"))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"id": "c"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let items = list_by_offset(&client, "v1/{project_id}/app-servers?server_group_id=g1", "items", 2)
            .await
            .unwrap();
        let ids: Vec<_> = items.iter().filter_map(|i| i.str_at("/id")).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn until_empty_follows_offsets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "desktops": [{"desktop_id": "d1"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("offset", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"desktops": []})))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let items = list_until_empty(&client, "v2/{project_id}/desktops?pool_id=p1", "desktops")
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn missing_key_is_an_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": 0})))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let items = list_by_offset(&client, "v1/{project_id}/app-server-groups", "items", DEFAULT_PAGE_LIMIT)
            .await
            .unwrap();
        assert!(items.is_empty());
    }
}
