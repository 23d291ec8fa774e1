//! HTTP client for one vendor service endpoint
//!
//! Paths are relative to the service endpoint and may contain the
//! `{project_id}` placeholder, e.g. `v2/{project_id}/desktops`.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use reqwest::Method;
use serde_json::Value as JsonValue;

use crate::auth::{AUTH_TOKEN_HEADER, Authenticator};
use crate::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    endpoint: String,
    order_endpoint: Option<String>,
    project_id: String,
    auth: Arc<Authenticator>,
    max_retries: u32,
    poll_override: Option<Duration>,
}

impl ServiceClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: String,
        project_id: String,
        auth: Arc<Authenticator>,
    ) -> Self {
        Self {
            http,
            endpoint,
            order_endpoint: None,
            project_id,
            auth,
            max_retries: 0,
            poll_override: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_poll_override(mut self, interval: Option<Duration>) -> Self {
        self.poll_override = interval;
        self
    }

    /// Endpoint of the billing service that tracks prepaid orders
    pub fn with_order_endpoint(mut self, endpoint: String) -> Self {
        self.order_endpoint = Some(endpoint);
        self
    }

    /// Client for the billing order API, sharing credentials and retries.
    ///
    /// Without an order endpoint the service endpoint itself is used.
    pub fn orders(&self) -> ServiceClient {
        let mut client = self.clone();
        if let Some(endpoint) = &self.order_endpoint {
            client.endpoint = endpoint.clone();
        }
        client
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Interval that replaces every wait's delay and poll interval, if any
    pub fn poll_override(&self) -> Option<Duration> {
        self.poll_override
    }

    /// Full URL for a relative path
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.endpoint,
            path.replace("{project_id}", &self.project_id)
        )
    }

    pub async fn get(&self, path: &str) -> ApiResult<JsonValue> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &JsonValue) -> ApiResult<JsonValue> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &JsonValue) -> ApiResult<JsonValue> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: &JsonValue) -> ApiResult<JsonValue> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> ApiResult<JsonValue> {
        self.request(Method::DELETE, path, None).await
    }

    /// Send a request and decode the JSON response (an empty body yields `null`)
    ///
    /// Transport failures and 5xx responses are retried up to `max_retries`
    /// times with a linear backoff.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> ApiResult<JsonValue> {
        let url = self.url(path);
        let mut attempt = 0;
        loop {
            let result = self.send_once(method.clone(), &url, body).await;
            let retryable = match &result {
                Err(ApiError::Http(e)) => e.is_connect() || e.is_timeout(),
                Err(ApiError::Status { status, .. }) => *status >= 500,
                _ => false,
            };
            if !retryable || attempt >= self.max_retries {
                return result;
            }
            attempt += 1;
            let backoff = Duration::from_millis(500 * u64::from(attempt));
            warn!(
                "{} {} failed, retrying in {:?} (attempt {}/{})",
                method, url, backoff, attempt, self.max_retries
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&JsonValue>,
    ) -> ApiResult<JsonValue> {
        debug!("{} {}", method, url);
        let token = self.auth.token().await?;

        let mut request = self
            .http
            .request(method.clone(), url)
            .header(AUTH_TOKEN_HEADER, token)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            warn!(
                "{} {} returned {}: {}",
                method,
                url,
                status.as_u16(),
                text
            );
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.auth.invalidate().await;
            }
            return Err(status_error(status.as_u16(), text));
        }

        if text.trim().is_empty() {
            return Ok(JsonValue::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Build `ApiError::Status`, reading either `{"error_code", "error_msg"}`
/// or the nested `{"error": {"code", "message"}}` body shape
fn status_error(status: u16, body: String) -> ApiError {
    let parsed: Option<JsonValue> = serde_json::from_str(&body).ok();
    let field = |flat: &str, nested: &str| -> Option<String> {
        let parsed = parsed.as_ref()?;
        parsed
            .get(flat)
            .or_else(|| parsed.get("error").and_then(|e| e.get(nested)))
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    };

    ApiError::Status {
        status,
        error_code: field("error_code", "code"),
        error_msg: field("error_msg", "message"),
        body,
    }
}

/// Append URL-encoded query parameters, skipping empty values
pub fn with_query(path: &str, params: &[(&str, String)]) -> String {
    let query: Vec<String> = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect();
    if query.is_empty() {
        return path.to_string();
    }
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{}{}{}", path, separator, query.join("&"))
}

/// Typed accessors over a decoded JSON response, addressed by JSON pointer
pub trait JsonExt {
    fn str_at(&self, pointer: &str) -> Option<&str>;
    fn array_at(&self, pointer: &str) -> &[JsonValue];
}

impl JsonExt for JsonValue {
    fn str_at(&self, pointer: &str) -> Option<&str> {
        self.pointer(pointer).and_then(JsonValue::as_str)
    }

    fn array_at(&self, pointer: &str) -> &[JsonValue] {
        self.pointer(pointer)
            .and_then(JsonValue::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Required string field of a response
pub fn required_str<'a>(body: &'a JsonValue, pointer: &'static str) -> ApiResult<&'a str> {
    body.str_at(pointer)
        .filter(|s| !s.is_empty())
        .ok_or(ApiError::MissingField(pointer))
}
