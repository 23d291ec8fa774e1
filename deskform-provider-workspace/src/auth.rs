//! Request authentication
//!
//! Either a pre-issued token is sent as-is, or an IAM token is obtained with
//! user name and password and cached for the lifetime of the provider.

use log::debug;
use serde_json::json;
use tokio::sync::RwLock;

use crate::config::AuthConfig;
use crate::error::{ApiError, ApiResult};

pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

pub struct Authenticator {
    config: AuthConfig,
    /// Base URL of the IAM service, ending with '/'
    iam_endpoint: String,
    /// Project scope of password tokens
    project_id: String,
    http: reqwest::Client,
    cached: RwLock<Option<String>>,
}

impl Authenticator {
    pub fn new(
        config: AuthConfig,
        iam_endpoint: String,
        project_id: String,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            iam_endpoint,
            project_id,
            http,
            cached: RwLock::new(None),
        }
    }

    /// Token to send in `X-Auth-Token`
    pub async fn token(&self) -> ApiResult<String> {
        let (user_name, password, domain_name) = match &self.config {
            AuthConfig::Token { token } => return Ok(token.clone()),
            AuthConfig::Password {
                user_name,
                password,
                domain_name,
            } => (user_name, password, domain_name),
        };

        if let Some(token) = self.cached.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut cached = self.cached.write().await;
        // Another task may have filled the cache while we waited for the lock
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let token = self
            .request_token(user_name, password, domain_name)
            .await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drop a cached token, e.g. after a 401
    pub async fn invalidate(&self) {
        self.cached.write().await.take();
    }

    async fn request_token(
        &self,
        user_name: &str,
        password: &str,
        domain_name: &str,
    ) -> ApiResult<String> {
        let url = format!("{}v3/auth/tokens", self.iam_endpoint);
        debug!("requesting IAM token for user {} from {}", user_name, url);

        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": user_name,
                            "password": password,
                            "domain": { "name": domain_name }
                        }
                    }
                },
                "scope": { "project": { "id": self.project_id } }
            }
        });

        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Auth(format!(
                "IAM returned status {}: {}",
                status.as_u16(),
                text
            )));
        }

        response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ApiError::Auth(format!("missing {} header", SUBJECT_TOKEN_HEADER)))
    }
}
