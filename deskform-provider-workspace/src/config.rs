//! Provider configuration
//!
//! Values come from a JSON file, environment variables, or both (the
//! environment fills whatever the file leaves unset).

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ApiError, ApiResult};

/// Vendor services the provider talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Desktops, desktop pools and the service registration
    Workspace,
    /// App servers, image servers and server groups
    AppStream,
    Iam,
    /// Billing orders of prepaid resources
    Bss,
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Service::Workspace => "workspace",
            Service::AppStream => "appstream",
            Service::Iam => "iam",
            Service::Bss => "bss",
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AuthConfig {
    Token {
        token: String,
    },
    Password {
        user_name: String,
        password: String,
        domain_name: String,
    },
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProviderConfig {
    pub region: String,
    pub project_id: String,
    pub auth: Option<AuthConfig>,
    /// Service name -> endpoint URL
    pub endpoints: HashMap<String, String>,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// Per-request timeout in seconds
    pub request_timeout: Option<u64>,
    pub max_retries: Option<u32>,
    /// Replaces the delay and poll interval of every wait, in seconds
    pub poll_interval_override: Option<f64>,
}

impl ProviderConfig {
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Load from `HW_*` environment variables
    pub fn from_env() -> Self {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    /// Fill unset fields from an environment lookup
    pub fn merge_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if self.region.is_empty()
            && let Some(region) = non_empty("HW_REGION_NAME")
        {
            self.region = region;
        }
        if self.project_id.is_empty()
            && let Some(project_id) = non_empty("HW_PROJECT_ID")
        {
            self.project_id = project_id;
        }
        if self.auth.is_none() {
            if let Some(token) = non_empty("HW_AUTH_TOKEN") {
                self.auth = Some(AuthConfig::Token { token });
            } else if let (Some(user_name), Some(password), Some(domain_name)) = (
                non_empty("HW_USER_NAME"),
                non_empty("HW_PASSWORD"),
                non_empty("HW_DOMAIN_NAME"),
            ) {
                self.auth = Some(AuthConfig::Password {
                    user_name,
                    password,
                    domain_name,
                });
            }
        }
        for (service, key) in [
            (Service::Workspace, "HW_WORKSPACE_ENDPOINT"),
            (Service::AppStream, "HW_APPSTREAM_ENDPOINT"),
            (Service::Iam, "HW_IAM_ENDPOINT"),
            (Service::Bss, "HW_BSS_ENDPOINT"),
        ] {
            if let Some(endpoint) = non_empty(key) {
                self.endpoints
                    .entry(service.name().to_string())
                    .or_insert(endpoint);
            }
        }
        if let Some(insecure) = non_empty("HW_INSECURE") {
            self.insecure = self.insecure || insecure == "true" || insecure == "1";
        }
        if self.poll_interval_override.is_none() {
            self.poll_interval_override =
                non_empty("DESKFORM_POLL_INTERVAL").and_then(|v| v.parse().ok());
        }
        self
    }

    pub fn validate(&self) -> ApiResult<()> {
        if self.region.is_empty() && self.endpoints.len() < 2 {
            return Err(ApiError::Config(
                "region is required (set HW_REGION_NAME or --region)".to_string(),
            ));
        }
        if self.project_id.is_empty() {
            return Err(ApiError::Config(
                "project_id is required (set HW_PROJECT_ID or --project-id)".to_string(),
            ));
        }
        if self.auth.is_none() {
            return Err(ApiError::Config(
                "no credentials: set HW_AUTH_TOKEN or HW_USER_NAME/HW_PASSWORD/HW_DOMAIN_NAME"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Endpoint of a service, always ending with '/'
    pub fn endpoint(&self, service: Service) -> String {
        let endpoint = match (self.endpoints.get(service.name()), service) {
            (Some(endpoint), _) => endpoint.clone(),
            // Billing is a global service
            (None, Service::Bss) => "https://bss.myhuaweicloud.com/".to_string(),
            (None, _) => format!("https://{}.{}.myhuaweicloud.com/", service.name(), self.region),
        };
        if endpoint.ends_with('/') {
            endpoint
        } else {
            format!("{}/", endpoint)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout
                .unwrap_or(Self::DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(Self::DEFAULT_MAX_RETRIES)
    }

    pub fn poll_override(&self) -> Option<Duration> {
        self.poll_interval_override
            .filter(|secs| *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn merge_env_fills_missing_fields() {
        let config = ProviderConfig::default().merge_env(env(&[
            ("HW_REGION_NAME", "cn-north-4"),
            ("HW_PROJECT_ID", "proj"),
            ("HW_AUTH_TOKEN", "tok"),
            ("DESKFORM_POLL_INTERVAL", "0.5"),
        ]));

        assert_eq!(config.region, "cn-north-4");
        assert_eq!(config.project_id, "proj");
        assert_eq!(
            config.auth,
            Some(AuthConfig::Token {
                token: "tok".to_string()
            })
        );
        assert_eq!(config.poll_override(), Some(Duration::from_millis(500)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_values_win_over_env() {
        let config = ProviderConfig {
            region: "ap-southeast-1".to_string(),
            ..Default::default()
        }
        .merge_env(env(&[("HW_REGION_NAME", "cn-north-4")]));
        assert_eq!(config.region, "ap-southeast-1");
    }

    #[test]
    fn password_auth_needs_all_three() {
        let config = ProviderConfig::default().merge_env(env(&[
            ("HW_USER_NAME", "admin"),
            ("HW_PASSWORD", "secret"),
        ]));
        assert!(config.auth.is_none());
    }

    #[test]
    fn default_endpoints() {
        let config = ProviderConfig {
            region: "cn-north-4".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.endpoint(Service::Workspace),
            "https://workspace.cn-north-4.myhuaweicloud.com/"
        );

        let mut config = config;
        config
            .endpoints
            .insert("appstream".to_string(), "http://127.0.0.1:8080".to_string());
        assert_eq!(config.endpoint(Service::AppStream), "http://127.0.0.1:8080/");
        assert_eq!(config.endpoint(Service::Bss), "https://bss.myhuaweicloud.com/");
    }

    #[test]
    fn deserialize_from_json() {
        let config: ProviderConfig = serde_json::from_str(
            r#"{
                "region": "cn-north-4",
                "project_id": "p1",
                "auth": {"user_name": "u", "password": "p", "domain_name": "d"},
                "max_retries": 5
            }"#,
        )
        .unwrap();
        assert!(matches!(config.auth, Some(AuthConfig::Password { .. })));
        assert_eq!(config.max_retries(), 5);
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn validate_reports_missing_project() {
        let config = ProviderConfig {
            region: "cn-north-4".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("project_id"));
    }
}
