//! Error types for the Workspace API client

use deskform_core::provider::ProviderError;
use deskform_core::waiter::WaitError;

use crate::jobs::SubJobFailure;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}, code {}): {}", error_code.as_deref().unwrap_or("-"), error_msg.as_deref().unwrap_or(body))]
    Status {
        status: u16,
        error_code: Option<String>,
        error_msg: Option<String>,
        body: String,
    },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Unable to find {0} from API response")]
    MissingField(&'static str),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("job ({job_id}) finished with status {status}{}", format_failures(failures))]
    JobFailed {
        job_id: String,
        status: String,
        failures: Vec<SubJobFailure>,
    },

    #[error("{0}")]
    Validation(String),
}

fn format_failures(failures: &[SubJobFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = failures.iter().map(|f| f.to_string()).collect();
    format!(": {}", parts.join("; "))
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            ApiError::Status { error_code, .. } => error_code.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_)) || self.status() == Some(404)
    }

    /// Treat a 400 carrying one of `codes` as "not found"
    pub fn convert_400_to_404(self, codes: &[&str]) -> Self {
        match &self {
            ApiError::Status {
                status: 400,
                error_code: Some(code),
                ..
            } if codes.contains(&code.as_str()) => ApiError::NotFound(code.clone()),
            _ => self,
        }
    }

    pub fn has_status_and_code(&self, status: u16, code: &str) -> bool {
        self.status() == Some(status) && self.error_code() == Some(code)
    }
}

impl From<ApiError> for ProviderError {
    fn from(err: ApiError) -> Self {
        ProviderError::new(err.to_string()).with_cause(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Extension to attach context while converting into `ProviderError`
pub trait ResultExt<T> {
    fn context(self, message: impl Into<String>) -> Result<T, ProviderError>;
}

impl<T> ResultExt<T> for ApiResult<T> {
    fn context(self, message: impl Into<String>) -> Result<T, ProviderError> {
        self.map_err(|e| {
            let message = format!("{}: {}", message.into(), e);
            ProviderError::new(message).with_cause(e)
        })
    }
}
