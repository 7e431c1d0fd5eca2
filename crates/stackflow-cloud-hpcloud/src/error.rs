//! HP Cloud backend error types

use stackflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HpCloudError {
    #[error("HP Cloud authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("HP Cloud returned {status}:\n{body}")]
    Api { status: u16, body: String },

    #[error("No '{service_type}' endpoint in the service catalog{}", region_suffix(.region))]
    MissingService {
        service_type: String,
        region: Option<String>,
    },

    #[error("Unexpected HP Cloud response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn region_suffix(region: &Option<String>) -> String {
    region
        .as_deref()
        .map(|r| format!(" for region {}", r))
        .unwrap_or_default()
}

impl From<HpCloudError> for CloudError {
    fn from(err: HpCloudError) -> Self {
        match err {
            HpCloudError::AuthenticationFailed(msg) => CloudError::Authentication(msg),
            HpCloudError::Api { status, body } => CloudError::RemoteApi { status, body },
            HpCloudError::MissingService { .. } => CloudError::InvalidConfig(err.to_string()),
            HpCloudError::InvalidResponse(msg) => CloudError::InvalidResponse(msg),
            HpCloudError::Http(e) => CloudError::Transport(e.to_string()),
            HpCloudError::Json(e) => CloudError::Json(e),
            HpCloudError::Database(e) => CloudError::DataPlane(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, HpCloudError>;
