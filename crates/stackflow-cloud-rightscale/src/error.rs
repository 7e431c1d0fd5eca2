//! RightScale backend error types

use stackflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RightScaleError {
    #[error("RightScale authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("RightScale returned {status}:\n{body}")]
    Api { status: u16, body: String },

    #[error("Unexpected RightScale response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<RightScaleError> for CloudError {
    fn from(err: RightScaleError) -> Self {
        match err {
            RightScaleError::AuthenticationFailed(msg) => CloudError::Authentication(msg),
            RightScaleError::Api { status, body } => CloudError::RemoteApi { status, body },
            RightScaleError::InvalidResponse(msg) => CloudError::InvalidResponse(msg),
            RightScaleError::Http(e) => CloudError::Transport(e.to_string()),
            RightScaleError::Json(e) => CloudError::Json(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, RightScaleError>;
