//! Cloud provider error types

use crate::kind::ResourceKind;
use thiserror::Error;

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    /// The backend rejected the configured credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A convergence wait did not reach its target state in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Non-success response from a control plane
    #[error("Remote API returned {status}: {body}")]
    RemoteApi { status: u16, body: String },

    /// An exact-match lookup for a named dependency found nothing
    #[error("No exact match in {collection} for {constraints}")]
    ReferenceNotFound {
        collection: String,
        constraints: String,
    },

    #[error("Resource kind '{kind}' is not supported by {backend}")]
    UnsupportedResource {
        backend: String,
        kind: ResourceKind,
    },

    #[error("Handler registered for '{kind}' on {backend} is a {found} handler")]
    HandlerMismatch {
        backend: String,
        kind: ResourceKind,
        found: &'static str,
    },

    #[error("Resource entered a failed state: {0}")]
    ResourceFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid response from control plane: {0}")]
    InvalidResponse(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Data plane error: {0}")]
    DataPlane(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether this error belongs to the remote-API class, which includes
    /// unresolved references since the request they feed cannot proceed.
    pub fn is_remote_api(&self) -> bool {
        matches!(
            self,
            CloudError::RemoteApi { .. } | CloudError::ReferenceNotFound { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CloudError::Timeout(_))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            CloudError::RemoteApi { status, .. } => Some(*status),
            CloudError::ReferenceNotFound { .. } => Some(404),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
