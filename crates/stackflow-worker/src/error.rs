//! Worker error types

use stackflow_cloud::CloudError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Invalid stack reference: {0:?}")]
    InvalidReference(String),

    #[error("Failed to parse stack {path}: {source}")]
    StackParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Unknown backend '{0}'")]
    UnknownBackend(String),

    #[error("No deployer credentials for backend '{0}'")]
    MissingCredentials(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("Failed to encode response: {0}")]
    Encode(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
