//! Response protocol
//!
//! Exactly one [`Response`] is produced for every queue message. Failure
//! messages carry a short summary only; the full error chain goes to the
//! operational log.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest error summary copied into a failure message
const MAX_SUMMARY_CHARS: usize = 200;

const LOG_HINT: &str = "See logs for a complete stack trace.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
    /// The message named a stack that could not be found
    Rejected,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "success",
            Status::Failure => "failure",
            Status::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub job_name: String,
    pub request_id: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// First line of `error`, cut to a bounded number of characters
pub fn summarize(error: &str) -> String {
    let first_line = error.lines().next().unwrap_or_default().trim();
    let summary = first_line.trim_end_matches('.');
    match summary.char_indices().nth(MAX_SUMMARY_CHARS) {
        Some((end, _)) => format!("{}...", &summary[..end]),
        None => summary.to_string(),
    }
}

impl Response {
    pub fn success(job_name: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            request_id: request_id.into(),
            status: Status::Success,
            message: None,
        }
    }

    /// Failure with `"<summary>. See logs for a complete stack trace."`
    pub fn failure(
        job_name: impl Into<String>,
        request_id: impl Into<String>,
        error: &str,
    ) -> Self {
        let summary = summarize(error);
        let summary = if summary.is_empty() {
            "Deployment failed".to_string()
        } else {
            summary
        };
        Self {
            job_name: job_name.into(),
            request_id: request_id.into(),
            status: Status::Failure,
            message: Some(format!("{}. {}", summary, LOG_HINT)),
        }
    }

    pub fn rejected(
        job_name: impl Into<String>,
        request_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            request_id: request_id.into(),
            status: Status::Rejected,
            message: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn dump_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
