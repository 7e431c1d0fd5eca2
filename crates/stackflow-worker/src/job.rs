//! Jobs and queue messages

use crate::stack::StackSpec;
use serde::{Deserialize, Serialize};

/// Inbound queue message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_name: String,
    pub request_id: String,
    pub stack_reference: String,
}

/// A deployment request whose stack reference resolved
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub request_id: String,
    pub stack: StackSpec,
}

impl Job {
    pub fn new(name: impl Into<String>, request_id: impl Into<String>, stack: StackSpec) -> Self {
        Self {
            name: name.into(),
            request_id: request_id.into(),
            stack,
        }
    }
}
