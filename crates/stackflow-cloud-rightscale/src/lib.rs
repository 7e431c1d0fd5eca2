//! RightScale backend for Stackflow
//!
//! Servers are modelled as RightScale server definitions inside a
//! deployment named after the stack; launching a definition produces an
//! instance that is polled until it reports `operational`.
//!
//! # Features
//!
//! - Deployment creation (tolerates API refusals)
//! - Server definition with exact-match reference resolution
//! - Launch with text inputs and convergence polling
//! - Security groups and CIDR ingress rules
//!
//! # Requirements
//!
//! - A RightScale OAuth refresh token (`refresh_token` credential)
//! - `region_name` naming the RightScale cloud (e.g. `EC2 us-east-1`)
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud::{Credentials, Provider};
//! use stackflow_cloud_rightscale::RightScaleBackend;
//!
//! let mut provider = Provider::new(Arc::new(RightScaleBackend::new()), credentials);
//! let servers = provider.servers().await?;
//! servers.create_stack("web-tier").await?;
//! ```

pub mod api;
pub mod backend;
pub mod error;
mod scope;
pub mod security_groups;
pub mod servers;

pub use api::RightScaleApi;
pub use backend::{BACKEND_NAME, RightScaleBackend};
pub use error::{Result, RightScaleError};
pub use security_groups::{RightScaleSecurityGroupRules, RightScaleSecurityGroups};
pub use servers::RightScaleServers;
