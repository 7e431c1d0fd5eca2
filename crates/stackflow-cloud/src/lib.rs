//! Stackflow Cloud Infrastructure
//!
//! This crate provides the cloud provider abstraction for Stackflow: the
//! handler traits every backend implements, the registry that maps resource
//! kinds onto them, and the polling and exact-match primitives the handlers
//! are built from.
//!
//! # Supported Backends
//!
//! - **RightScale**: Servers, security groups (`stackflow-cloud-rightscale`)
//! - **HP Cloud / OpenStack**: Servers, databases, load balancers, security
//!   groups (`stackflow-cloud-hpcloud`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 stackflow-worker                 │
//! │            (job executor, deployer)              │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 stackflow-cloud                  │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Provider ── Registry ── Handler (consul) │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │    Poller    │  │   Resolver   │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │  rightscale   │ │    hpcloud    │
//! │    backend    │ │    backend    │
//! └───────────────┘ └───────────────┘
//! ```

pub mod client;
pub mod consul;
pub mod credentials;
pub mod error;
pub mod kind;
pub mod poll;
pub mod provider;
pub mod resolve;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use client::{Collection, ControlPlaneClient, Created, Filter, FilterOp, Queryable, RemoteItem};
pub use consul::{
    AdminAccount, DEFAULT_STORAGE_SIZE_GB, DatabaseConsul, DatabaseRecord, DatabaseRequest,
    LbNode, LoadBalancerConsul, LoadBalancerRecord, LoadBalancerRequest, SecurityGroupConsul,
    SecurityGroupRecord, SecurityGroupRuleConsul, SecurityRule, ServerConsul, ServerDefinition,
    ServerHandle, ServerRecord,
};
pub use credentials::{AuthMethod, Credentials};
pub use error::{CloudError, Result};
pub use kind::ResourceKind;
pub use poll::poll_with_timeout;
pub use provider::{
    Backend, DEFAULT_TIMEOUT, Handler, HandlerContext, Provider, Registry, RegistryBuilder,
};
pub use resolve::{Constraint, find_exact, require_exact};
