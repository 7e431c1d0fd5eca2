//! HP Cloud (OpenStack) backend for Stackflow
//!
//! # Features
//!
//! - Keystone v2 authentication with API keys or username/password
//! - Nova servers, security groups and rules
//! - DBaaS MySQL instances with admin account provisioning
//! - LBaaS load balancers
//!
//! # Credentials
//!
//! ```yaml
//! deployer_credentials:
//!   hpcloud:
//!     auth_url: https://region-a.geo-1.identity.hpcloudsvc.com:35357/v2.0/
//!     tenant_name: farley.mowat-tenant1
//!     access_key_id: MZOFIE9S83FOS248FIE3
//!     secret_access_key: EU859vjksor73gkY378f9gkslbkrabcxwfyW2loo
//!     region_name: az-1.region-a.geo-1
//! ```
//!
//! `username` and `password` work too; API keys win when both are set.

pub mod backend;
pub mod client;
pub mod dbaas;
pub mod error;
pub mod keystone;
pub mod lbaas;
pub mod mysql;
pub mod nova;

pub use backend::{BACKEND_NAME, HpCloudBackend};
pub use client::OpenStackClient;
pub use dbaas::{AdminSession, BootstrapCredentials, DataPlane, HpDatabases};
pub use error::{HpCloudError, Result};
pub use lbaas::HpLoadBalancers;
pub use mysql::MySqlDataPlane;
pub use nova::{NovaSecurityGroupRules, NovaSecurityGroups, NovaServers};
