//! Resource handlers ("consuls")
//!
//! Each backend implements one consul per resource kind it supports. A
//! consul is bound to one provider session, may cache lazily resolved
//! context (deployment, cloud scope) and takes `&mut self`: it is owned by a
//! single job and never shared.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Normalized view of a server after create or lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Backend handle of the running server
    pub id: String,
    pub public_ips: Vec<String>,
    pub private_ips: Vec<String>,
}

/// Human-readable description of a server to define
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDefinition {
    /// Stack (deployment) the server belongs to
    pub stack: String,

    /// Name given to the server
    pub basename: String,

    /// Server template or image name
    pub template: String,

    /// Template revision; `None` means the backend's default/HEAD
    #[serde(default)]
    pub template_revision: Option<String>,

    /// Instance type / flavor name, e.g. `m3.xlarge`
    pub instance_type: String,

    /// Name of an ssh key already registered with the backend
    pub ssh_key_name: String,

    #[serde(default)]
    pub availability_zone: Option<String>,

    #[serde(default)]
    pub security_groups: Vec<String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Opaque result of `define_server`, consumed by `create_server`
#[derive(Debug, Clone, PartialEq)]
pub struct ServerHandle {
    reference: String,
    detail: Value,
}

impl ServerHandle {
    pub fn new(reference: impl Into<String>, detail: Value) -> Self {
        Self {
            reference: reference.into(),
            detail,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn detail(&self) -> &Value {
        &self.detail
    }
}

#[async_trait]
pub trait ServerConsul: Send + Sync {
    /// Create the stack's grouping container if the backend has one
    async fn create_stack(&mut self, name: &str) -> Result<()>;

    /// Servers of `role` within `stack`; `running` excludes servers that are
    /// shutting down or gone
    async fn find_servers(
        &mut self,
        stack: &str,
        role: &str,
        running: bool,
    ) -> Result<Vec<ServerRecord>>;

    /// Existing definitions named `basename` that have no live instance
    async fn find_server_defs(&mut self, stack: &str, basename: &str) -> Result<Vec<ServerHandle>>;

    /// Resolve every named reference and register the server
    async fn define_server(&mut self, definition: &ServerDefinition) -> Result<ServerHandle>;

    /// Launch a defined server and wait until it is operational
    async fn create_server(
        &mut self,
        handle: &ServerHandle,
        inputs: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<ServerRecord>;

    /// Wait until an existing server reports running
    async fn find_running(&mut self, server: &ServerRecord, timeout: Duration)
    -> Result<ServerRecord>;
}

/// Admin account a caller wants on a new database
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAccount {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AdminAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAccount")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub const DEFAULT_STORAGE_SIZE_GB: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseRequest {
    pub instance_name: String,

    /// Flavor name, e.g. `medium`
    pub instance_type: String,

    pub admin: AdminAccount,

    /// Defaults to `instance_name`
    #[serde(default)]
    pub db_name: Option<String>,

    #[serde(default = "default_storage_size_gb")]
    pub storage_size_gb: u32,

    #[serde(default)]
    pub security_groups: Vec<String>,
}

fn default_storage_size_gb() -> u32 {
    DEFAULT_STORAGE_SIZE_GB
}

impl DatabaseRequest {
    pub fn db_name(&self) -> &str {
        self.db_name.as_deref().unwrap_or(&self.instance_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseRecord {
    pub id: String,
    pub name: String,
    pub hostname: String,
    pub port: u16,
}

#[async_trait]
pub trait DatabaseConsul: Send + Sync {
    async fn find_dbs(&mut self, name: &str) -> Result<Vec<DatabaseRecord>>;

    /// Create a database instance and provision the requested admin account.
    ///
    /// A `Timeout` after the instance exists means "created but not usable".
    async fn create_db(&mut self, request: &DatabaseRequest, timeout: Duration)
    -> Result<DatabaseRecord>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbNode {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerRequest {
    pub name: String,
    pub protocol: String,
    pub port: u16,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub nodes: Vec<LbNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerRecord {
    pub id: String,
    pub name: String,
    pub virtual_ips: Vec<String>,
    pub nodes: Vec<LbNode>,
}

#[async_trait]
pub trait LoadBalancerConsul: Send + Sync {
    async fn find_lb_by_name(&mut self, name: &str) -> Result<Option<LoadBalancerRecord>>;

    async fn create_lb(
        &mut self,
        request: &LoadBalancerRequest,
        timeout: Duration,
    ) -> Result<LoadBalancerRecord>;

    /// Add nodes that the balancer does not already route to
    async fn add_lb_nodes(&mut self, lb: &LoadBalancerRecord, nodes: &[LbNode]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    #[serde(default)]
    pub id: Option<String>,
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    /// CIDR the rule admits traffic from
    pub source: String,
}

impl SecurityRule {
    /// Same traffic, regardless of backend id
    pub fn same_traffic(&self, other: &SecurityRule) -> bool {
        self.protocol.eq_ignore_ascii_case(&other.protocol)
            && self.from_port == other.from_port
            && self.to_port == other.to_port
            && self.source == other.source
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rules: Vec<SecurityRule>,
}

#[async_trait]
pub trait SecurityGroupConsul: Send + Sync {
    async fn find_security_groups(&mut self) -> Result<Vec<SecurityGroupRecord>>;

    async fn create_security_group(
        &mut self,
        name: &str,
        description: &str,
    ) -> Result<SecurityGroupRecord>;

    async fn delete_security_group(&mut self, group: &SecurityGroupRecord) -> Result<()>;
}

#[async_trait]
pub trait SecurityGroupRuleConsul: Send + Sync {
    async fn create_rule(
        &mut self,
        group: &SecurityGroupRecord,
        rule: &SecurityRule,
    ) -> Result<SecurityRule>;

    async fn delete_rule(&mut self, group: &SecurityGroupRecord, rule: &SecurityRule) -> Result<()>;
}
