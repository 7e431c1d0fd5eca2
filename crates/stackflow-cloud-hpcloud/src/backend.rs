//! HP Cloud backend

use crate::client::{COMPUTE, DBAAS, LBAAS, OpenStackClient};
use crate::dbaas::HpDatabases;
use crate::lbaas::HpLoadBalancers;
use crate::nova::{NovaSecurityGroupRules, NovaSecurityGroups, NovaServers};
use async_trait::async_trait;
use stackflow_cloud::{
    Backend, ControlPlaneClient, Credentials, Handler, Registry, ResourceKind, Result,
};
use std::sync::Arc;

pub const BACKEND_NAME: &str = "hpcloud";

/// HP Cloud (OpenStack) backend: Nova compute, DBaaS and LBaaS
pub struct HpCloudBackend {
    registry: Registry,
}

impl HpCloudBackend {
    pub fn new() -> Self {
        let registry = Registry::builder()
            .register(ResourceKind::Server, |ctx| {
                Handler::Servers(Box::new(NovaServers::new(ctx)))
            })
            .register(ResourceKind::Database, |ctx| {
                Handler::Databases(Box::new(HpDatabases::new(ctx)))
            })
            .register(ResourceKind::LoadBalancer, |ctx| {
                Handler::LoadBalancers(Box::new(HpLoadBalancers::new(ctx)))
            })
            .register(ResourceKind::SecurityGroup, |ctx| {
                Handler::SecurityGroups(Box::new(NovaSecurityGroups::new(ctx)))
            })
            .register(ResourceKind::DynamicLbSecurityGroup, |ctx| {
                Handler::SecurityGroups(Box::new(NovaSecurityGroups::new(ctx)))
            })
            .register(ResourceKind::SecurityGroupRule, |ctx| {
                Handler::SecurityGroupRules(Box::new(NovaSecurityGroupRules::new(ctx)))
            })
            .build();
        Self { registry }
    }
}

impl Default for HpCloudBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for HpCloudBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn display_name(&self) -> &str {
        "HP Cloud"
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Arc<dyn ControlPlaneClient>> {
        let client = OpenStackClient::connect(credentials, &[COMPUTE, DBAAS, LBAAS]).await?;
        Ok(Arc::new(client))
    }
}
