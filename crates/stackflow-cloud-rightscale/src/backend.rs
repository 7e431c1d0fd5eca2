//! RightScale backend

use crate::api::RightScaleApi;
use crate::security_groups::{RightScaleSecurityGroupRules, RightScaleSecurityGroups};
use crate::servers::{DEFAULT_TIMEOUT, RightScaleServers};
use async_trait::async_trait;
use stackflow_cloud::{
    Backend, ControlPlaneClient, Credentials, Handler, Registry, ResourceKind, Result,
};
use std::sync::Arc;
use std::time::Duration;

pub const BACKEND_NAME: &str = "rightscale";

/// Default API host when credentials do not name one
pub const DEFAULT_API_ENDPOINT: &str = "https://us-3.rightscale.com";

/// RightScale backend: servers and security groups
pub struct RightScaleBackend {
    registry: Registry,
}

impl RightScaleBackend {
    pub fn new() -> Self {
        let registry = Registry::builder()
            .register(ResourceKind::Server, |ctx| {
                Handler::Servers(Box::new(RightScaleServers::new(ctx)))
            })
            .register(ResourceKind::SecurityGroup, |ctx| {
                Handler::SecurityGroups(Box::new(RightScaleSecurityGroups::new(ctx)))
            })
            .register(ResourceKind::SecurityGroupRule, |ctx| {
                Handler::SecurityGroupRules(Box::new(RightScaleSecurityGroupRules::new(ctx)))
            })
            .build();
        Self { registry }
    }
}

impl Default for RightScaleBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for RightScaleBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn display_name(&self) -> &str {
        "RightScale"
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn default_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Arc<dyn ControlPlaneClient>> {
        let refresh_token = Credentials::required("refresh_token", &credentials.refresh_token)?;
        let endpoint = credentials
            .api_endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_API_ENDPOINT);

        let api = RightScaleApi::login(endpoint, refresh_token).await?;
        tracing::debug!("Authenticated against {}", api.endpoint());
        Ok(Arc::new(api))
    }
}
