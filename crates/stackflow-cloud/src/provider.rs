//! Backends, handler registries and providers
//!
//! A [`Backend`] is the static, shareable description of one cloud: its name,
//! how to authenticate, and a [`Registry`] mapping each supported
//! [`ResourceKind`] to a handler constructor. A [`Provider`] is one job's
//! authenticated session against a backend; it builds handlers on demand
//! and caches one per kind.

use crate::client::ControlPlaneClient;
use crate::consul::{
    DatabaseConsul, LoadBalancerConsul, SecurityGroupConsul, SecurityGroupRuleConsul,
    ServerConsul,
};
use crate::credentials::Credentials;
use crate::error::{CloudError, Result};
use crate::kind::ResourceKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Convergence budget for backends that do not state their own
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Everything a handler constructor receives
#[derive(Clone)]
pub struct HandlerContext {
    pub session: Arc<dyn ControlPlaneClient>,
    pub credentials: Arc<Credentials>,
}

/// A constructed handler, tagged by the capability it implements
pub enum Handler {
    Servers(Box<dyn ServerConsul>),
    Databases(Box<dyn DatabaseConsul>),
    LoadBalancers(Box<dyn LoadBalancerConsul>),
    SecurityGroups(Box<dyn SecurityGroupConsul>),
    SecurityGroupRules(Box<dyn SecurityGroupRuleConsul>),
}

impl Handler {
    pub fn label(&self) -> &'static str {
        match self {
            Handler::Servers(_) => "servers",
            Handler::Databases(_) => "databases",
            Handler::LoadBalancers(_) => "load balancers",
            Handler::SecurityGroups(_) => "security groups",
            Handler::SecurityGroupRules(_) => "security group rules",
        }
    }
}

type HandlerFactory = Box<dyn Fn(HandlerContext) -> Handler + Send + Sync>;

/// Resource kind → handler constructor table for one backend
pub struct Registry {
    factories: HashMap<ResourceKind, HandlerFactory>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            factories: HashMap::new(),
        }
    }

    pub fn supports(&self, kind: ResourceKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Registered kinds in declaration order
    pub fn kinds(&self) -> Vec<ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .filter(|k| self.supports(*k))
            .collect()
    }

    fn build(&self, kind: ResourceKind, context: HandlerContext) -> Option<Handler> {
        self.factories.get(&kind).map(|factory| factory(context))
    }
}

/// Populates a [`Registry`] before any handler can be resolved from it
pub struct RegistryBuilder {
    factories: HashMap<ResourceKind, HandlerFactory>,
}

impl RegistryBuilder {
    pub fn register<F>(mut self, kind: ResourceKind, factory: F) -> Self
    where
        F: Fn(HandlerContext) -> Handler + Send + Sync + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            factories: self.factories,
        }
    }
}

/// Cloud backend abstraction
///
/// Implementations are read-only after construction and shared between jobs.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend key used in configuration (e.g., "hpcloud", "rightscale")
    fn name(&self) -> &str;

    /// Returns the backend display name for logs
    fn display_name(&self) -> &str;

    fn registry(&self) -> &Registry;

    /// Upper bound for convergence waits when configuration sets none
    fn default_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    /// Open an authenticated control plane session
    async fn authenticate(&self, credentials: &Credentials) -> Result<Arc<dyn ControlPlaneClient>>;
}

/// One authenticated backend session plus the handlers built on it
pub struct Provider {
    backend: Arc<dyn Backend>,
    credentials: Arc<Credentials>,
    session: OnceCell<Arc<dyn ControlPlaneClient>>,
    handlers: HashMap<ResourceKind, Handler>,
}

impl Provider {
    pub fn new(backend: Arc<dyn Backend>, credentials: Arc<Credentials>) -> Self {
        Self {
            backend,
            credentials,
            session: OnceCell::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// The control plane session, authenticating on first use
    pub async fn session(&self) -> Result<Arc<dyn ControlPlaneClient>> {
        let session = self
            .session
            .get_or_try_init(|| async {
                tracing::info!("Authenticating to {}...", self.backend.display_name());
                self.backend.authenticate(&self.credentials).await
            })
            .await?;
        Ok(session.clone())
    }

    /// Handler for `kind`, constructing and caching it on first request
    pub async fn resolve(&mut self, kind: ResourceKind) -> Result<&mut Handler> {
        if !self.handlers.contains_key(&kind) {
            if !self.backend.registry().supports(kind) {
                return Err(self.unsupported(kind));
            }
            let context = HandlerContext {
                session: self.session().await?,
                credentials: self.credentials.clone(),
            };
            let handler = self
                .backend
                .registry()
                .build(kind, context)
                .ok_or_else(|| self.unsupported(kind))?;
            tracing::debug!("Built {} handler for {} on {}", handler.label(), kind, self.name());
            self.handlers.insert(kind, handler);
        }
        let unsupported = self.unsupported(kind);
        self.handlers.get_mut(&kind).ok_or(unsupported)
    }

    pub async fn servers(&mut self) -> Result<&mut dyn ServerConsul> {
        let kind = ResourceKind::Server;
        let backend = self.name().to_string();
        match self.resolve(kind).await? {
            Handler::Servers(h) => Ok(h.as_mut()),
            other => Err(mismatch(backend, kind, other)),
        }
    }

    pub async fn databases(&mut self) -> Result<&mut dyn DatabaseConsul> {
        let kind = ResourceKind::Database;
        let backend = self.name().to_string();
        match self.resolve(kind).await? {
            Handler::Databases(h) => Ok(h.as_mut()),
            other => Err(mismatch(backend, kind, other)),
        }
    }

    pub async fn load_balancers(&mut self) -> Result<&mut dyn LoadBalancerConsul> {
        let kind = ResourceKind::LoadBalancer;
        let backend = self.name().to_string();
        match self.resolve(kind).await? {
            Handler::LoadBalancers(h) => Ok(h.as_mut()),
            other => Err(mismatch(backend, kind, other)),
        }
    }

    /// Security group handler for `kind`, which must be one of the
    /// security-group kinds
    pub async fn security_groups(
        &mut self,
        kind: ResourceKind,
    ) -> Result<&mut dyn SecurityGroupConsul> {
        let backend = self.name().to_string();
        match self.resolve(kind).await? {
            Handler::SecurityGroups(h) => Ok(h.as_mut()),
            other => Err(mismatch(backend, kind, other)),
        }
    }

    pub async fn security_group_rules(&mut self) -> Result<&mut dyn SecurityGroupRuleConsul> {
        let kind = ResourceKind::SecurityGroupRule;
        let backend = self.name().to_string();
        match self.resolve(kind).await? {
            Handler::SecurityGroupRules(h) => Ok(h.as_mut()),
            other => Err(mismatch(backend, kind, other)),
        }
    }

    fn unsupported(&self, kind: ResourceKind) -> CloudError {
        CloudError::UnsupportedResource {
            backend: self.name().to_string(),
            kind,
        }
    }
}

fn mismatch(backend: String, kind: ResourceKind, found: &Handler) -> CloudError {
    CloudError::HandlerMismatch {
        backend,
        kind,
        found: found.label(),
    }
}
