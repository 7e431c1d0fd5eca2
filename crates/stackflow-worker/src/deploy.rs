//! Stack deployment
//!
//! [`CloudStackDeployer`] walks a stack document against one backend:
//! security groups, servers, databases, load balancers, then hands the
//! resulting inventory to the configurator. Every job gets its own
//! [`Provider`], so handlers are never shared between jobs.

use crate::configure::{Configurator, Inventory};
use crate::error::WorkerError;
use crate::job::Job;
use crate::log::LogSink;
use crate::stack::{LoadBalancerSpec, SecurityGroupSpec, ServerSpec, StackSpec};
use anyhow::Context;
use async_trait::async_trait;
use stackflow_cloud::{
    Backend, Credentials, LbNode, LoadBalancerRecord, LoadBalancerRequest, Provider, ResourceKind,
    SecurityGroupRecord, ServerRecord,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Runs one job's deployment
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, job: &Job, log: Arc<dyn LogSink>) -> anyhow::Result<()>;
}

pub struct CloudStackDeployer {
    backends: HashMap<String, Arc<dyn Backend>>,
    credentials: BTreeMap<String, Credentials>,
    timeout: Option<Duration>,
    configurator: Arc<dyn Configurator>,
}

impl CloudStackDeployer {
    pub fn new(
        credentials: BTreeMap<String, Credentials>,
        timeout: Option<Duration>,
        configurator: Arc<dyn Configurator>,
    ) -> Self {
        Self {
            backends: HashMap::new(),
            credentials,
            timeout,
            configurator,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(backend.name().to_string(), backend);
        self
    }

    fn backend(&self, stack: &StackSpec) -> Result<&Arc<dyn Backend>, WorkerError> {
        self.backends
            .get(&stack.backend)
            .ok_or_else(|| WorkerError::UnknownBackend(stack.backend.clone()))
    }

    /// Configured wait budget, else the backend's own
    fn timeout_for(&self, backend: &dyn Backend) -> Duration {
        self.timeout.unwrap_or_else(|| backend.default_timeout())
    }

    /// A fresh provider for `stack`, with the stack's region applied
    fn provider(&self, stack: &StackSpec) -> Result<Provider, WorkerError> {
        let backend = self.backend(stack)?;
        let mut credentials = self
            .credentials
            .get(&stack.backend)
            .cloned()
            .ok_or_else(|| WorkerError::MissingCredentials(stack.backend.clone()))?;
        if let Some(region) = &stack.region {
            credentials.region_name = Some(region.clone());
        }
        Ok(Provider::new(backend.clone(), Arc::new(credentials)))
    }

    async fn ensure_security_groups(
        &self,
        provider: &mut Provider,
        specs: &[SecurityGroupSpec],
        log: &dyn LogSink,
    ) -> anyhow::Result<()> {
        for dynamic_lb in [false, true] {
            let wanted: Vec<&SecurityGroupSpec> =
                specs.iter().filter(|s| s.dynamic_lb == dynamic_lb).collect();
            if wanted.is_empty() {
                continue;
            }
            let kind = if dynamic_lb {
                ResourceKind::DynamicLbSecurityGroup
            } else {
                ResourceKind::SecurityGroup
            };

            let mut groups: Vec<(SecurityGroupRecord, &SecurityGroupSpec)> = Vec::new();
            {
                let handler = provider.security_groups(kind).await?;
                let existing = handler.find_security_groups().await?;
                for spec in wanted {
                    let group = match existing.iter().find(|g| g.name == spec.name) {
                        Some(group) => group.clone(),
                        None => {
                            log.info(&format!("Creating security group {}...", spec.name));
                            handler
                                .create_security_group(&spec.name, &spec.description)
                                .await?
                        }
                    };
                    groups.push((group, spec));
                }
            }

            if groups.iter().all(|(_, spec)| spec.rules.is_empty()) {
                continue;
            }
            let rules = provider.security_group_rules().await?;
            for (group, spec) in &groups {
                for rule in &spec.rules {
                    rules.create_rule(group, rule).await.with_context(|| {
                        format!("adding rule to security group {}", group.name)
                    })?;
                }
            }
        }
        Ok(())
    }

    async fn ensure_servers(
        &self,
        provider: &mut Provider,
        stack: &StackSpec,
        spec: &ServerSpec,
        timeout: Duration,
        log: &dyn LogSink,
    ) -> anyhow::Result<Vec<ServerRecord>> {
        let servers = provider.servers().await?;

        let mut ready = Vec::with_capacity(spec.count);
        for server in servers.find_servers(&stack.name, &spec.name, true).await? {
            if ready.len() == spec.count {
                break;
            }
            ready.push(servers.find_running(&server, timeout).await?);
        }

        let missing = spec.count - ready.len();
        if missing == 0 {
            log.info(&format!("{} {} server(s) already running", ready.len(), spec.name));
            return Ok(ready);
        }

        let mut idle_defs = servers.find_server_defs(&stack.name, &spec.name).await?;
        for _ in 0..missing {
            let handle = match idle_defs.pop() {
                Some(handle) => handle,
                None => {
                    log.info(&format!("Defining server {}...", spec.name));
                    servers.define_server(&spec.definition(&stack.name)).await?
                }
            };
            log.info(&format!("Launching server {}...", spec.name));
            ready.push(
                servers
                    .create_server(&handle, &spec.inputs, timeout)
                    .await?,
            );
        }
        Ok(ready)
    }

    async fn ensure_load_balancer(
        &self,
        provider: &mut Provider,
        spec: &LoadBalancerSpec,
        inventory: &Inventory,
        timeout: Duration,
        log: &dyn LogSink,
    ) -> anyhow::Result<LoadBalancerRecord> {
        let port = spec.backend_port.unwrap_or(spec.port);
        let nodes: Vec<LbNode> = spec
            .servers
            .iter()
            .filter_map(|role| inventory.servers.get(role))
            .flatten()
            .filter_map(|s| s.private_ips.first().or(s.public_ips.first()))
            .map(|address| LbNode {
                address: address.clone(),
                port,
            })
            .collect();

        let lbs = provider.load_balancers().await?;
        let record = match lbs.find_lb_by_name(&spec.name).await? {
            Some(existing) => {
                lbs.add_lb_nodes(&existing, &nodes).await?;
                existing
            }
            None => {
                log.info(&format!("Creating load balancer {}...", spec.name));
                let request = LoadBalancerRequest {
                    name: spec.name.clone(),
                    protocol: spec.protocol.clone(),
                    port: spec.port,
                    algorithm: spec.algorithm.clone(),
                    nodes,
                };
                lbs.create_lb(&request, timeout).await?
            }
        };
        log.info(&format!(
            "Load balancer {} at {}",
            record.name,
            record.virtual_ips.join(", ")
        ));
        Ok(record)
    }

    /// Bring the stack's infrastructure up and report what exists
    pub async fn provision(&self, stack: &StackSpec, log: &dyn LogSink) -> anyhow::Result<Inventory> {
        let timeout = self.timeout_for(self.backend(stack)?.as_ref());
        let mut provider = self.provider(stack)?;
        let mut inventory = Inventory::default();

        if !stack.security_groups.is_empty() {
            self.ensure_security_groups(&mut provider, &stack.security_groups, log)
                .await?;
        }

        if !stack.servers.is_empty() {
            provider.servers().await?.create_stack(&stack.name).await?;
            for spec in &stack.servers {
                let servers = self
                    .ensure_servers(&mut provider, stack, spec, timeout, log)
                    .await
                    .with_context(|| format!("provisioning {} servers", spec.name))?;
                inventory.servers.insert(spec.name.clone(), servers);
            }
        }

        for request in &stack.databases {
            let dbs = provider.databases().await?;
            let record = match dbs.find_dbs(&request.instance_name).await?.into_iter().next() {
                Some(existing) => existing,
                None => {
                    log.info(&format!("Creating database {}...", request.instance_name));
                    dbs.create_db(request, timeout)
                        .await
                        .with_context(|| format!("creating database {}", request.instance_name))?
                }
            };
            inventory.databases.push(record);
        }

        for spec in &stack.load_balancers {
            let record = self
                .ensure_load_balancer(&mut provider, spec, &inventory, timeout, log)
                .await?;
            inventory.load_balancers.push(record);
        }

        Ok(inventory)
    }
}

#[async_trait]
impl Deployer for CloudStackDeployer {
    async fn deploy(&self, job: &Job, log: Arc<dyn LogSink>) -> anyhow::Result<()> {
        log.info(&format!("Deploying stack {}...", job.stack.name));
        let inventory = self.provision(&job.stack, log.as_ref()).await?;
        log.info(&format!(
            "Infrastructure ready: {} server(s), {} database(s)",
            inventory.server_count(),
            inventory.databases.len()
        ));
        self.configurator
            .configure(&job.stack, &inventory, log)
            .await
            .context("configuration failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::capture::CapturingSink;
    use serde_json::json;
    use stackflow_cloud::testing::{InMemoryControlPlane, StaticBackend};
    use stackflow_cloud::{CloudError, RemoteItem};
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    /// Remembers the inventory it was handed
    #[derive(Default)]
    struct RecordingConfigurator {
        seen: Mutex<Vec<(String, Inventory)>>,
    }

    #[async_trait]
    impl Configurator for RecordingConfigurator {
        async fn configure(
            &self,
            stack: &StackSpec,
            inventory: &Inventory,
            log: Arc<dyn LogSink>,
        ) -> anyhow::Result<()> {
            log.info(&format!("configuring {}", stack.name));
            self.seen
                .lock()
                .unwrap()
                .push((stack.name.clone(), inventory.clone()));
            Ok(())
        }
    }

    fn stack(name: &str, count: usize) -> StackSpec {
        StackSpec {
            name: name.to_string(),
            backend: "static".to_string(),
            region: None,
            security_groups: Vec::new(),
            servers: vec![ServerSpec {
                name: "web".to_string(),
                count,
                template: "base".to_string(),
                template_revision: None,
                instance_type: "small".to_string(),
                ssh_key_name: "deploy".to_string(),
                availability_zone: None,
                security_groups: Vec::new(),
                tags: BTreeMap::new(),
                inputs: BTreeMap::new(),
            }],
            databases: Vec::new(),
            load_balancers: Vec::new(),
        }
    }

    fn deployer(
        backend: StaticBackend,
        configurator: Arc<RecordingConfigurator>,
    ) -> CloudStackDeployer {
        CloudStackDeployer::new(
            BTreeMap::from([("static".to_string(), Credentials::default())]),
            Some(Duration::from_secs(60)),
            configurator,
        )
        .with_backend(Arc::new(backend))
    }

    #[test]
    fn test_timeout_falls_back_to_backend_default() {
        let backend = StaticBackend::with_servers(InMemoryControlPlane::new());
        let configured = deployer(
            StaticBackend::with_servers(InMemoryControlPlane::new()),
            Arc::new(RecordingConfigurator::default()),
        );
        assert_eq!(configured.timeout_for(&backend), Duration::from_secs(60));

        let unset = CloudStackDeployer::new(
            BTreeMap::new(),
            None,
            Arc::new(RecordingConfigurator::default()),
        );
        assert_eq!(unset.timeout_for(&backend), stackflow_cloud::DEFAULT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_deploy_reuses_running_servers() {
        let cp = InMemoryControlPlane::new();
        cp.insert(
            "/servers",
            RemoteItem::new("/servers/existing")
                .with_field("stack", "web-tier")
                .with_field("name", "web")
                .with_field("private_ips", json!(["10.0.0.1"])),
        );
        let configurator = Arc::new(RecordingConfigurator::default());
        let deployer = deployer(StaticBackend::with_servers(cp.clone()), configurator.clone());

        let sink = Arc::new(CapturingSink::default());
        let job = Job::new("web-tier", "r1", stack("web-tier", 2));
        deployer.deploy(&job, sink.clone()).await.unwrap();

        let seen = configurator.seen.lock().unwrap();
        let web = &seen[0].1.servers["web"];
        assert_eq!(web.len(), 2);
        assert_eq!(web[0].id, "/servers/existing");
        assert_eq!(cp.count_calls("create /servers"), 1);
        assert!(sink.contains("configuring web-tier"));
    }

    #[tokio::test]
    async fn test_unknown_backend_fails() {
        let cp = InMemoryControlPlane::new();
        let deployer = deployer(
            StaticBackend::with_servers(cp),
            Arc::new(RecordingConfigurator::default()),
        );
        let mut spec = stack("web-tier", 1);
        spec.backend = "aws".to_string();

        let err = deployer
            .deploy(&Job::new("web-tier", "r1", spec), Arc::new(CapturingSink::default()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkerError>(),
            Some(WorkerError::UnknownBackend(b)) if b == "aws"
        ));
    }

    #[tokio::test]
    async fn test_unsupported_kind_surfaces_as_error() {
        let cp = InMemoryControlPlane::new();
        let deployer = deployer(
            StaticBackend::with_servers(cp),
            Arc::new(RecordingConfigurator::default()),
        );
        let mut spec = stack("web-tier", 0);
        spec.load_balancers.push(LoadBalancerSpec {
            name: "web-lb".to_string(),
            protocol: "http".to_string(),
            port: 80,
            backend_port: None,
            algorithm: None,
            servers: vec!["web".to_string()],
        });

        let err = deployer
            .deploy(&Job::new("web-tier", "r1", spec), Arc::new(CapturingSink::default()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CloudError>(),
            Some(CloudError::UnsupportedResource {
                kind: ResourceKind::LoadBalancer,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_jobs_build_their_own_handlers() {
        let cp = InMemoryControlPlane::new();
        let backend = StaticBackend::with_servers(cp.clone());
        let builds = backend.builds();
        let configurator = Arc::new(RecordingConfigurator::default());
        let deployer = Arc::new(deployer(backend, configurator.clone()));

        let jobs = ["web-tier", "api-tier"].map(|name| {
            let deployer = deployer.clone();
            tokio::spawn(async move {
                let job = Job::new(name, format!("r-{}", name), stack(name, 1));
                deployer.deploy(&job, Arc::new(CapturingSink::default())).await
            })
        });
        for job in jobs {
            job.await.unwrap().unwrap();
        }

        assert_eq!(builds.load(Ordering::SeqCst), 2);
        let seen = configurator.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        for (stack_name, inventory) in seen.iter() {
            let web = &inventory.servers["web"];
            assert_eq!(web.len(), 1, "{} saw another job's servers", stack_name);
        }
    }
}
