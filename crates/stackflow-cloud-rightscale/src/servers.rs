//! RightScale server handler

use crate::scope::CloudScope;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use stackflow_cloud::{
    CloudError, Constraint, Filter, HandlerContext, RemoteItem, Result, ServerConsul,
    ServerDefinition, ServerHandle, ServerRecord, find_exact, poll_with_timeout, require_exact,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::OnceCell;

/// RightScale is slower than talking to EC2 directly
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

const POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Pause between launch and the first poll; freshly launched instances are
/// not always visible yet
const SETTLE_DELAY: Duration = Duration::from_secs(2);

const OPERATIONAL: &str = "operational";

/// Instance states that mean "not running, not coming back"
const NOT_RUNNING_STATES: [&str; 5] = [
    "decommissioning",
    "terminating",
    "terminated",
    "stopping",
    "inactive",
];

pub(crate) fn server_record(item: &RemoteItem) -> ServerRecord {
    ServerRecord {
        id: item.href.clone(),
        public_ips: item.string_list("public_ip_addresses"),
        private_ips: item.string_list("private_ip_addresses"),
    }
}

/// Servers within one RightScale deployment
pub struct RightScaleServers {
    scope: CloudScope,
    deployment: OnceCell<RemoteItem>,
}

impl RightScaleServers {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            scope: CloudScope::new(&context),
            deployment: OnceCell::new(),
        }
    }

    /// The deployment for `stack`. The first stack asked for binds the
    /// handler; asking for a different one afterwards is an error.
    async fn deployment(&self, stack: &str) -> Result<&RemoteItem> {
        let deployment = self
            .deployment
            .get_or_try_init(|| async {
                require_exact(
                    &self.scope.collection("/api/deployments"),
                    &[Constraint::new("name", stack)],
                )
                .await
            })
            .await?;

        if deployment.str_field("name") != Some(stack) {
            return Err(CloudError::InvalidConfig(format!(
                "handler is bound to deployment {:?}, not {:?}",
                deployment.str_field("name").unwrap_or_default(),
                stack
            )));
        }
        Ok(deployment)
    }

    async fn instance_href(&self, server_id: &str) -> Result<String> {
        let res_id = server_id.rsplit('/').next().unwrap_or(server_id);
        self.scope.cloud_path(&format!("instances/{}", res_id)).await
    }

    async fn wait_operational(
        &self,
        instance_href: &str,
        timeout: Duration,
        timeout_message: &str,
    ) -> Result<ServerRecord> {
        let session = self.scope.session.clone();
        let running = poll_with_timeout(timeout, POLL_INTERVAL, || {
            let session = session.clone();
            let href = instance_href.to_string();
            async move {
                let instance = session.show(&href).await?;
                tracing::debug!(
                    "Instance {} is {}",
                    href,
                    instance.str_field("state").unwrap_or("unknown")
                );
                Ok((instance.str_field("state") == Some(OPERATIONAL)).then_some(instance))
            }
        })
        .await
        .map_err(|e| match e {
            CloudError::Timeout(_) => CloudError::Timeout(timeout_message.to_string()),
            other => other,
        })?;
        Ok(server_record(&running))
    }
}

fn log_remote_failure(context: &str, err: &CloudError) {
    if let CloudError::RemoteApi { status, body } = err {
        tracing::error!("{}. RightScale returned {}:\n{}", context, status, body);
    }
}

#[async_trait]
impl ServerConsul for RightScaleServers {
    async fn create_stack(&mut self, name: &str) -> Result<()> {
        let existing = find_exact(
            &self.scope.collection("/api/deployments"),
            &[Constraint::new("name", name)],
        )
        .await?;
        if existing.is_some() {
            return Ok(());
        }

        tracing::info!("Creating deployment {}...", name);
        let payload = json!({ "deployment": { "name": name } });
        match self.scope.session.create("/api/deployments", &payload).await {
            Ok(_) => Ok(()),
            Err(err @ CloudError::RemoteApi { .. }) => {
                // The deployment lookup in find_servers/define_server reports
                // the real problem if this one matters.
                log_remote_failure(&format!("Failed to create stack {}", name), &err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn find_servers(
        &mut self,
        stack: &str,
        role: &str,
        running: bool,
    ) -> Result<Vec<ServerRecord>> {
        let deployment_href = self.deployment(stack).await?.href.clone();

        let mut filters = vec![Filter::eq("name", role)];
        if running {
            filters.extend(NOT_RUNNING_STATES.iter().map(|s| Filter::ne("state", *s)));
        }
        filters.push(Filter::eq("deployment_href", deployment_href));

        let path = self.scope.cloud_path("instances").await?;
        let instances = self.scope.session.index(&path, &filters).await?;
        Ok(instances
            .iter()
            .filter(|i| i.str_field("name") == Some(role))
            .map(server_record)
            .collect())
    }

    async fn find_server_defs(&mut self, stack: &str, basename: &str) -> Result<Vec<ServerHandle>> {
        let servers_href = format!("{}/servers", self.deployment(stack).await?.href);
        let fuzzy = self
            .scope
            .session
            .index(&servers_href, &[Filter::eq("name", basename)])
            .await?;

        // Definitions whose instance is still terminating have no
        // current_instance either, so this can over-report.
        Ok(fuzzy
            .into_iter()
            .filter(|def| def.str_field("name") == Some(basename))
            .filter(|def| !def.has_link("current_instance"))
            .map(|def| ServerHandle::new(def.href, Value::Null))
            .collect())
    }

    async fn define_server(&mut self, definition: &ServerDefinition) -> Result<ServerHandle> {
        tracing::info!("Defining server {}...", definition.basename);

        let deployment_href = self.deployment(&definition.stack).await?.href.clone();
        let cloud_href = self.scope.cloud().await?.href.clone();
        let cloud_collection = |name: &str| format!("{}/{}", cloud_href, name);

        let revision = definition.template_revision.as_deref().unwrap_or("0");
        let template = require_exact(
            &self.scope.collection("/api/server_templates"),
            &[
                Constraint::new("name", definition.template.as_str()),
                Constraint::new("revision", revision),
            ],
        )
        .await?;
        let instance_type = require_exact(
            &self.scope.collection(cloud_collection("instance_types")),
            &[Constraint::new("name", definition.instance_type.as_str())],
        )
        .await?;
        let ssh_key = require_exact(
            &self.scope.collection(cloud_collection("ssh_keys")),
            &[Constraint::new("resource_uid", definition.ssh_key_name.as_str())],
        )
        .await?;

        let mut security_group_hrefs = Vec::with_capacity(definition.security_groups.len());
        for name in &definition.security_groups {
            let group = require_exact(
                &self.scope.collection(cloud_collection("security_groups")),
                &[Constraint::new("name", name.as_str())],
            )
            .await?;
            security_group_hrefs.push(group.href);
        }

        let mut instance = Map::new();
        instance.insert("cloud_href".into(), json!(cloud_href));
        instance.insert("instance_type_href".into(), json!(instance_type.href));
        instance.insert("security_group_hrefs".into(), json!(security_group_hrefs));
        instance.insert("server_template_href".into(), json!(template.href));
        instance.insert("ssh_key_href".into(), json!(ssh_key.href));
        if let Some(zone) = &definition.availability_zone {
            let datacenter = require_exact(
                &self.scope.collection(cloud_collection("datacenters")),
                &[Constraint::new("name", zone.as_str())],
            )
            .await?;
            instance.insert("datacenter_href".into(), json!(datacenter.href));
        }

        let payload = json!({
            "server": {
                "name": definition.basename,
                "deployment_href": deployment_href,
                "instance": instance,
            }
        });

        let created = self
            .scope
            .session
            .create("/api/servers", &payload)
            .await
            .inspect_err(|e| log_remote_failure("Definition failed", e))?;
        Ok(ServerHandle::new(created.location()?, payload))
    }

    async fn create_server(
        &mut self,
        handle: &ServerHandle,
        inputs: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<ServerRecord> {
        tracing::info!(
            "Launching server {}... this could take a while...",
            handle.reference()
        );

        let inputs: Map<String, Value> = inputs
            .iter()
            .map(|(k, v)| (k.clone(), json!(format!("text:{}", v))))
            .collect();
        let launch = format!("{}/launch", handle.reference());
        let created = self
            .scope
            .session
            .create(&launch, &json!({ "inputs": inputs }))
            .await
            .inspect_err(|e| {
                log_remote_failure(&format!("Creation of {} failed", handle.reference()), e)
            })?;

        let instance_href = self.instance_href(created.location()?).await?;
        tokio::time::sleep(SETTLE_DELAY).await;

        self.wait_operational(
            &instance_href,
            timeout.saturating_sub(SETTLE_DELAY),
            "Could not launch server within allotted time.",
        )
        .await
    }

    async fn find_running(
        &mut self,
        server: &ServerRecord,
        timeout: Duration,
    ) -> Result<ServerRecord> {
        let instance_href = self.instance_href(&server.id).await?;
        self.wait_operational(
            &instance_href,
            timeout,
            "Server not operational within allotted time.",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_cloud::testing::InMemoryControlPlane;
    use stackflow_cloud::{Created, Credentials};
    use std::sync::Arc;
    use tokio::time::Instant;

    const CLOUD: &str = "/api/clouds/1";

    fn seeded() -> Arc<InMemoryControlPlane> {
        let cp = InMemoryControlPlane::new();
        cp.insert("/api/clouds", RemoteItem::new("/api/clouds/9").with_field("name", "EC2 us-east-1b"));
        cp.insert("/api/clouds", RemoteItem::new(CLOUD).with_field("name", "EC2 us-east-1"));
        cp.insert(
            "/api/deployments",
            RemoteItem::new("/api/deployments/42").with_field("name", "web-tier"),
        );
        cp.insert(
            "/api/server_templates",
            RemoteItem::new("/api/server_templates/5")
                .with_field("name", "Base ServerTemplate")
                .with_field("revision", 3),
        );
        cp.insert(
            "/api/server_templates",
            RemoteItem::new("/api/server_templates/6")
                .with_field("name", "Base ServerTemplate")
                .with_field("revision", 0),
        );
        cp.insert(
            &format!("{}/instance_types", CLOUD),
            RemoteItem::new(format!("{}/instance_types/xl", CLOUD)).with_field("name", "m3.xlarge"),
        );
        cp.insert(
            &format!("{}/ssh_keys", CLOUD),
            RemoteItem::new(format!("{}/ssh_keys/k1", CLOUD)).with_field("resource_uid", "deploy"),
        );
        cp.insert(
            &format!("{}/security_groups", CLOUD),
            RemoteItem::new(format!("{}/security_groups/sg1", CLOUD)).with_field("name", "web"),
        );
        cp.insert(
            &format!("{}/datacenters", CLOUD),
            RemoteItem::new(format!("{}/datacenters/a", CLOUD)).with_field("name", "us-east-1a"),
        );
        cp
    }

    fn handler(cp: Arc<InMemoryControlPlane>) -> RightScaleServers {
        RightScaleServers::new(HandlerContext {
            session: cp,
            credentials: Arc::new(Credentials {
                region_name: Some("EC2 us-east-1".to_string()),
                ..Default::default()
            }),
        })
    }

    fn definition() -> ServerDefinition {
        ServerDefinition {
            stack: "web-tier".to_string(),
            basename: "web-tier-web-1".to_string(),
            template: "Base ServerTemplate".to_string(),
            template_revision: None,
            instance_type: "m3.xlarge".to_string(),
            ssh_key_name: "deploy".to_string(),
            availability_zone: Some("us-east-1a".to_string()),
            security_groups: vec!["web".to_string()],
            tags: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_define_server_resolves_exact_references() {
        let cp = seeded();
        let mut servers = handler(cp.clone());

        let handle = servers.define_server(&definition()).await.unwrap();
        assert_eq!(handle.reference(), "/api/servers/1");

        let (collection, payload) = cp.created().pop().unwrap();
        assert_eq!(collection, "/api/servers");
        let instance = &payload["server"]["instance"];
        assert_eq!(instance["cloud_href"], CLOUD);
        assert_eq!(instance["server_template_href"], "/api/server_templates/6");
        assert_eq!(instance["ssh_key_href"], format!("{}/ssh_keys/k1", CLOUD));
        assert_eq!(instance["datacenter_href"], format!("{}/datacenters/a", CLOUD));
        assert_eq!(
            instance["security_group_hrefs"],
            json!([format!("{}/security_groups/sg1", CLOUD)])
        );
        assert_eq!(payload["server"]["deployment_href"], "/api/deployments/42");
    }

    #[tokio::test]
    async fn test_define_server_unresolved_key_is_reference_error() {
        let cp = seeded();
        let mut servers = handler(cp.clone());
        let def = ServerDefinition {
            ssh_key_name: "deplo".to_string(),
            ..definition()
        };

        let err = servers.define_server(&def).await.unwrap_err();
        assert!(err.is_remote_api());
        assert!(matches!(err, CloudError::ReferenceNotFound { .. }));
        assert!(cp.created().is_empty());
    }

    #[tokio::test]
    async fn test_define_server_rejected_submission_propagates() {
        let cp = seeded();
        cp.respond_to_create(
            "/api/servers",
            Err(CloudError::RemoteApi {
                status: 422,
                body: "name taken".to_string(),
            }),
        );
        let mut servers = handler(cp);

        let err = servers.define_server(&definition()).await.unwrap_err();
        assert!(matches!(err, CloudError::RemoteApi { status: 422, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_server_polls_until_operational() {
        let cp = seeded();
        cp.respond_to_create(
            "/api/servers/7/launch",
            Ok(Created {
                location: Some(format!("{}/instances/ABC", CLOUD)),
                body: Value::Null,
            }),
        );
        let instance = |state: &str| {
            RemoteItem::new(format!("{}/instances/ABC", CLOUD))
                .with_field("state", state)
                .with_field("public_ip_addresses", json!(["203.0.113.10"]))
                .with_field("private_ip_addresses", json!(["10.0.0.10"]))
        };
        cp.script_show(
            &format!("{}/instances/ABC", CLOUD),
            vec![instance("pending"), instance("booting"), instance("operational")],
        );
        let mut servers = handler(cp.clone());

        let inputs = BTreeMap::from([("APP_ENV".to_string(), "prod".to_string())]);
        let record = servers
            .create_server(
                &ServerHandle::new("/api/servers/7", Value::Null),
                &inputs,
                DEFAULT_TIMEOUT,
            )
            .await
            .unwrap();

        assert_eq!(record.public_ips, vec!["203.0.113.10"]);
        assert_eq!(record.private_ips, vec!["10.0.0.10"]);
        assert_eq!(cp.count_calls(&format!("show {}/instances/ABC", CLOUD)), 3);
        let (_, launch_payload) = cp.created().pop().unwrap();
        assert_eq!(launch_payload["inputs"]["APP_ENV"], "text:prod");
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_server_times_out() {
        let cp = seeded();
        cp.respond_to_create(
            "/api/servers/7/launch",
            Ok(Created {
                location: Some(format!("{}/instances/ABC", CLOUD)),
                body: Value::Null,
            }),
        );
        cp.script_show(
            &format!("{}/instances/ABC", CLOUD),
            vec![RemoteItem::new("x").with_field("state", "booting")],
        );
        let mut servers = handler(cp);

        let timeout = Duration::from_secs(30);
        let start = Instant::now();
        let err = servers
            .create_server(
                &ServerHandle::new("/api/servers/7", Value::Null),
                &BTreeMap::new(),
                timeout,
            )
            .await
            .unwrap_err();

        let elapsed = start.elapsed();
        assert!(matches!(err, CloudError::Timeout(ref m) if m.contains("Could not launch")));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + POLL_INTERVAL);
    }

    #[tokio::test]
    async fn test_find_servers_filters_running_and_exact_role() {
        let cp = seeded();
        let instances = format!("{}/instances", CLOUD);
        cp.insert(
            &instances,
            RemoteItem::new(format!("{}/i1", instances))
                .with_field("name", "web")
                .with_field("state", "operational")
                .with_field("deployment_href", "/api/deployments/42"),
        );
        cp.insert(
            &instances,
            RemoteItem::new(format!("{}/i2", instances))
                .with_field("name", "web-canary")
                .with_field("state", "operational")
                .with_field("deployment_href", "/api/deployments/42"),
        );
        cp.insert(
            &instances,
            RemoteItem::new(format!("{}/i3", instances))
                .with_field("name", "web")
                .with_field("state", "terminated")
                .with_field("deployment_href", "/api/deployments/42"),
        );
        let mut servers = handler(cp.clone());

        let found = servers.find_servers("web-tier", "web", true).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, format!("{}/i1", instances));

        let all = servers.find_servers("web-tier", "web", false).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_handler_stays_bound_to_first_deployment() {
        let cp = seeded();
        cp.insert(
            "/api/deployments",
            RemoteItem::new("/api/deployments/43").with_field("name", "db-tier"),
        );
        let mut servers = handler(cp);

        servers.find_servers("web-tier", "web", true).await.unwrap();
        let err = servers.find_servers("db-tier", "db", true).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_find_server_defs_skips_defs_with_instances() {
        let cp = seeded();
        cp.insert(
            "/api/deployments/42/servers",
            RemoteItem::new("/api/servers/1").with_field("name", "web-1"),
        );
        cp.insert(
            "/api/deployments/42/servers",
            RemoteItem::new("/api/servers/2")
                .with_field("name", "web-1")
                .with_link("current_instance", "/api/clouds/1/instances/X"),
        );
        cp.insert(
            "/api/deployments/42/servers",
            RemoteItem::new("/api/servers/3").with_field("name", "web-10"),
        );
        let mut servers = handler(cp);

        let defs = servers.find_server_defs("web-tier", "web-1").await.unwrap();
        let refs: Vec<&str> = defs.iter().map(ServerHandle::reference).collect();
        assert_eq!(refs, vec!["/api/servers/1"]);
    }

    #[tokio::test]
    async fn test_create_stack_skips_existing_and_tolerates_rejection() {
        let cp = seeded();
        let mut servers = handler(cp.clone());
        servers.create_stack("web-tier").await.unwrap();
        assert!(cp.created().is_empty());

        cp.respond_to_create(
            "/api/deployments",
            Err(CloudError::RemoteApi {
                status: 403,
                body: "forbidden".to_string(),
            }),
        );
        servers.create_stack("db-tier").await.unwrap();
        assert_eq!(cp.created().len(), 1);
    }
}
