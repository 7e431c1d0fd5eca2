//! Nova compute: servers, security groups and rules

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use stackflow_cloud::{
    CloudError, Collection, Constraint, ControlPlaneClient, Filter, HandlerContext, RemoteItem,
    Result, SecurityGroupConsul, SecurityGroupRecord, SecurityGroupRuleConsul, SecurityRule,
    ServerConsul, ServerDefinition, ServerHandle, ServerRecord, poll_with_timeout, require_exact,
};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(10);

const SERVERS: &str = "compute/servers";
const SECURITY_GROUPS: &str = "compute/os-security-groups";
const SECURITY_GROUP_RULES: &str = "compute/os-security-group-rules";

/// Metadata key tying a server to its stack
const STACK_TAG: &str = "stack";

const NOT_RUNNING_STATES: [&str; 5] = ["DELETED", "SOFT_DELETED", "SHUTOFF", "STOPPED", "ERROR"];

fn is_public(addr: &str) -> bool {
    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => !(ip.is_private() || ip.is_loopback() || ip.is_link_local()),
        Ok(IpAddr::V6(ip)) => !ip.is_loopback(),
        Err(_) => false,
    }
}

/// Split Nova's `addresses` map into public and private addresses.
///
/// `OS-EXT-IPS:type` decides when present; otherwise the address range does.
pub(crate) fn server_record(item: &RemoteItem) -> ServerRecord {
    let mut record = ServerRecord {
        id: item.href.clone(),
        ..Default::default()
    };
    let networks = item.field("addresses").and_then(Value::as_object);
    for addr in networks.into_iter().flat_map(|n| n.values()).flat_map(|v| {
        v.as_array().map(|a| a.as_slice()).unwrap_or_default()
    }) {
        let Some(ip) = addr.get("addr").and_then(Value::as_str) else {
            continue;
        };
        let public = match addr.get("OS-EXT-IPS:type").and_then(Value::as_str) {
            Some(kind) => kind == "floating",
            None => is_public(ip),
        };
        if public {
            record.public_ips.push(ip.to_string());
        } else {
            record.private_ips.push(ip.to_string());
        }
    }
    record
}

fn in_stack(item: &RemoteItem, stack: &str) -> bool {
    item.field("metadata")
        .and_then(|m| m.get(STACK_TAG))
        .and_then(Value::as_str)
        == Some(stack)
}

/// Nova servers
///
/// Nova has no separate definition step: `define_server` resolves every
/// reference and returns the boot request, `create_server` submits it.
pub struct NovaServers {
    session: Arc<dyn ControlPlaneClient>,
}

impl NovaServers {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            session: context.session,
        }
    }

    fn collection(&self, path: &str) -> Collection<'_> {
        Collection::new(self.session.as_ref(), format!("compute/{}", path))
    }

    async fn wait_active(
        &self,
        href: &str,
        timeout: Duration,
        timeout_message: &str,
    ) -> Result<ServerRecord> {
        let session = self.session.clone();
        let active = poll_with_timeout(timeout, POLL_INTERVAL, || {
            let session = session.clone();
            let href = href.to_string();
            async move {
                let server = session.show(&href).await?;
                match server.str_field("status") {
                    Some("ACTIVE") => Ok(Some(server)),
                    Some("ERROR") => Err(CloudError::ResourceFailed(format!(
                        "server {} entered ERROR state",
                        href
                    ))),
                    status => {
                        tracing::debug!("Server {} is {}", href, status.unwrap_or("unknown"));
                        Ok(None)
                    }
                }
            }
        })
        .await
        .map_err(|e| match e {
            CloudError::Timeout(_) => CloudError::Timeout(timeout_message.to_string()),
            other => other,
        })?;
        Ok(server_record(&active))
    }
}

#[async_trait]
impl ServerConsul for NovaServers {
    async fn create_stack(&mut self, name: &str) -> Result<()> {
        // Stacks are server metadata on Nova
        tracing::debug!("Stack {} needs no container on Nova", name);
        Ok(())
    }

    async fn find_servers(
        &mut self,
        stack: &str,
        role: &str,
        running: bool,
    ) -> Result<Vec<ServerRecord>> {
        let mut filters = vec![Filter::eq("name", role)];
        if running {
            filters.extend(NOT_RUNNING_STATES.iter().map(|s| Filter::ne("status", *s)));
        }
        let servers = self
            .session
            .index(&format!("{}/detail", SERVERS), &filters)
            .await?;
        Ok(servers
            .iter()
            .filter(|s| s.str_field("name") == Some(role) && in_stack(s, stack))
            .map(server_record)
            .collect())
    }

    async fn find_server_defs(&mut self, _stack: &str, _basename: &str) -> Result<Vec<ServerHandle>> {
        Ok(Vec::new())
    }

    async fn define_server(&mut self, definition: &ServerDefinition) -> Result<ServerHandle> {
        tracing::info!("Defining server {}...", definition.basename);

        let image = require_exact(
            &self.collection("images"),
            &[Constraint::new("name", definition.template.as_str())],
        )
        .await?;
        let flavor = require_exact(
            &self.collection("flavors"),
            &[Constraint::new("name", definition.instance_type.as_str())],
        )
        .await?;
        let key_pair = require_exact(
            &self.collection("os-keypairs"),
            &[Constraint::new("name", definition.ssh_key_name.as_str())],
        )
        .await?;

        let mut security_groups = Vec::with_capacity(definition.security_groups.len());
        for name in &definition.security_groups {
            let group = require_exact(
                &self.collection("os-security-groups"),
                &[Constraint::new("name", name.as_str())],
            )
            .await?;
            security_groups.push(json!({ "name": group.str_field("name") }));
        }

        let mut metadata: Map<String, Value> = definition
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        metadata.insert(STACK_TAG.to_string(), json!(definition.stack));

        let mut server = Map::new();
        server.insert("name".into(), json!(definition.basename));
        server.insert("imageRef".into(), json!(image.id()));
        server.insert("flavorRef".into(), json!(flavor.id()));
        server.insert("key_name".into(), json!(key_pair.str_field("name")));
        server.insert("security_groups".into(), json!(security_groups));
        server.insert("metadata".into(), Value::Object(metadata));
        if let Some(zone) = &definition.availability_zone {
            server.insert("availability_zone".into(), json!(zone));
        }

        Ok(ServerHandle::new(
            definition.basename.clone(),
            json!({ "server": server }),
        ))
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

        let mut request = handle.detail().clone();
        if let Some(metadata) = request
            .get_mut("server")
            .and_then(|s| s.get_mut("metadata"))
            .and_then(Value::as_object_mut)
        {
            for (key, value) in inputs {
                metadata.insert(key.clone(), json!(value));
            }
        }

        let created = self.session.create(SERVERS, &request).await?;
        self.wait_active(
            created.location()?,
            timeout,
            "Could not launch server within allotted time.",
        )
        .await
    }

    async fn find_running(
        &mut self,
        server: &ServerRecord,
        timeout: Duration,
    ) -> Result<ServerRecord> {
        self.wait_active(
            &server.id,
            timeout,
            "Server not active within allotted time.",
        )
        .await
    }
}

fn rule_from_value(value: &Value) -> SecurityRule {
    let port = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(0)
    };
    SecurityRule {
        id: value
            .get("id")
            .map(|id| format!("{}/{}", SECURITY_GROUP_RULES, stackflow_cloud::client::value_text(id))),
        protocol: value
            .get("ip_protocol")
            .and_then(Value::as_str)
            .unwrap_or("tcp")
            .to_string(),
        from_port: port("from_port"),
        to_port: port("to_port"),
        source: value
            .get("ip_range")
            .and_then(|r| r.get("cidr"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

fn group_record(item: &RemoteItem) -> SecurityGroupRecord {
    SecurityGroupRecord {
        id: item.href.clone(),
        name: item.str_field("name").unwrap_or_default().to_string(),
        description: item.str_field("description").unwrap_or_default().to_string(),
        rules: item
            .field("rules")
            .and_then(Value::as_array)
            .map(|rules| rules.iter().map(rule_from_value).collect())
            .unwrap_or_default(),
    }
}

/// Nova wants the numeric group id as the rule's parent
fn parent_group_id(group: &SecurityGroupRecord) -> Value {
    let id = group.id.rsplit('/').next().unwrap_or(&group.id);
    id.parse::<u64>().map(Value::from).unwrap_or_else(|_| json!(id))
}

/// Nova security groups, also serving dynamic load-balancer groups
pub struct NovaSecurityGroups {
    session: Arc<dyn ControlPlaneClient>,
}

impl NovaSecurityGroups {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            session: context.session,
        }
    }
}

#[async_trait]
impl SecurityGroupConsul for NovaSecurityGroups {
    async fn find_security_groups(&mut self) -> Result<Vec<SecurityGroupRecord>> {
        let groups = self.session.index(SECURITY_GROUPS, &[]).await?;
        Ok(groups.iter().map(group_record).collect())
    }

    async fn create_security_group(
        &mut self,
        name: &str,
        description: &str,
    ) -> Result<SecurityGroupRecord> {
        tracing::info!("Creating security group {}...", name);
        let payload = json!({
            "security_group": { "name": name, "description": description }
        });
        let created = self.session.create(SECURITY_GROUPS, &payload).await?;
        Ok(SecurityGroupRecord {
            id: created.location()?.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            rules: Vec::new(),
        })
    }

    async fn delete_security_group(&mut self, group: &SecurityGroupRecord) -> Result<()> {
        tracing::info!("Deleting security group {}...", group.name);
        self.session.delete(&group.id).await
    }
}

/// Ingress rules on Nova security groups
pub struct NovaSecurityGroupRules {
    session: Arc<dyn ControlPlaneClient>,
}

impl NovaSecurityGroupRules {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            session: context.session,
        }
    }
}

#[async_trait]
impl SecurityGroupRuleConsul for NovaSecurityGroupRules {
    async fn create_rule(
        &mut self,
        group: &SecurityGroupRecord,
        rule: &SecurityRule,
    ) -> Result<SecurityRule> {
        if let Some(existing) = group.rules.iter().find(|r| r.same_traffic(rule)) {
            return Ok(existing.clone());
        }

        let payload = json!({
            "security_group_rule": {
                "parent_group_id": parent_group_id(group),
                "ip_protocol": rule.protocol.to_lowercase(),
                "from_port": rule.from_port,
                "to_port": rule.to_port,
                "cidr": rule.source,
            }
        });
        let created = self.session.create(SECURITY_GROUP_RULES, &payload).await?;
        Ok(SecurityRule {
            id: Some(created.location()?.to_string()),
            ..rule.clone()
        })
    }

    async fn delete_rule(&mut self, group: &SecurityGroupRecord, rule: &SecurityRule) -> Result<()> {
        let id = rule.id.clone().or_else(|| {
            group
                .rules
                .iter()
                .find(|r| r.same_traffic(rule))
                .and_then(|r| r.id.clone())
        });
        match id {
            Some(id) => self.session.delete(&id).await,
            None => Ok(()),
        }
    }
}
