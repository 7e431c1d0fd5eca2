//! RightScale security groups and their rules

use crate::scope::CloudScope;
use async_trait::async_trait;
use serde_json::{Value, json};
use stackflow_cloud::{
    HandlerContext, RemoteItem, Result, SecurityGroupConsul, SecurityGroupRecord,
    SecurityGroupRuleConsul, SecurityRule,
};

fn port(details: Option<&Value>, key: &str) -> u16 {
    details
        .and_then(|d| d.get(key))
        .and_then(|v| match v {
            Value::String(s) => s.parse().ok(),
            other => other.as_u64().and_then(|n| u16::try_from(n).ok()),
        })
        .unwrap_or(0)
}

fn rule_from_item(item: &RemoteItem) -> SecurityRule {
    let details = item.field("protocol_details");
    SecurityRule {
        id: Some(item.href.clone()),
        protocol: item.str_field("protocol").unwrap_or("tcp").to_string(),
        from_port: port(details, "start_port"),
        to_port: port(details, "end_port"),
        source: item.str_field("cidr_ips").unwrap_or_default().to_string(),
    }
}

fn rules_path(group: &SecurityGroupRecord) -> String {
    format!("{}/security_group_rules", group.id)
}

async fn list_rules(scope: &CloudScope, group: &SecurityGroupRecord) -> Result<Vec<SecurityRule>> {
    let items = scope.session.index(&rules_path(group), &[]).await?;
    Ok(items.iter().map(rule_from_item).collect())
}

/// Security groups in the configured cloud
pub struct RightScaleSecurityGroups {
    scope: CloudScope,
}

impl RightScaleSecurityGroups {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            scope: CloudScope::new(&context),
        }
    }
}

#[async_trait]
impl SecurityGroupConsul for RightScaleSecurityGroups {
    async fn find_security_groups(&mut self) -> Result<Vec<SecurityGroupRecord>> {
        let path = self.scope.cloud_path("security_groups").await?;
        let items = self.scope.session.index(&path, &[]).await?;

        let mut groups = Vec::with_capacity(items.len());
        for item in items {
            let mut group = SecurityGroupRecord {
                id: item.href.clone(),
                name: item.str_field("name").unwrap_or_default().to_string(),
                description: item.str_field("description").unwrap_or_default().to_string(),
                rules: Vec::new(),
            };
            group.rules = list_rules(&self.scope, &group).await?;
            groups.push(group);
        }
        Ok(groups)
    }

    async fn create_security_group(
        &mut self,
        name: &str,
        description: &str,
    ) -> Result<SecurityGroupRecord> {
        tracing::info!("Creating security group {}...", name);
        let path = self.scope.cloud_path("security_groups").await?;
        let payload = json!({
            "security_group": { "name": name, "description": description }
        });
        let created = self.scope.session.create(&path, &payload).await?;
        Ok(SecurityGroupRecord {
            id: created.location()?.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            rules: Vec::new(),
        })
    }

    async fn delete_security_group(&mut self, group: &SecurityGroupRecord) -> Result<()> {
        tracing::info!("Deleting security group {}...", group.name);
        self.scope.session.delete(&group.id).await
    }
}

/// Ingress rules on RightScale security groups
pub struct RightScaleSecurityGroupRules {
    scope: CloudScope,
}

impl RightScaleSecurityGroupRules {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            scope: CloudScope::new(&context),
        }
    }
}

#[async_trait]
impl SecurityGroupRuleConsul for RightScaleSecurityGroupRules {
    async fn create_rule(
        &mut self,
        group: &SecurityGroupRecord,
        rule: &SecurityRule,
    ) -> Result<SecurityRule> {
        if let Some(existing) = list_rules(&self.scope, group)
            .await?
            .into_iter()
            .find(|r| r.same_traffic(rule))
        {
            tracing::debug!("Rule {:?} already present on {}", existing.id, group.name);
            return Ok(existing);
        }

        let payload = json!({
            "security_group_rule": {
                "protocol": rule.protocol.to_lowercase(),
                "source_type": "cidr_ips",
                "cidr_ips": rule.source,
                "protocol_details": {
                    "start_port": rule.from_port.to_string(),
                    "end_port": rule.to_port.to_string(),
                }
            }
        });
        let created = self.scope.session.create(&rules_path(group), &payload).await?;
        Ok(SecurityRule {
            id: Some(created.location()?.to_string()),
            ..rule.clone()
        })
    }

    async fn delete_rule(&mut self, group: &SecurityGroupRecord, rule: &SecurityRule) -> Result<()> {
        let id = match &rule.id {
            Some(id) => id.clone(),
            None => match list_rules(&self.scope, group)
                .await?
                .into_iter()
                .find(|r| r.same_traffic(rule))
                .and_then(|r| r.id)
            {
                Some(id) => id,
                None => return Ok(()),
            },
        };
        self.scope.session.delete(&id).await
    }
}
