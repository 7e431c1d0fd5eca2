//! HP Cloud load balancers (LBaaS)

use async_trait::async_trait;
use serde_json::{Value, json};
use stackflow_cloud::{
    CloudError, ControlPlaneClient, HandlerContext, LbNode, LoadBalancerConsul,
    LoadBalancerRecord, LoadBalancerRequest, RemoteItem, Result, poll_with_timeout,
};
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(10);

const LOAD_BALANCERS: &str = "hpext:lbaas/loadbalancers";

const DEFAULT_ALGORITHM: &str = "ROUND_ROBIN";

fn node_from_value(value: &Value) -> Option<LbNode> {
    let address = value.get("address")?.as_str()?.to_string();
    let port = match value.get("port")? {
        Value::String(s) => s.parse().ok()?,
        other => u16::try_from(other.as_u64()?).ok()?,
    };
    Some(LbNode { address, port })
}

fn lb_record(item: &RemoteItem) -> LoadBalancerRecord {
    let list = |key: &str| {
        item.field(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };
    LoadBalancerRecord {
        id: item.href.clone(),
        name: item.str_field("name").unwrap_or_default().to_string(),
        virtual_ips: list("virtualIps")
            .iter()
            .filter_map(|vip| vip.get("address").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
        nodes: list("nodes").iter().filter_map(node_from_value).collect(),
    }
}

fn node_payload(nodes: &[LbNode]) -> Value {
    json!(
        nodes
            .iter()
            .map(|n| json!({ "address": n.address, "port": n.port.to_string() }))
            .collect::<Vec<_>>()
    )
}

pub struct HpLoadBalancers {
    session: Arc<dyn ControlPlaneClient>,
}

impl HpLoadBalancers {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            session: context.session,
        }
    }

    async fn wait_active(&self, href: &str, timeout: Duration) -> Result<RemoteItem> {
        let session = self.session.clone();
        poll_with_timeout(timeout, POLL_INTERVAL, || {
            let session = session.clone();
            let href = href.to_string();
            async move {
                let lb = session.show(&href).await?;
                match lb.str_field("status") {
                    Some("ACTIVE") => Ok(Some(lb)),
                    Some("ERROR") => Err(CloudError::ResourceFailed(format!(
                        "load balancer {} entered ERROR state",
                        href
                    ))),
                    _ => Ok(None),
                }
            }
        })
        .await
        .map_err(|e| match e {
            CloudError::Timeout(_) => {
                CloudError::Timeout("Load balancer not active within allotted time.".to_string())
            }
            other => other,
        })
    }
}

#[async_trait]
impl LoadBalancerConsul for HpLoadBalancers {
    async fn find_lb_by_name(&mut self, name: &str) -> Result<Option<LoadBalancerRecord>> {
        // LBaaS has no name filter; list everything and compare
        let all = self.session.index(LOAD_BALANCERS, &[]).await?;
        Ok(all
            .iter()
            .find(|lb| lb.str_field("name") == Some(name))
            .map(lb_record))
    }

    async fn create_lb(
        &mut self,
        request: &LoadBalancerRequest,
        timeout: Duration,
    ) -> Result<LoadBalancerRecord> {
        tracing::info!("Creating load balancer {}...", request.name);
        let payload = json!({
            "name": request.name,
            "protocol": request.protocol.to_uppercase(),
            "port": request.port.to_string(),
            "algorithm": request.algorithm.as_deref().unwrap_or(DEFAULT_ALGORITHM),
            "nodes": node_payload(&request.nodes),
        });
        let created = self.session.create(LOAD_BALANCERS, &payload).await?;
        let lb = self.wait_active(created.location()?, timeout).await?;
        Ok(lb_record(&lb))
    }

    async fn add_lb_nodes(&mut self, lb: &LoadBalancerRecord, nodes: &[LbNode]) -> Result<()> {
        let missing: Vec<LbNode> = nodes
            .iter()
            .filter(|n| !lb.nodes.contains(n))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        tracing::info!("Adding {} node(s) to load balancer {}...", missing.len(), lb.name);
        self.session
            .create(
                &format!("{}/nodes", lb.id),
                &json!({ "nodes": node_payload(&missing) }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_cloud::DEFAULT_TIMEOUT;
    use stackflow_cloud::testing::InMemoryControlPlane;
    use stackflow_cloud::{Created, Credentials};

    fn lbs(cp: Arc<InMemoryControlPlane>) -> HpLoadBalancers {
        HpLoadBalancers::new(HandlerContext {
            session: cp,
            credentials: Arc::new(Credentials::default()),
        })
    }

    fn node(address: &str) -> LbNode {
        LbNode {
            address: address.to_string(),
            port: 8080,
        }
    }

    #[tokio::test]
    async fn test_find_lb_by_exact_name() {
        let cp = InMemoryControlPlane::new();
        cp.insert(
            LOAD_BALANCERS,
            RemoteItem::new("hpext:lbaas/loadbalancers/1").with_field("name", "web-lb-canary"),
        );
        cp.insert(
            LOAD_BALANCERS,
            RemoteItem::new("hpext:lbaas/loadbalancers/2")
                .with_field("name", "web-lb")
                .with_field("virtualIps", json!([{"address": "15.185.0.1"}]))
                .with_field("nodes", json!([{"address": "10.0.0.1", "port": "8080"}])),
        );
        let mut handler = lbs(cp);

        let lb = handler.find_lb_by_name("web-lb").await.unwrap().unwrap();
        assert_eq!(lb.id, "hpext:lbaas/loadbalancers/2");
        assert_eq!(lb.virtual_ips, vec!["15.185.0.1"]);
        assert_eq!(lb.nodes, vec![node("10.0.0.1")]);
        assert!(handler.find_lb_by_name("api-lb").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_lb_waits_for_active() {
        let cp = InMemoryControlPlane::new();
        cp.respond_to_create(
            LOAD_BALANCERS,
            Ok(Created {
                location: Some("hpext:lbaas/loadbalancers/9".to_string()),
                body: Value::Null,
            }),
        );
        let lb = |status: &str| {
            RemoteItem::new("hpext:lbaas/loadbalancers/9")
                .with_field("name", "web-lb")
                .with_field("status", status)
        };
        cp.script_show("hpext:lbaas/loadbalancers/9", vec![lb("BUILD"), lb("BUILD"), lb("ACTIVE")]);
        let mut handler = lbs(cp.clone());

        let request = LoadBalancerRequest {
            name: "web-lb".to_string(),
            protocol: "http".to_string(),
            port: 80,
            algorithm: None,
            nodes: vec![node("10.0.0.1")],
        };
        let record = handler.create_lb(&request, DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(record.name, "web-lb");
        assert_eq!(cp.count_calls("show hpext:lbaas/loadbalancers/9"), 3);

        let (_, payload) = cp.created().pop().unwrap();
        assert_eq!(payload["protocol"], "HTTP");
        assert_eq!(payload["algorithm"], DEFAULT_ALGORITHM);
        assert_eq!(payload["nodes"][0]["port"], "8080");
    }

    #[tokio::test]
    async fn test_add_lb_nodes_only_adds_missing() {
        let cp = InMemoryControlPlane::new();
        let mut handler = lbs(cp.clone());
        let lb = LoadBalancerRecord {
            id: "hpext:lbaas/loadbalancers/2".to_string(),
            name: "web-lb".to_string(),
            virtual_ips: Vec::new(),
            nodes: vec![node("10.0.0.1")],
        };

        handler.add_lb_nodes(&lb, &[node("10.0.0.1")]).await.unwrap();
        assert!(cp.created().is_empty());

        handler
            .add_lb_nodes(&lb, &[node("10.0.0.1"), node("10.0.0.2")])
            .await
            .unwrap();
        let (collection, payload) = cp.created().pop().unwrap();
        assert_eq!(collection, "hpext:lbaas/loadbalancers/2/nodes");
        assert_eq!(payload["nodes"].as_array().unwrap().len(), 1);
        assert_eq!(payload["nodes"][0]["address"], "10.0.0.2");
    }
}
