//! Configuration-management collaborator
//!
//! Runs once infrastructure is ready. Its contract is to run to completion
//! or return an error; it logs through the sink it is handed.

use crate::log::LogSink;
use crate::stack::StackSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stackflow_cloud::{DatabaseRecord, LoadBalancerRecord, ServerRecord};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a deployment produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// Servers by role
    pub servers: BTreeMap<String, Vec<ServerRecord>>,
    pub databases: Vec<DatabaseRecord>,
    pub load_balancers: Vec<LoadBalancerRecord>,
}

impl Inventory {
    pub fn server_count(&self) -> usize {
        self.servers.values().map(Vec::len).sum()
    }
}

#[async_trait]
pub trait Configurator: Send + Sync {
    async fn configure(
        &self,
        stack: &StackSpec,
        inventory: &Inventory,
        log: Arc<dyn LogSink>,
    ) -> anyhow::Result<()>;
}

/// Reports the inventory and does nothing else
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConfigurator;

#[async_trait]
impl Configurator for NoopConfigurator {
    async fn configure(
        &self,
        stack: &StackSpec,
        inventory: &Inventory,
        log: Arc<dyn LogSink>,
    ) -> anyhow::Result<()> {
        for (role, servers) in &inventory.servers {
            let addresses: Vec<&str> = servers
                .iter()
                .flat_map(|s| s.public_ips.iter().chain(s.private_ips.iter()))
                .map(String::as_str)
                .collect();
            log.info(&format!(
                "{} {}: {}",
                stack.name,
                role,
                addresses.join(", ")
            ));
        }
        Ok(())
    }
}
