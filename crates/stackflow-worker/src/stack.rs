//! Stack documents and the catalog that resolves stack references

use crate::error::{Result, WorkerError};
use serde::{Deserialize, Serialize};
use stackflow_cloud::{DatabaseRequest, SecurityRule, ServerDefinition};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

fn default_count() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: Vec<SecurityRule>,
    /// Group guarding load balancers rather than servers
    #[serde(default)]
    pub dynamic_lb: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Role name; servers of a role share it as their name
    pub name: String,
    #[serde(default = "default_count")]
    pub count: usize,
    pub template: String,
    #[serde(default)]
    pub template_revision: Option<String>,
    pub instance_type: String,
    pub ssh_key_name: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Launch inputs
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

impl ServerSpec {
    pub fn definition(&self, stack: &str) -> ServerDefinition {
        ServerDefinition {
            stack: stack.to_string(),
            basename: self.name.clone(),
            template: self.template.clone(),
            template_revision: self.template_revision.clone(),
            instance_type: self.instance_type.clone(),
            ssh_key_name: self.ssh_key_name.clone(),
            availability_zone: self.availability_zone.clone(),
            security_groups: self.security_groups.clone(),
            tags: self.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerSpec {
    pub name: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub port: u16,
    /// Port the member servers listen on; defaults to `port`
    #[serde(default)]
    pub backend_port: Option<u16>,
    #[serde(default)]
    pub algorithm: Option<String>,
    /// Server roles balanced behind this load balancer
    #[serde(default)]
    pub servers: Vec<String>,
}

fn default_protocol() -> String {
    "http".to_string()
}

/// A deployable stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSpec {
    pub name: String,
    /// Backend key, e.g. `hpcloud` or `rightscale`
    pub backend: String,
    /// Overrides the credentials' `region_name`
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupSpec>,
    #[serde(default)]
    pub servers: Vec<ServerSpec>,
    #[serde(default)]
    pub databases: Vec<DatabaseRequest>,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerSpec>,
}

impl StackSpec {
    pub fn from_yaml(content: &str, origin: &Path) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|source| WorkerError::StackParse {
            path: origin.to_path_buf(),
            source,
        })
    }
}

/// Resolves stack references carried by queue messages
pub trait StackCatalog: Send + Sync {
    /// `Ok(None)` when no stack goes by `reference`
    fn find(&self, reference: &str) -> Result<Option<StackSpec>>;
}

/// Stacks stored as `<dir>/<reference>.yml`
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    dir: PathBuf,
}

impl DirectoryCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, reference: &str) -> Result<PathBuf> {
        let valid = !reference.is_empty()
            && reference
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !reference.starts_with('.');
        if !valid {
            return Err(WorkerError::InvalidReference(reference.to_string()));
        }
        Ok(self.dir.join(format!("{}.yml", reference)))
    }
}

impl StackCatalog for DirectoryCatalog {
    fn find(&self, reference: &str) -> Result<Option<StackSpec>> {
        let path = self.path_for(reference)?;
        if !path.exists() {
            tracing::debug!("No stack at {}", path.display());
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        StackSpec::from_yaml(&content, &path).map(Some)
    }
}

/// Fixed set of stacks
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    stacks: HashMap<String, StackSpec>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack(mut self, reference: impl Into<String>, stack: StackSpec) -> Self {
        self.stacks.insert(reference.into(), stack);
        self
    }
}

impl StackCatalog for StaticCatalog {
    fn find(&self, reference: &str) -> Result<Option<StackSpec>> {
        Ok(self.stacks.get(reference).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const WEB_TIER: &str = r#"
name: web-tier
backend: hpcloud
region: az-1.region-a.geo-1
security_groups:
  - name: web
    description: web servers
    rules:
      - protocol: tcp
        from_port: 80
        to_port: 80
        source: 0.0.0.0/0
servers:
  - name: web
    count: 2
    template: Ubuntu 12.04
    instance_type: standard.small
    ssh_key_name: deploy
    security_groups: [web]
databases:
  - instance_name: orders
    instance_type: medium
    admin:
      username: app_admin
      password: s3cret
load_balancers:
  - name: web-lb
    port: 80
    backend_port: 8080
    servers: [web]
"#;

    #[test]
    fn test_parse_stack_document() {
        let stack = StackSpec::from_yaml(WEB_TIER, Path::new("web-tier.yml")).unwrap();
        assert_eq!(stack.backend, "hpcloud");
        assert_eq!(stack.servers[0].count, 2);
        assert_eq!(stack.databases[0].storage_size_gb, 5);
        assert_eq!(stack.load_balancers[0].protocol, "http");

        let def = stack.servers[0].definition(&stack.name);
        assert_eq!(def.stack, "web-tier");
        assert_eq!(def.basename, "web");
    }

    #[test]
    fn test_directory_catalog() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("web-tier.yml"), WEB_TIER).unwrap();
        let catalog = DirectoryCatalog::new(dir.path());

        assert_eq!(catalog.find("web-tier").unwrap().unwrap().name, "web-tier");
        assert!(catalog.find("db-tier").unwrap().is_none());
        assert!(matches!(
            catalog.find("../etc/passwd"),
            Err(WorkerError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_directory_catalog_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.yml"), "name: [").unwrap();
        let err = DirectoryCatalog::new(dir.path()).find("broken").unwrap_err();
        assert!(err.to_string().contains("broken.yml"));
    }
}
