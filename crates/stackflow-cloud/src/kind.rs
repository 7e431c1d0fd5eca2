//! Resource kinds

use serde::{Deserialize, Serialize};

/// Closed set of infrastructure categories a backend can manage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Server,
    Database,
    LoadBalancer,
    SecurityGroup,
    SecurityGroupRule,
    /// Security groups created on the fly to admit load balancer traffic
    DynamicLbSecurityGroup,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Server,
        ResourceKind::Database,
        ResourceKind::LoadBalancer,
        ResourceKind::SecurityGroup,
        ResourceKind::SecurityGroupRule,
        ResourceKind::DynamicLbSecurityGroup,
    ];
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Server => write!(f, "server"),
            ResourceKind::Database => write!(f, "database"),
            ResourceKind::LoadBalancer => write!(f, "load_balancer"),
            ResourceKind::SecurityGroup => write!(f, "security_group"),
            ResourceKind::SecurityGroupRule => write!(f, "security_group_rule"),
            ResourceKind::DynamicLbSecurityGroup => write!(f, "dynamic_lb_security_group"),
        }
    }
}
