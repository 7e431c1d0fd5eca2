//! Control plane client capability
//!
//! Vendor payload shapes stay opaque here. A backend's client turns its API
//! into [`RemoteItem`]s addressed by href, and accepts JSON payloads for
//! create and update calls.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Filter comparison understood by backend index endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
}

/// A single server-side filter. Backends are free to interpret `Eq` loosely
/// (substring, prefix); callers needing exactness use the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Ne,
            value: value.into(),
        }
    }

    /// The filter value as plain text (strings unquoted)
    pub fn value_text(&self) -> String {
        value_text(&self.value)
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self.op {
            FilterOp::Eq => "==",
            FilterOp::Ne => "<>",
        };
        write!(f, "{}{}{}", self.field, op, self.value_text())
    }
}

/// Render a scalar JSON value the way it appears in query strings
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// An item returned by a control plane, with its accessible fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Canonical handle of the item (URL path or collection/id)
    pub href: String,

    /// Attribute values as returned by the backend
    pub fields: Map<String, Value>,

    /// Related resources by relation name
    #[serde(default)]
    pub links: BTreeMap<String, String>,
}

impl RemoteItem {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_link(mut self, rel: impl Into<String>, href: impl Into<String>) -> Self {
        self.links.insert(rel.into(), href.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// A list-of-strings field; missing or mistyped entries yield nothing
    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.fields
            .get(key)
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links.get(rel).map(String::as_str)
    }

    pub fn has_link(&self, rel: &str) -> bool {
        self.links.contains_key(rel)
    }

    /// Last path segment of the href
    pub fn id(&self) -> &str {
        self.href.rsplit('/').next().unwrap_or(&self.href)
    }
}

/// Outcome of a create call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Created {
    /// Href of the new resource, when the backend reports one
    pub location: Option<String>,

    /// Response body (`Value::Null` when empty)
    pub body: Value,
}

impl Created {
    pub fn location(&self) -> Result<&str> {
        self.location.as_deref().ok_or_else(|| {
            CloudError::InvalidResponse("create response carried no location".to_string())
        })
    }
}

/// Authenticated session against one backend's control plane
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Filtered index over a named collection
    async fn index(&self, collection: &str, filters: &[Filter]) -> Result<Vec<RemoteItem>>;

    /// Fetch a single item by href
    async fn show(&self, href: &str) -> Result<RemoteItem>;

    /// Create an item in a collection (or trigger an action endpoint)
    async fn create(&self, collection: &str, payload: &Value) -> Result<Created>;

    async fn update(&self, href: &str, payload: &Value) -> Result<()>;

    async fn delete(&self, href: &str) -> Result<()>;
}

/// Something that can be queried with server-side filters
#[async_trait]
pub trait Queryable: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    async fn query(&self, filters: &[Filter]) -> Result<Vec<RemoteItem>>;
}

/// A named collection bound to a client session
pub struct Collection<'a> {
    client: &'a dyn ControlPlaneClient,
    path: String,
}

impl<'a> Collection<'a> {
    pub fn new(client: &'a dyn ControlPlaneClient, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Queryable for Collection<'_> {
    fn name(&self) -> &str {
        &self.path
    }

    async fn query(&self, filters: &[Filter]) -> Result<Vec<RemoteItem>> {
        self.client.index(&self.path, filters).await
    }
}
