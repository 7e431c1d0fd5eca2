//! OpenStack REST client
//!
//! Collections are addressed as `<service type>/<path>`, for example
//! `compute/servers` or `hpext:dbaas/instances`; the service type picks the
//! catalog endpoint. Items get hrefs in the same form
//! (`compute/servers/1234`), so any href can be fed back to `show`,
//! `update` or `delete`.
//!
//! OpenStack wraps payloads in a single named key (`{"servers": [...]}`,
//! `{"server": {...}}`); the client unwraps them.

use crate::error::{HpCloudError, Result};
use crate::keystone::{self, Session};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{Map, Value};
use stackflow_cloud::{
    ControlPlaneClient, Created, Credentials, Filter, FilterOp, RemoteItem, client::value_text,
};
use std::collections::HashMap;

/// Service types used by the handlers
pub const COMPUTE: &str = "compute";
pub const DBAAS: &str = "hpext:dbaas";
pub const LBAAS: &str = "hpext:lbaas";

/// Authenticated OpenStack session with resolved service endpoints
pub struct OpenStackClient {
    http: Client,
    token: String,
    endpoints: HashMap<String, String>,
}

impl OpenStackClient {
    /// Authenticate and resolve an endpoint for every service type in
    /// `services` that the catalog offers
    pub async fn connect(credentials: &Credentials, services: &[&str]) -> stackflow_cloud::Result<Self> {
        let auth_url = Credentials::required("auth_url", &credentials.auth_url)?;
        let payload = keystone::auth_payload(credentials)?;

        let http = Client::builder()
            .user_agent(concat!("stackflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(HpCloudError::from)?;
        let Session { token, catalog } = keystone::authenticate(&http, auth_url, &payload).await?;

        let region = credentials.region();
        let mut endpoints = HashMap::new();
        for service in services {
            match catalog.endpoint(service, region) {
                Ok(url) => {
                    endpoints.insert(service.to_string(), url.to_string());
                }
                Err(e) => tracing::debug!("{}", e),
            }
        }
        Ok(Self::with_endpoints(http, token, endpoints))
    }

    pub fn with_endpoints(http: Client, token: String, endpoints: HashMap<String, String>) -> Self {
        Self {
            http,
            token,
            endpoints,
        }
    }

    /// Split `<service>/<path>` and build the absolute URL
    fn url(&self, href: &str) -> Result<String> {
        let (service, path) = href.split_once('/').ok_or_else(|| {
            HpCloudError::InvalidResponse(format!("href {:?} names no service", href))
        })?;
        let endpoint = self
            .endpoints
            .get(service)
            .ok_or_else(|| HpCloudError::MissingService {
                service_type: service.to_string(),
                region: None,
            })?;
        Ok(format!("{}/{}", endpoint, path))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value> {
        let response = builder
            .header("X-Auth-Token", &self.token)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!("HP Cloud returned {}:\n{}", status.as_u16(), body);
            return Err(HpCloudError::Api {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// `servers/detail` lists the `servers` collection
fn collection_root(collection: &str) -> &str {
    collection.strip_suffix("/detail").unwrap_or(collection)
}

/// Key a list response wraps its items in: `os-security-groups` lists come
/// back under `security_groups`
fn list_key(collection: &str) -> String {
    let name = collection_root(collection)
        .rsplit('/')
        .next()
        .unwrap_or(collection);
    name.strip_prefix("os-").unwrap_or(name).replace('-', "_")
}

/// Items of a list response. Paginated lists carry sibling `*_links` keys
/// next to the items.
fn list_items(collection: &str, body: Value) -> Option<Vec<Value>> {
    match body {
        Value::Array(values) => Some(values),
        Value::Object(mut map) => match map.remove(&list_key(collection)) {
            Some(Value::Array(values)) => Some(values),
            _ => map.into_iter().find_map(|(key, value)| match value {
                Value::Array(values) if !key.ends_with("_links") => Some(values),
                _ => None,
            }),
        },
        _ => None,
    }
}

/// Strip the single-key wrapper OpenStack puts around payloads
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(map) if map.len() == 1 => match map.into_iter().next() {
            Some((_, inner @ (Value::Object(_) | Value::Array(_)))) => inner,
            Some((key, other)) => Value::Object(Map::from_iter([(key, other)])),
            None => Value::Null,
        },
        other => other,
    }
}

pub(crate) fn to_item(collection: &str, value: Value) -> Result<RemoteItem> {
    let Value::Object(fields) = unwrap_envelope(value) else {
        return Err(HpCloudError::InvalidResponse(format!(
            "expected an object in {}",
            collection
        )));
    };

    // Key pairs have no id; their name is the handle
    let id = fields
        .get("id")
        .or_else(|| fields.get("name"))
        .map(value_text)
        .ok_or_else(|| HpCloudError::InvalidResponse(format!("item in {} has no id", collection)))?;

    let mut item = RemoteItem::new(format!("{}/{}", collection_root(collection), id));
    if let Some(Value::Array(links)) = fields.get("links") {
        for link in links {
            if let (Some(rel), Some(href)) = (
                link.get("rel").and_then(Value::as_str),
                link.get("href").and_then(Value::as_str),
            ) {
                item.links.insert(rel.to_string(), href.to_string());
            }
        }
    }
    item.fields = fields;
    Ok(item)
}

fn ne_filters_pass(item: &RemoteItem, filters: &[Filter]) -> bool {
    filters
        .iter()
        .filter(|f| f.op == FilterOp::Ne)
        .all(|f| item.field(&f.field).map(value_text) != Some(f.value_text()))
}

#[async_trait]
impl ControlPlaneClient for OpenStackClient {
    async fn index(&self, collection: &str, filters: &[Filter]) -> stackflow_cloud::Result<Vec<RemoteItem>> {
        let url = self.url(collection)?;
        // OpenStack query strings only express equality
        let params: Vec<(String, String)> = filters
            .iter()
            .filter(|f| f.op == FilterOp::Eq)
            .map(|f| (f.field.clone(), f.value_text()))
            .collect();
        tracing::debug!("GET {} {:?}", url, params);

        let body = self.send(self.http.get(&url).query(&params)).await?;
        let Some(values) = list_items(collection, body) else {
            return Err(HpCloudError::InvalidResponse(format!("{} did not return a list", collection)).into());
        };

        let mut items = Vec::with_capacity(values.len());
        for value in values {
            let item = to_item(collection, value)?;
            if ne_filters_pass(&item, filters) {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn show(&self, href: &str) -> stackflow_cloud::Result<RemoteItem> {
        let url = self.url(href)?;
        tracing::debug!("GET {}", url);
        let body = self.send(self.http.get(&url)).await?;
        let collection = href.rsplit_once('/').map(|(c, _)| c).unwrap_or(href);
        Ok(to_item(collection, body)?)
    }

    async fn create(&self, collection: &str, payload: &Value) -> stackflow_cloud::Result<Created> {
        let url = self.url(collection)?;
        tracing::debug!("POST {}", url);
        let body = self.send(self.http.post(&url).json(payload)).await?;
        let location = to_item(collection, body.clone()).ok().map(|item| item.href);
        Ok(Created { location, body })
    }

    async fn update(&self, href: &str, payload: &Value) -> stackflow_cloud::Result<()> {
        let url = self.url(href)?;
        tracing::debug!("PUT {}", url);
        self.send(self.http.put(&url).json(payload)).await?;
        Ok(())
    }

    async fn delete(&self, href: &str) -> stackflow_cloud::Result<()> {
        let url = self.url(href)?;
        tracing::debug!("DELETE {}", url);
        self.send(self.http.delete(&url)).await?;
        Ok(())
    }
}
