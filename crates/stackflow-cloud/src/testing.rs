//! In-memory control plane for tests
//!
//! Enabled with the `test-utils` feature. The index endpoint mimics vendor
//! filters that match substrings, so exact-match resolution is exercised
//! the way real backends exercise it.

use crate::client::{ControlPlaneClient, Created, Filter, FilterOp, RemoteItem, value_text};
use crate::consul::{ServerConsul, ServerDefinition, ServerHandle, ServerRecord};
use crate::credentials::Credentials;
use crate::error::{CloudError, Result};
use crate::kind::ResourceKind;
use crate::provider::{Backend, Handler, HandlerContext, Registry};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct State {
    collections: HashMap<String, Vec<RemoteItem>>,
    shows: HashMap<String, VecDeque<RemoteItem>>,
    create_responses: HashMap<String, VecDeque<Result<Created>>>,
    created: Vec<(String, Value)>,
    updated: Vec<(String, Value)>,
    deleted: Vec<String>,
    calls: Vec<String>,
    next_id: u64,
}

/// Control plane backed by in-memory collections
#[derive(Default)]
pub struct InMemoryControlPlane {
    state: Mutex<State>,
}

impl InMemoryControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an item to a collection
    pub fn insert(&self, collection: &str, item: RemoteItem) {
        self.lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(item);
    }

    /// Successive `show(href)` calls return these items in order; the last
    /// one repeats forever.
    pub fn script_show(&self, href: &str, items: Vec<RemoteItem>) {
        self.lock()
            .shows
            .insert(href.to_string(), items.into_iter().collect());
    }

    /// Queue a canned response for the next create call on `collection`
    pub fn respond_to_create(&self, collection: &str, response: Result<Created>) {
        self.lock()
            .create_responses
            .entry(collection.to_string())
            .or_default()
            .push_back(response);
    }

    /// Payloads of every create call, in order
    pub fn created(&self) -> Vec<(String, Value)> {
        self.lock().created.clone()
    }

    pub fn updated(&self) -> Vec<(String, Value)> {
        self.lock().updated.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    /// `"<verb> <target>"` for every call made so far
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

fn fuzzy_match(item: &RemoteItem, filter: &Filter) -> bool {
    let actual = item.field(&filter.field).map(value_text);
    let wanted = filter.value_text();
    match filter.op {
        FilterOp::Eq => actual.map(|a| a.contains(&wanted)).unwrap_or(false),
        FilterOp::Ne => actual.map(|a| a != wanted).unwrap_or(true),
    }
}

#[async_trait]
impl ControlPlaneClient for InMemoryControlPlane {
    async fn index(&self, collection: &str, filters: &[Filter]) -> Result<Vec<RemoteItem>> {
        let mut state = self.lock();
        let rendered: Vec<String> = filters.iter().map(Filter::to_string).collect();
        state
            .calls
            .push(format!("index {} [{}]", collection, rendered.join(",")));
        Ok(state
            .collections
            .get(collection)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| filters.iter().all(|f| fuzzy_match(item, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn show(&self, href: &str) -> Result<RemoteItem> {
        let mut state = self.lock();
        state.calls.push(format!("show {}", href));
        if let Some(queue) = state.shows.get_mut(href) {
            let next = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(item) = next {
                return Ok(item);
            }
        }
        state
            .collections
            .values()
            .flatten()
            .find(|item| item.href == href)
            .cloned()
            .ok_or_else(|| CloudError::RemoteApi {
                status: 404,
                body: format!("{} not found", href),
            })
    }

    async fn create(&self, collection: &str, payload: &Value) -> Result<Created> {
        let mut state = self.lock();
        state.calls.push(format!("create {}", collection));
        state
            .created
            .push((collection.to_string(), payload.clone()));

        if let Some(response) = state
            .create_responses
            .get_mut(collection)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }

        state.next_id += 1;
        let href = format!("{}/{}", collection, state.next_id);
        let mut item = RemoteItem::new(href.clone());
        if let Value::Object(fields) = payload {
            item.fields = fields.clone();
        }
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(item);
        Ok(Created {
            location: Some(href.clone()),
            body: json!({ "href": href }),
        })
    }

    async fn update(&self, href: &str, payload: &Value) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("update {}", href));
        state.updated.push((href.to_string(), payload.clone()));
        Ok(())
    }

    async fn delete(&self, href: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("delete {}", href));
        state.deleted.push(href.to_string());
        for items in state.collections.values_mut() {
            items.retain(|item| item.href != href);
        }
        Ok(())
    }
}

/// Server handler that reads and writes a flat `/servers` collection
pub struct StubServers {
    session: Arc<dyn ControlPlaneClient>,
}

impl StubServers {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            session: context.session,
        }
    }
}

fn stub_record(item: &RemoteItem) -> ServerRecord {
    ServerRecord {
        id: item.href.clone(),
        public_ips: item.string_list("public_ips"),
        private_ips: item.string_list("private_ips"),
    }
}

#[async_trait]
impl ServerConsul for StubServers {
    async fn create_stack(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn find_servers(
        &mut self,
        stack: &str,
        role: &str,
        _running: bool,
    ) -> Result<Vec<ServerRecord>> {
        let items = self
            .session
            .index(
                "/servers",
                &[Filter::eq("stack", stack), Filter::eq("name", role)],
            )
            .await?;
        Ok(items
            .iter()
            .filter(|i| i.str_field("name") == Some(role) && i.str_field("stack") == Some(stack))
            .map(stub_record)
            .collect())
    }

    async fn find_server_defs(&mut self, _stack: &str, _basename: &str) -> Result<Vec<ServerHandle>> {
        Ok(Vec::new())
    }

    async fn define_server(&mut self, definition: &ServerDefinition) -> Result<ServerHandle> {
        Ok(ServerHandle::new(
            definition.basename.clone(),
            json!({ "stack": definition.stack, "name": definition.basename }),
        ))
    }

    async fn create_server(
        &mut self,
        handle: &ServerHandle,
        _inputs: &BTreeMap<String, String>,
        _timeout: Duration,
    ) -> Result<ServerRecord> {
        let created = self.session.create("/servers", handle.detail()).await?;
        let item = self.session.show(created.location()?).await?;
        Ok(stub_record(&item))
    }

    async fn find_running(&mut self, server: &ServerRecord, _timeout: Duration) -> Result<ServerRecord> {
        Ok(server.clone())
    }
}

/// Backend serving a fixed in-memory control plane
pub struct StaticBackend {
    name: String,
    client: Arc<InMemoryControlPlane>,
    registry: Registry,
    reject_auth: bool,
    authentications: Arc<AtomicUsize>,
    builds: Arc<AtomicUsize>,
}

impl StaticBackend {
    pub fn new(name: impl Into<String>, client: Arc<InMemoryControlPlane>, registry: Registry) -> Self {
        Self {
            name: name.into(),
            client,
            registry,
            reject_auth: false,
            authentications: Arc::new(AtomicUsize::new(0)),
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Backend whose only handler is [`StubServers`]
    pub fn with_servers(client: Arc<InMemoryControlPlane>) -> Self {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let registry = Registry::builder()
            .register(ResourceKind::Server, move |ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Handler::Servers(Box::new(StubServers::new(ctx)))
            })
            .build();
        Self {
            builds,
            ..Self::new("static", client, registry)
        }
    }

    pub fn rejecting_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    pub fn authentications(&self) -> Arc<AtomicUsize> {
        self.authentications.clone()
    }

    /// Number of handlers built by [`StaticBackend::with_servers`]
    pub fn builds(&self) -> Arc<AtomicUsize> {
        self.builds.clone()
    }
}

#[async_trait]
impl Backend for StaticBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    async fn authenticate(&self, _credentials: &Credentials) -> Result<Arc<dyn ControlPlaneClient>> {
        self.authentications.fetch_add(1, Ordering::SeqCst);
        if self.reject_auth {
            return Err(CloudError::Authentication(
                "401 Unauthorized: invalid credentials".to_string(),
            ));
        }
        Ok(self.client.clone())
    }
}
