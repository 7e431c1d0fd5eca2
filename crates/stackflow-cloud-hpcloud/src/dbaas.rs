//! HP Cloud DBaaS (MySQL instances)
//!
//! HP Cloud assigns generated superuser credentials when an instance is
//! created and offers no way to read them back later. `create_db` captures
//! them from the creation response, uses them once to create the requested
//! admin account over a MySQL connection, and then drops them.

use crate::mysql::MySqlDataPlane;
use async_trait::async_trait;
use serde_json::{Value, json};
use stackflow_cloud::{
    AdminAccount, CloudError, Collection, Constraint, ControlPlaneClient, DatabaseConsul,
    DatabaseRecord, DatabaseRequest, Filter, HandlerContext, RemoteItem, Result,
    poll_with_timeout, require_exact,
};
use std::sync::Arc;
use std::time::Duration;

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(10);
const CONNECT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const INSTANCES: &str = "hpext:dbaas/instances";
const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Generated superuser credentials, usable exactly once
pub struct BootstrapCredentials {
    username: String,
    password: String,
}

impl BootstrapCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Pull `credential.username`/`credential.password` out of a creation
    /// response
    fn from_response(body: &Value) -> Result<Self> {
        let instance = body.get("instance").unwrap_or(body);
        let credential = instance.get("credential");
        let field = |name: &str| {
            credential
                .and_then(|c| c.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    CloudError::InvalidResponse(format!(
                        "database creation response carried no credential {}",
                        name
                    ))
                })
        };
        Ok(Self::new(field("username")?, field("password")?))
    }
}

impl std::fmt::Debug for BootstrapCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Open admin connection to a database server
#[async_trait]
pub trait AdminSession: Send {
    /// Create `admin` with every privilege, grant option included
    async fn grant_all(&mut self, admin: &AdminAccount) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Connects to the database server itself, as opposed to the DBaaS API
#[async_trait]
pub trait DataPlane: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        credentials: &BootstrapCredentials,
    ) -> Result<Box<dyn AdminSession>>;
}

fn database_record(item: &RemoteItem) -> DatabaseRecord {
    DatabaseRecord {
        id: item.href.clone(),
        name: item.str_field("name").unwrap_or_default().to_string(),
        hostname: item.str_field("hostname").unwrap_or_default().to_string(),
        port: item
            .field("port")
            .and_then(|p| match p {
                Value::String(s) => s.parse().ok(),
                other => other.as_u64().and_then(|n| u16::try_from(n).ok()),
            })
            .unwrap_or(DEFAULT_MYSQL_PORT),
    }
}

/// Consume the bootstrap credentials to provision `admin`.
///
/// The credentials are dropped when this returns, whatever the outcome.
async fn hand_off(
    data_plane: &dyn DataPlane,
    record: &DatabaseRecord,
    bootstrap: BootstrapCredentials,
    admin: &AdminAccount,
    timeout: Duration,
) -> Result<()> {
    tracing::info!("Connecting to {}...", record.name);
    let bootstrap = &bootstrap;
    let mut session = poll_with_timeout(timeout, CONNECT_POLL_INTERVAL, || async move {
        match data_plane
            .connect(&record.hostname, record.port, bootstrap)
            .await
        {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!("Could not connect to db, {}: {}", record.name, e);
                Ok(None)
            }
        }
    })
    .await
    .map_err(|e| match e {
        CloudError::Timeout(_) => CloudError::Timeout(format!(
            "Database {} was created but could not be reached within allotted time.",
            record.name
        )),
        other => other,
    })?;

    let granted = session.grant_all(admin).await;
    if let Err(e) = session.close().await {
        tracing::warn!("Failed to close admin session on {}: {}", record.name, e);
    }
    granted
}

/// Database instances on HP Cloud DBaaS
pub struct HpDatabases {
    session: Arc<dyn ControlPlaneClient>,
    data_plane: Arc<dyn DataPlane>,
}

impl HpDatabases {
    pub fn new(context: HandlerContext) -> Self {
        Self::with_data_plane(context, Arc::new(MySqlDataPlane::default()))
    }

    pub fn with_data_plane(context: HandlerContext, data_plane: Arc<dyn DataPlane>) -> Self {
        Self {
            session: context.session,
            data_plane,
        }
    }

    async fn wait_active(&self, href: &str, timeout: Duration) -> Result<RemoteItem> {
        let session = self.session.clone();
        poll_with_timeout(timeout, STATUS_POLL_INTERVAL, || {
            let session = session.clone();
            let href = href.to_string();
            async move {
                let instance = session.show(&href).await?;
                match instance.str_field("status") {
                    Some("ACTIVE") | Some("running") => Ok(Some(instance)),
                    Some("ERROR") | Some("error") => Err(CloudError::ResourceFailed(format!(
                        "database {} entered ERROR state",
                        href
                    ))),
                    _ => Ok(None),
                }
            }
        })
        .await
        .map_err(|e| match e {
            CloudError::Timeout(_) => {
                CloudError::Timeout("Database not active within allotted time.".to_string())
            }
            other => other,
        })
    }
}

#[async_trait]
impl DatabaseConsul for HpDatabases {
    async fn find_dbs(&mut self, name: &str) -> Result<Vec<DatabaseRecord>> {
        let instances = self
            .session
            .index(INSTANCES, &[Filter::eq("name", name)])
            .await?;
        Ok(instances
            .iter()
            .filter(|i| i.str_field("name") == Some(name))
            .map(database_record)
            .collect())
    }

    async fn create_db(&mut self, request: &DatabaseRequest, timeout: Duration) -> Result<DatabaseRecord> {
        tracing::info!("Creating database {}...", request.instance_name);
        if !request.security_groups.is_empty() {
            tracing::debug!("HP Cloud DBaaS ignores security groups");
        }

        let flavor = require_exact(
            &Collection::new(self.session.as_ref(), "hpext:dbaas/flavors"),
            &[Constraint::new("name", request.instance_type.as_str())],
        )
        .await?;

        let payload = json!({
            "instance": {
                "name": request.instance_name,
                "flavorRef": flavor.link("self").unwrap_or(flavor.id()),
                "volume": { "size": request.storage_size_gb },
                "databases": [{ "name": request.db_name() }],
            }
        });
        let created = self.session.create(INSTANCES, &payload).await?;
        let bootstrap = BootstrapCredentials::from_response(&created.body)?;
        tracing::debug!("Bootstrap credentials for {}: {:?}", request.instance_name, bootstrap);

        let instance = self.wait_active(created.location()?, timeout).await?;
        let record = database_record(&instance);

        hand_off(
            self.data_plane.as_ref(),
            &record,
            bootstrap,
            &request.admin,
            timeout,
        )
        .await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_cloud::DEFAULT_TIMEOUT;
    use stackflow_cloud::testing::InMemoryControlPlane;
    use stackflow_cloud::{Created, Credentials};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Default)]
    struct FakeDataPlane {
        failures_before_connect: usize,
        broken_session: bool,
        attempts: AtomicUsize,
        seen: Mutex<Vec<String>>,
        granted: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
    }

    struct FakeSession {
        broken: bool,
        granted: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AdminSession for FakeSession {
        async fn grant_all(&mut self, admin: &AdminAccount) -> Result<()> {
            if self.broken {
                return Err(CloudError::DataPlane(
                    "GRANT command denied to user 'auto_admin'".to_string(),
                ));
            }
            self.granted.lock().unwrap().push(admin.username.clone());
            Ok(())
        }

        async fn close(self: Box<Self>) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if self.broken {
                return Err(CloudError::DataPlane("Lost connection to server".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DataPlane for FakeDataPlane {
        async fn connect(
            &self,
            host: &str,
            port: u16,
            credentials: &BootstrapCredentials,
        ) -> Result<Box<dyn AdminSession>> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}@{}:{}", credentials.username(), host, port));
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures_before_connect {
                return Err(CloudError::DataPlane("connection refused".to_string()));
            }
            Ok(Box::new(FakeSession {
                broken: self.broken_session,
                granted: self.granted.clone(),
                closed: self.closed.clone(),
            }))
        }
    }

    fn seeded() -> Arc<InMemoryControlPlane> {
        let cp = InMemoryControlPlane::new();
        cp.insert(
            "hpext:dbaas/flavors",
            RemoteItem::new("hpext:dbaas/flavors/1")
                .with_field("name", "medium")
                .with_link("self", "https://dbaas.example/v1/flavors/1"),
        );
        cp.respond_to_create(
            INSTANCES,
            Ok(Created {
                location: Some("hpext:dbaas/instances/db1".to_string()),
                body: json!({
                    "instance": {
                        "id": "db1",
                        "credential": {"username": "auto_admin", "password": "generated"}
                    }
                }),
            }),
        );
        let instance = |status: &str| {
            RemoteItem::new("hpext:dbaas/instances/db1")
                .with_field("name", "orders")
                .with_field("status", status)
                .with_field("hostname", "15.185.9.9")
                .with_field("port", 3306)
        };
        cp.script_show(
            "hpext:dbaas/instances/db1",
            vec![instance("BUILD"), instance("ACTIVE")],
        );
        cp
    }

    fn request() -> DatabaseRequest {
        DatabaseRequest {
            instance_name: "orders".to_string(),
            instance_type: "medium".to_string(),
            admin: AdminAccount {
                username: "app_admin".to_string(),
                password: "s3cret".to_string(),
            },
            db_name: None,
            storage_size_gb: stackflow_cloud::DEFAULT_STORAGE_SIZE_GB,
            security_groups: Vec::new(),
        }
    }

    fn databases(cp: Arc<InMemoryControlPlane>, data_plane: Arc<FakeDataPlane>) -> HpDatabases {
        HpDatabases::with_data_plane(
            HandlerContext {
                session: cp,
                credentials: Arc::new(Credentials::default()),
            },
            data_plane,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_db_hands_off_bootstrap_credentials() {
        let cp = seeded();
        let data_plane = Arc::new(FakeDataPlane {
            failures_before_connect: 2,
            ..Default::default()
        });
        let mut dbs = databases(cp.clone(), data_plane.clone());

        let record = dbs.create_db(&request(), DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(record.hostname, "15.185.9.9");
        assert_eq!(record.port, 3306);

        assert_eq!(data_plane.attempts.load(Ordering::SeqCst), 3);
        assert!(
            data_plane
                .seen
                .lock()
                .unwrap()
                .iter()
                .all(|s| s == "auto_admin@15.185.9.9:3306")
        );
        assert_eq!(*data_plane.granted.lock().unwrap(), vec!["app_admin".to_string()]);
        assert_eq!(data_plane.closed.load(Ordering::SeqCst), 1);

        let (_, payload) = cp.created().pop().unwrap();
        assert_eq!(payload["instance"]["volume"]["size"], 5);
        assert_eq!(payload["instance"]["databases"][0]["name"], "orders");
        assert_eq!(payload["instance"]["flavorRef"], "https://dbaas.example/v1/flavors/1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_database_times_out() {
        let cp = seeded();
        let data_plane = Arc::new(FakeDataPlane {
            failures_before_connect: usize::MAX,
            ..Default::default()
        });
        let mut dbs = databases(cp, data_plane.clone());

        let timeout = Duration::from_secs(60);
        let start = Instant::now();
        let err = dbs.create_db(&request(), timeout).await.unwrap_err();

        assert!(matches!(err, CloudError::Timeout(ref m) if m.contains("orders was created")));
        assert!(data_plane.granted.lock().unwrap().is_empty());
        // status poll plus connect poll, each bounded by the timeout
        assert!(start.elapsed() < timeout * 2 + CONNECT_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_failure_wins_over_close_failure() {
        let data_plane = Arc::new(FakeDataPlane {
            broken_session: true,
            ..Default::default()
        });
        let mut dbs = databases(seeded(), data_plane.clone());

        let err = dbs.create_db(&request(), DEFAULT_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, CloudError::DataPlane(ref m) if m.starts_with("GRANT command denied")));
        assert_eq!(data_plane.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_credential_in_response() {
        let cp = InMemoryControlPlane::new();
        cp.insert(
            "hpext:dbaas/flavors",
            RemoteItem::new("hpext:dbaas/flavors/1").with_field("name", "medium"),
        );
        let mut dbs = databases(cp, Arc::new(FakeDataPlane::default()));

        let err = dbs.create_db(&request(), DEFAULT_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidResponse(_)));
    }

    #[test]
    fn test_bootstrap_debug_is_redacted() {
        let creds = BootstrapCredentials::new("auto_admin", "generated");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("auto_admin"));
        assert!(!debug.contains("generated"));
    }

    #[tokio::test]
    async fn test_find_dbs_exact_name() {
        let cp = InMemoryControlPlane::new();
        cp.insert(INSTANCES, RemoteItem::new("hpext:dbaas/instances/a").with_field("name", "orders"));
        cp.insert(INSTANCES, RemoteItem::new("hpext:dbaas/instances/b").with_field("name", "orders-replica"));
        let mut dbs = databases(cp, Arc::new(FakeDataPlane::default()));

        let found = dbs.find_dbs("orders").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].port, DEFAULT_MYSQL_PORT);
    }
}
