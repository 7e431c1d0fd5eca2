//! MySQL data plane used to provision DBaaS admin accounts

use crate::dbaas::{AdminSession, BootstrapCredentials, DataPlane};
use crate::error::HpCloudError;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use stackflow_cloud::{AdminAccount, CloudError, Result};
use std::time::Duration;

/// Per-attempt connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Quote a string literal for MySQL
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

pub(crate) fn grant_statements(admin: &AdminAccount) -> Vec<String> {
    let user = format!("{}@'%'", quote(&admin.username));
    vec![
        format!(
            "CREATE USER IF NOT EXISTS {} IDENTIFIED BY {}",
            user,
            quote(&admin.password)
        ),
        format!("GRANT ALL PRIVILEGES ON *.* TO {} WITH GRANT OPTION", user),
        "FLUSH PRIVILEGES".to_string(),
    ]
}

#[derive(Debug, Clone)]
pub struct MySqlDataPlane {
    connect_timeout: Duration,
}

impl Default for MySqlDataPlane {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

#[async_trait]
impl DataPlane for MySqlDataPlane {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        credentials: &BootstrapCredentials,
    ) -> Result<Box<dyn AdminSession>> {
        let options = MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(credentials.username())
            .password(credentials.password());

        let conn = tokio::time::timeout(self.connect_timeout, options.connect())
            .await
            .map_err(|_| CloudError::DataPlane(format!("connect to {}:{} timed out", host, port)))?
            .map_err(HpCloudError::from)?;
        Ok(Box::new(MySqlAdminSession { conn }))
    }
}

struct MySqlAdminSession {
    conn: MySqlConnection,
}

#[async_trait]
impl AdminSession for MySqlAdminSession {
    async fn grant_all(&mut self, admin: &AdminAccount) -> Result<()> {
        tracing::info!("Creating admin user {}...", admin.username);
        for statement in grant_statements(admin) {
            self.conn
                .execute(statement.as_str())
                .await
                .map_err(HpCloudError::from)?;
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().await.map_err(HpCloudError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_statements_escape_quotes() {
        let admin = AdminAccount {
            username: "app".to_string(),
            password: "it's\\secret".to_string(),
        };
        let statements = grant_statements(&admin);
        assert_eq!(
            statements[0],
            "CREATE USER IF NOT EXISTS 'app'@'%' IDENTIFIED BY 'it''s\\\\secret'"
        );
        assert_eq!(
            statements[1],
            "GRANT ALL PRIVILEGES ON *.* TO 'app'@'%' WITH GRANT OPTION"
        );
        assert_eq!(statements[2], "FLUSH PRIVILEGES");
    }
}
