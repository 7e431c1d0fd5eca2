//! Keystone v2 identity: token issue and service catalog
//!
//! HP Cloud accepts API key credentials (`apiAccessKeyCredentials`) as well
//! as plain password credentials. API keys win when both are configured.

use crate::error::{HpCloudError, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use stackflow_cloud::{AuthMethod, Credentials};

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    access: Access,
}

#[derive(Debug, Deserialize)]
struct Access {
    token: Token,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct Token {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(rename = "publicURL")]
    pub public_url: String,
}

/// Service endpoints granted with a token
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    entries: Vec<CatalogEntry>,
}

impl ServiceCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Public URL for `service_type`, restricted to `region` when given
    pub fn endpoint(&self, service_type: &str, region: Option<&str>) -> Result<&str> {
        self.entries
            .iter()
            .filter(|e| e.service_type == service_type)
            .flat_map(|e| e.endpoints.iter())
            .find(|ep| match region {
                Some(region) => ep.region.as_deref() == Some(region),
                None => true,
            })
            .map(|ep| ep.public_url.trim_end_matches('/'))
            .ok_or_else(|| HpCloudError::MissingService {
                service_type: service_type.to_string(),
                region: region.map(str::to_string),
            })
    }
}

/// An issued token and the catalog that came with it
#[derive(Debug)]
pub struct Session {
    pub token: String,
    pub catalog: ServiceCatalog,
}

/// Token request body for the configured credentials
pub fn auth_payload(credentials: &Credentials) -> stackflow_cloud::Result<Value> {
    let tenant_name = Credentials::required("tenant_name", &credentials.tenant_name)?;
    let mut auth = match credentials.auth_method()? {
        AuthMethod::ApiKey {
            access_key_id,
            secret_access_key,
        } => json!({
            "apiAccessKeyCredentials": {
                "accessKey": access_key_id,
                "secretKey": secret_access_key,
            }
        }),
        AuthMethod::Password { username, password } => json!({
            "passwordCredentials": {
                "username": username,
                "password": password,
            }
        }),
        AuthMethod::RefreshToken { .. } => {
            return Err(stackflow_cloud::CloudError::InvalidConfig(
                "HP Cloud needs API keys or username and password".to_string(),
            ));
        }
    };
    auth["tenantName"] = json!(tenant_name);
    Ok(json!({ "auth": auth }))
}

/// Issue a token against `auth_url`
pub async fn authenticate(http: &reqwest::Client, auth_url: &str, payload: &Value) -> Result<Session> {
    let url = format!("{}/tokens", auth_url.trim_end_matches('/'));
    tracing::debug!("POST {}", url);

    let response = http.post(&url).json(payload).send().await?;
    let status = response.status();
    let body = response.text().await?;

    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(HpCloudError::AuthenticationFailed(format!(
            "{}: {}",
            status.as_u16(),
            body
        )));
    }
    if !status.is_success() {
        return Err(HpCloudError::Api {
            status: status.as_u16(),
            body,
        });
    }

    let envelope: TokenEnvelope = serde_json::from_str(&body)?;
    Ok(Session {
        token: envelope.access.token.id,
        catalog: ServiceCatalog::new(envelope.access.service_catalog),
    })
}
