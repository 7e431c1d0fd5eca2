//! Deployer credentials
//!
//! One bundle per backend, supplied by the configuration layer. Fields are
//! optional because each backend uses a different subset.

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub tenant_name: Option<String>,
    #[serde(default)]
    pub region_name: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// How a session authenticates, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod<'a> {
    ApiKey {
        access_key_id: &'a str,
        secret_access_key: &'a str,
    },
    Password {
        username: &'a str,
        password: &'a str,
    },
    RefreshToken {
        refresh_token: &'a str,
    },
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl Credentials {
    /// Pick the authentication method. API keys win over username and
    /// password when both are configured.
    pub fn auth_method(&self) -> Result<AuthMethod<'_>> {
        if let (Some(access_key_id), Some(secret_access_key)) = (
            non_empty(&self.access_key_id),
            non_empty(&self.secret_access_key),
        ) {
            return Ok(AuthMethod::ApiKey {
                access_key_id,
                secret_access_key,
            });
        }
        if let (Some(username), Some(password)) =
            (non_empty(&self.username), non_empty(&self.password))
        {
            return Ok(AuthMethod::Password { username, password });
        }
        if let Some(refresh_token) = non_empty(&self.refresh_token) {
            return Ok(AuthMethod::RefreshToken { refresh_token });
        }
        Err(CloudError::Authentication(
            "no usable credentials: expected an API key pair, username/password or refresh token"
                .to_string(),
        ))
    }

    /// Fetch a field that the backend cannot work without
    pub fn required<'a>(field: &str, value: &'a Option<String>) -> Result<&'a str> {
        non_empty(value)
            .ok_or_else(|| CloudError::InvalidConfig(format!("credential '{}' is required", field)))
    }

    pub fn region(&self) -> Option<&str> {
        non_empty(&self.region_name)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("auth_url", &self.auth_url)
            .field("tenant_name", &self.tenant_name)
            .field("region_name", &self.region_name)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redact(&self.secret_access_key))
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("api_endpoint", &self.api_endpoint)
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn both() -> Credentials {
        Credentials {
            auth_url: Some("https://identity.example.com/v2.0/".to_string()),
            tenant_name: Some("farley-tenant1".to_string()),
            access_key_id: Some("MZOFIE9S83FOS248FIE3".to_string()),
            secret_access_key: Some("EU859vjksor73gkY".to_string()),
            username: Some("farley".to_string()),
            password: Some("NeverCryW0lf".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_api_keys_take_precedence() {
        let creds = both();
        assert_eq!(
            creds.auth_method().unwrap(),
            AuthMethod::ApiKey {
                access_key_id: "MZOFIE9S83FOS248FIE3",
                secret_access_key: "EU859vjksor73gkY",
            }
        );
    }

    #[test]
    fn test_falls_back_to_password_when_key_incomplete() {
        let creds = Credentials {
            secret_access_key: Some(String::new()),
            ..both()
        };
        assert!(matches!(
            creds.auth_method().unwrap(),
            AuthMethod::Password {
                username: "farley",
                ..
            }
        ));
    }

    #[test]
    fn test_no_credentials_is_authentication_error() {
        let creds = Credentials::default();
        assert!(matches!(
            creds.auth_method(),
            Err(CloudError::Authentication(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", both());
        assert!(!rendered.contains("NeverCryW0lf"));
        assert!(!rendered.contains("EU859vjksor73gkY"));
        assert!(rendered.contains("farley-tenant1"));
    }

    #[test]
    fn test_deserialize_from_yaml_like_json() {
        let creds: Credentials = serde_json::from_value(serde_json::json!({
            "auth_url": "https://identity.example.com/v2.0/",
            "tenant_name": "t1",
            "region_name": "az-1.region-a.geo-1"
        }))
        .unwrap();
        assert_eq!(creds.region(), Some("az-1.region-a.geo-1"));
        assert!(creds.username.is_none());
    }
}
