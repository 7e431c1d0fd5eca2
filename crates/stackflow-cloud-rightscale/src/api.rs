//! RightScale API 1.5 client
//!
//! Exchanges a refresh token for an access token, then speaks the
//! resource-oriented API: hrefs address resources, `filter[]` parameters
//! narrow index calls, and create calls answer with a `Location` header.

use crate::error::{Result, RightScaleError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, header};
use serde::Deserialize;
use serde_json::Value;
use stackflow_cloud::{ControlPlaneClient, Created, Filter, RemoteItem};

const API_VERSION: &str = "1.5";

/// Longest response body echoed into logs
const MAX_LOG_BODY_LENGTH: usize = 500;

fn truncate_for_log(body: &str) -> String {
    if body.len() <= MAX_LOG_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_LOG_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Authenticated RightScale session
pub struct RightScaleApi {
    http: Client,
    endpoint: String,
    access_token: String,
}

impl RightScaleApi {
    /// Exchange a refresh token for an access token
    pub async fn login(endpoint: &str, refresh_token: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("stackflow/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let endpoint = endpoint.trim_end_matches('/').to_string();

        tracing::debug!("POST {}/api/oauth2", endpoint);
        let response = http
            .post(format!("{}/api/oauth2", endpoint))
            .header("X-API-Version", API_VERSION)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RightScaleError::AuthenticationFailed(format!(
                "{}: {}",
                status.as_u16(),
                truncate_for_log(&body)
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        Ok(Self {
            http,
            endpoint,
            access_token: token.access_token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}{}", self.endpoint, href)
        }
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.access_token)
            .header("X-API-Version", API_VERSION)
    }

    /// Send and fail on non-success, returning the location header and body
    async fn send(&self, builder: RequestBuilder) -> Result<(Option<String>, String)> {
        let response = self.request(builder).send().await?;
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!(
                "RightScale returned {}:\n{}",
                status.as_u16(),
                truncate_for_log(&body)
            );
            return Err(RightScaleError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok((location, body))
    }

    async fn get_items(&self, href: &str, filters: &[Filter]) -> Result<Vec<RemoteItem>> {
        let url = self.url(href);
        tracing::debug!("GET {} {:?}", url, filters.iter().map(Filter::to_string).collect::<Vec<_>>());
        let params: Vec<(&str, String)> = filters
            .iter()
            .map(|f| ("filter[]", f.to_string()))
            .collect();
        let (_, body) = self.send(self.http.get(url).query(&params)).await?;
        let values: Vec<Value> = serde_json::from_str(&body)?;
        values.into_iter().map(to_item).collect()
    }

    async fn get_item(&self, href: &str) -> Result<RemoteItem> {
        let url = self.url(href);
        tracing::debug!("GET {}", url);
        let (_, body) = self.send(self.http.get(url)).await?;
        to_item(serde_json::from_str(&body)?)
    }

    async fn post(&self, href: &str, payload: &Value) -> Result<Created> {
        let url = self.url(href);
        tracing::debug!("POST {}", url);
        let (location, body) = self.send(self.http.post(url).json(payload)).await?;
        let body = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body).unwrap_or(Value::String(body))
        };
        Ok(Created {
            location: location.map(|l| strip_endpoint(&self.endpoint, &l)),
            body,
        })
    }
}

/// Locations come back absolute; hrefs elsewhere are endpoint-relative
fn strip_endpoint(endpoint: &str, location: &str) -> String {
    location
        .strip_prefix(endpoint)
        .unwrap_or(location)
        .to_string()
}

/// Convert a RightScale resource document into a [`RemoteItem`].
///
/// `links` becomes the link map and the `self` link becomes the href.
fn to_item(value: Value) -> Result<RemoteItem> {
    let Value::Object(mut fields) = value else {
        return Err(RightScaleError::InvalidResponse(
            "expected a resource object".to_string(),
        ));
    };

    let mut item = RemoteItem::default();
    if let Some(Value::Array(links)) = fields.remove("links") {
        for link in links {
            if let (Some(rel), Some(href)) = (
                link.get("rel").and_then(Value::as_str),
                link.get("href").and_then(Value::as_str),
            ) {
                item.links.insert(rel.to_string(), href.to_string());
            }
        }
    }
    item.href = item
        .links
        .get("self")
        .cloned()
        .or_else(|| fields.get("href").and_then(Value::as_str).map(str::to_string))
        .ok_or_else(|| RightScaleError::InvalidResponse("resource without self link".to_string()))?;
    item.fields = fields;
    Ok(item)
}

#[async_trait]
impl ControlPlaneClient for RightScaleApi {
    async fn index(&self, collection: &str, filters: &[Filter]) -> stackflow_cloud::Result<Vec<RemoteItem>> {
        Ok(self.get_items(collection, filters).await?)
    }

    async fn show(&self, href: &str) -> stackflow_cloud::Result<RemoteItem> {
        Ok(self.get_item(href).await?)
    }

    async fn create(&self, collection: &str, payload: &Value) -> stackflow_cloud::Result<Created> {
        Ok(self.post(collection, payload).await?)
    }

    async fn update(&self, href: &str, payload: &Value) -> stackflow_cloud::Result<()> {
        let url = self.url(href);
        tracing::debug!("PUT {}", url);
        self.send(self.http.put(url).json(payload)).await?;
        Ok(())
    }

    async fn delete(&self, href: &str) -> stackflow_cloud::Result<()> {
        let url = self.url(href);
        tracing::debug!("DELETE {}", url);
        self.send(self.http.delete(url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stackflow_cloud::CloudError;
    use wiremock::matchers::{bearer_token, body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn logged_in(server: &MockServer) -> RightScaleApi {
        Mock::given(method("POST"))
            .and(path("/api/oauth2"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok-123"})),
            )
            .mount(server)
            .await;
        RightScaleApi::login(&server.uri(), "refresh-abc").await.unwrap()
    }

    #[tokio::test]
    async fn test_login_rejected_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/oauth2"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let err = RightScaleApi::login(&server.uri(), "stale").await.err().unwrap();
        assert!(matches!(
            CloudError::from(err),
            CloudError::Authentication(msg) if msg.contains("invalid_grant")
        ));
    }

    #[tokio::test]
    async fn test_index_sends_filters_and_parses_links() {
        let server = MockServer::start().await;
        let api = logged_in(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/deployments"))
            .and(bearer_token("tok-123"))
            .and(header("X-API-Version", "1.5"))
            .and(query_param("filter[]", "name==web-tier"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "name": "web-tier",
                    "links": [
                        {"rel": "self", "href": "/api/deployments/42"},
                        {"rel": "servers", "href": "/api/deployments/42/servers"}
                    ]
                }
            ])))
            .mount(&server)
            .await;

        let items = api
            .index("/api/deployments", &[Filter::eq("name", "web-tier")])
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].href, "/api/deployments/42");
        assert_eq!(items[0].link("servers"), Some("/api/deployments/42/servers"));
        assert_eq!(items[0].str_field("name"), Some("web-tier"));
    }

    #[tokio::test]
    async fn test_create_returns_relative_location() {
        let server = MockServer::start().await;
        let api = logged_in(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/servers"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", format!("{}/api/servers/77", server.uri()).as_str()),
            )
            .mount(&server)
            .await;

        let created = api
            .create("/api/servers", &json!({"server": {"name": "web-1"}}))
            .await
            .unwrap();
        assert_eq!(created.location().unwrap(), "/api/servers/77");
        assert_eq!(created.body, Value::Null);
    }

    #[tokio::test]
    async fn test_error_status_carries_body() {
        let server = MockServer::start().await;
        let api = logged_in(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/servers"))
            .respond_with(ResponseTemplate::new(422).set_body_string("ResourceNotFound: ssh key"))
            .mount(&server)
            .await;

        let err = api.create("/api/servers", &json!({})).await.unwrap_err();
        match err {
            CloudError::RemoteApi { status, body } => {
                assert_eq!(status, 422);
                assert!(body.contains("ssh key"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let body = "é".repeat(400);
        let truncated = truncate_for_log(&body);
        assert!(truncated.contains("[truncated, 800 bytes total]"));
    }
}
