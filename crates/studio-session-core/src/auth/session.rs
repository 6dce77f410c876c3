use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::store::TokenSet;
use crate::api::ApiError;
use crate::config::SessionConfig;

/// The identity layer's session object. Only `expires` is guaranteed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySession {
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<SessionUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
}

impl IdentitySession {
    pub fn to_token_set(&self) -> TokenSet {
        TokenSet {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: Some(self.expires),
        }
    }
}

/// Where a fresh session comes from when the current one needs refreshing.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// `Ok(None)` means the identity layer has no session for this client.
    async fn refresh(&self, refresh_token: Option<&str>) -> Result<Option<IdentitySession>, ApiError>;
}

/// Fetches the session object from the studio's session endpoint.
pub struct HttpSessionSource {
    client: Client,
    url: reqwest::Url,
}

impl HttpSessionSource {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.url(&config.session_path)?,
        })
    }

    /// The endpoint answers `null` or `{}` when there is no session.
    fn parse_session(body: &str) -> Result<Option<IdentitySession>, ApiError> {
        let value: serde_json::Value = if body.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(body)
                .map_err(|e| ApiError::InvalidResponse(format!("Session body is not JSON: {}", e)))?
        };

        match &value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::Object(map) if map.is_empty() => Ok(None),
            _ => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| ApiError::InvalidResponse(format!("Malformed session: {}", e))),
        }
    }
}

#[async_trait]
impl SessionSource for HttpSessionSource {
    async fn refresh(&self, refresh_token: Option<&str>) -> Result<Option<IdentitySession>, ApiError> {
        let mut request = self
            .client
            .get(self.url.clone())
            .header(header::ACCEPT, "application/json")
            .header(header::CACHE_CONTROL, "no-store");
        if let Some(token) = refresh_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ApiError::from_status(status, &body));
        }

        let session = Self::parse_session(&body)?;
        debug!(has_session = session.is_some(), "Session endpoint answered");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> SessionConfig {
        SessionConfig {
            base_url: server.uri(),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_parse_empty_session() {
        assert_eq!(HttpSessionSource::parse_session("null").unwrap(), None);
        assert_eq!(HttpSessionSource::parse_session("{}").unwrap(), None);
        assert_eq!(HttpSessionSource::parse_session("").unwrap(), None);
        assert!(HttpSessionSource::parse_session("{\"user\":{}}").is_err());
    }

    #[tokio::test]
    async fn test_refresh_sends_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/session"))
            .and(header("authorization", "Bearer refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "expires": "2030-01-01T00:00:00Z",
                "accessToken": "access-2",
                "refreshToken": "refresh-2",
                "user": { "name": "Ada", "email": "ada@example.com", "image": null }
            })))
            .mount(&server)
            .await;

        let source = HttpSessionSource::new(&config_for(&server)).unwrap();
        let session = source.refresh(Some("refresh-1")).await.unwrap().unwrap();

        assert_eq!(session.access_token.as_deref(), Some("access-2"));
        assert_eq!(session.to_token_set().refresh_token.as_deref(), Some("refresh-2"));
        assert_eq!(
            session.expires,
            "2030-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(
            session.user.and_then(|u| u.email).as_deref(),
            Some("ada@example.com")
        );
    }

    #[tokio::test]
    async fn test_refresh_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/session"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let source = HttpSessionSource::new(&config_for(&server)).unwrap();
        let result = source.refresh(None).await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }
}
