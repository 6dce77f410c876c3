//! Authenticated HTTP client for the studio API.
//!
//! Every outbound call goes through [`ApiClient`], which gates on the token
//! manager, attaches the bearer token and feeds each response status to the
//! shared [`AuthInterceptor`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::{header, Client, Method, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{ApiError, AuthInterceptor};
use crate::auth::TokenManager;
use crate::config::SessionConfig;
use crate::errors::{ErrorStore, NewError};

/// Clone is cheap; the reqwest client and all collaborators are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    tokens: TokenManager,
    interceptor: Arc<AuthInterceptor>,
    errors: Arc<ErrorStore>,
    initial_backoff_ms: u64,
}

impl ApiClient {
    pub fn new(
        config: &SessionConfig,
        tokens: TokenManager,
        interceptor: Arc<AuthInterceptor>,
        errors: Arc<ErrorStore>,
    ) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.url("/")?,
            tokens,
            interceptor,
            errors,
            initial_backoff_ms: config.initial_backoff_ms,
        })
    }

    pub fn interceptor(&self) -> &Arc<AuthInterceptor> {
        &self.interceptor
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Unserializable body: {}", e)))?;
        self.execute(Method::POST, path, Some(body)).await
    }

    /// Send one logical operation, retrying rate limits and transport
    /// failures until the retry ledger for `"<METHOD> <path>"` is exhausted.
    ///
    /// The ledger entry is cleared when the operation settles, whether it
    /// succeeded or failed, so the next call starts with a full retry budget.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ApiError> {
        let token = self.tokens.ensure_valid().await?;
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidRequest(format!("Bad path {}: {}", path, e)))?;
        let key = format!("{} {}", method, path);
        let mut backoff_ms = self.initial_backoff_ms;

        loop {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header(header::ACCEPT, "application/json");
            if let Some(ref token) = token {
                request = request.bearer_auth(token);
            }
            if let Some(ref body) = body {
                request = request.json(body);
            }

            let err = match self.send(request).await {
                Ok(response) => match response.json::<T>().await {
                    Ok(value) => {
                        self.errors.reset_retry(&key);
                        return Ok(value);
                    }
                    Err(e) => ApiError::InvalidResponse(format!(
                        "Failed to parse JSON response from {}: {}",
                        path, e
                    )),
                },
                Err(e) => e,
            };

            if err.is_retryable() {
                let attempt = self.errors.increment_retry(&key);
                if !self.errors.is_max_retries_reached(&key) {
                    warn!(operation = %key, retry = attempt, backoff_ms, error = %err, "Request failed, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                    continue;
                }
            }

            self.errors.add_error(
                NewError::new(err.kind(), err.severity(), err.to_string())
                    .with_payload(json!({ "operation": key })),
            );
            self.errors.reset_retry(&key);
            return Err(err);
        }
    }

    /// Send and classify. Every response status passes through the interceptor.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let observation = self.interceptor.observe(status);
        debug!(status = status.as_u16(), ?observation, "Response observed");

        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}
