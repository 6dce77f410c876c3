//! Global app health: connectivity and server status.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::config::SessionConfig;
use crate::errors::{ErrorKind, ErrorStore, NewError, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum ServerStatus {
    Online,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppHealth {
    pub is_offline: bool,
    pub server_status: ServerStatus,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl Default for AppHealth {
    fn default() -> Self {
        Self {
            is_offline: false,
            server_status: ServerStatus::Online,
            last_health_check: None,
        }
    }
}

/// Body of the health endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthPayload {
    pub status: String,
    #[serde(default)]
    pub uptime: f64,
}

/// Holds [`AppHealth`]; only [`HealthTracker::record`] changes it.
pub struct HealthTracker {
    state: watch::Sender<Arc<AppHealth>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Arc::new(AppHealth::default()));
        Self { state }
    }

    pub fn snapshot(&self) -> Arc<AppHealth> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<AppHealth>> {
        self.state.subscribe()
    }

    /// Apply one health-check result.
    pub fn record(&self, status: ServerStatus, at: DateTime<Utc>) -> Arc<AppHealth> {
        let next = Arc::new(AppHealth {
            is_offline: status == ServerStatus::Offline,
            server_status: status,
            last_health_check: Some(at),
        });
        self.state.send_replace(next.clone());
        next
    }
}

pub struct HealthChecker {
    client: Client,
    url: Url,
    tracker: Arc<HealthTracker>,
    errors: Arc<ErrorStore>,
    clock: SharedClock,
}

impl HealthChecker {
    pub fn new(
        config: &SessionConfig,
        tracker: Arc<HealthTracker>,
        errors: Arc<ErrorStore>,
        clock: SharedClock,
    ) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            url: config.url(&config.health_path)?,
            tracker,
            errors,
            clock,
        })
    }

    pub fn tracker(&self) -> &Arc<HealthTracker> {
        &self.tracker
    }

    /// Probe the health endpoint and record the result.
    pub async fn check(&self) -> Arc<AppHealth> {
        let status = match self
            .client
            .get(self.url.clone())
            .header(header::CACHE_CONTROL, "no-store")
            .send()
            .await
        {
            Err(e) => {
                warn!(error = %e, "Health check failed, server unreachable");
                self.errors.add_error(NewError::new(
                    ErrorKind::Network,
                    Severity::Medium,
                    format!("Server unreachable: {}", e),
                ));
                ServerStatus::Offline
            }
            Ok(response) if response.status().is_server_error() => {
                let code = response.status().as_u16();
                warn!(status = code, "Health endpoint reported a server error");
                self.errors.add_error(
                    NewError::new(ErrorKind::Server, Severity::High, "Server health check failed")
                        .with_payload(json!({ "status": code })),
                );
                ServerStatus::Degraded
            }
            Ok(response) if !response.status().is_success() => ServerStatus::Degraded,
            Ok(response) => match response.json::<HealthPayload>().await {
                Ok(payload) if payload.status == "ok" => {
                    debug!(uptime = payload.uptime, "Server healthy");
                    ServerStatus::Online
                }
                Ok(payload) => {
                    debug!(status = %payload.status, "Server reports degraded health");
                    ServerStatus::Degraded
                }
                Err(e) => {
                    debug!(error = %e, "Unreadable health payload");
                    ServerStatus::Degraded
                }
            },
        };

        self.tracker.record(status, self.clock.now())
    }
}
