//! Host doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::api::ApiError;
use crate::auth::{IdentitySession, SessionSource};
use crate::cleanup::CookieExpiry;
use crate::platform::{CookieJar, KeyValueStorage, Navigator, OfflineArtifacts};

/// Session source answering from a script; an empty script answers 401.
#[derive(Default)]
pub struct ScriptedSource {
    responses: Mutex<VecDeque<Result<Option<IdentitySession>, ApiError>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_session(&self, session: IdentitySession) {
        self.responses.lock().unwrap().push_back(Ok(Some(session)));
    }

    pub fn push_none(&self) {
        self.responses.lock().unwrap().push_back(Ok(None));
    }

    pub fn push_error(&self, error: ApiError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionSource for ScriptedSource {
    async fn refresh(&self, _refresh_token: Option<&str>) -> Result<Option<IdentitySession>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or(Err(ApiError::Unauthorized))
    }
}

pub struct RecordingNavigator {
    host: String,
    navigations: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNavigator {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            navigations: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Records the target, then reports failure.
    pub fn failing(host: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(host)
        }
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn host(&self) -> String {
        self.host.clone()
    }

    fn replace(&self, url: &str) -> Result<()> {
        self.navigations.lock().unwrap().push(url.to_string());
        if self.fail {
            return Err(anyhow!("navigation blocked"));
        }
        Ok(())
    }
}

/// Cookie jar that keeps a name list and records every expiry write.
#[derive(Default)]
pub struct MemoryCookieJar {
    names: Mutex<Vec<String>>,
    writes: Mutex<Vec<CookieExpiry>>,
}

impl MemoryCookieJar {
    pub fn with_names(names: &[&str]) -> Self {
        Self {
            names: Mutex::new(names.iter().map(|n| n.to_string()).collect()),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn writes(&self) -> Vec<CookieExpiry> {
        self.writes.lock().unwrap().clone()
    }
}

impl CookieJar for MemoryCookieJar {
    fn names(&self) -> Result<Vec<String>> {
        Ok(self.names.lock().unwrap().clone())
    }

    fn apply(&self, expiry: &CookieExpiry) -> Result<()> {
        self.names.lock().unwrap().retain(|n| *n != expiry.name);
        self.writes.lock().unwrap().push(expiry.clone());
        Ok(())
    }
}

pub struct CountingArtifacts {
    pub databases: usize,
    pub workers: usize,
}

#[async_trait]
impl OfflineArtifacts for CountingArtifacts {
    async fn delete_databases(&self) -> Result<usize> {
        Ok(self.databases)
    }

    async fn unregister_workers(&self) -> Result<usize> {
        Ok(self.workers)
    }
}

/// Artifacts whose database deletion takes `delay` to finish.
pub struct SlowArtifacts {
    pub delay: Duration,
}

#[async_trait]
impl OfflineArtifacts for SlowArtifacts {
    async fn delete_databases(&self) -> Result<usize> {
        tokio::time::sleep(self.delay).await;
        Ok(1)
    }

    async fn unregister_workers(&self) -> Result<usize> {
        Ok(0)
    }
}

pub struct FailingStorage;

impl KeyValueStorage for FailingStorage {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(anyhow!("storage unavailable"))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(anyhow!("storage unavailable"))
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Err(anyhow!("storage unavailable"))
    }

    fn keys(&self) -> Result<Vec<String>> {
        Err(anyhow!("storage unavailable"))
    }

    fn clear(&self) -> Result<()> {
        Err(anyhow!("storage unavailable"))
    }
}

pub struct FailingCookieJar;

impl CookieJar for FailingCookieJar {
    fn names(&self) -> Result<Vec<String>> {
        Err(anyhow!("cookies unavailable"))
    }

    fn apply(&self, _expiry: &CookieExpiry) -> Result<()> {
        Err(anyhow!("cookies unavailable"))
    }
}

pub struct FailingArtifacts;

#[async_trait]
impl OfflineArtifacts for FailingArtifacts {
    async fn delete_databases(&self) -> Result<usize> {
        Err(anyhow!("database deletion blocked"))
    }

    async fn unregister_workers(&self) -> Result<usize> {
        Err(anyhow!("worker registry unavailable"))
    }
}
