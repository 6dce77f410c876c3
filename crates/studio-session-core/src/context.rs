//! Composition root: builds every store and service once and wires them together.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};

use crate::api::{ApiClient, AuthInterceptor};
use crate::auth::{HttpSessionSource, SessionSource, TokenManager, TokenStore};
use crate::cleanup::{EmergencyCleanup, StaleSessionDetector};
use crate::clock::{SharedClock, SystemClock};
use crate::config::SessionConfig;
use crate::errors::ErrorStore;
use crate::health::{HealthChecker, HealthTracker};
use crate::monitor::{SessionGuard, SessionStatusWidget};
use crate::platform::{CookieJar, KeyValueStorage, MemoryStorage, Navigator, OfflineArtifacts};

pub struct SessionContextBuilder {
    config: SessionConfig,
    clock: Option<SharedClock>,
    local_storage: Option<Arc<dyn KeyValueStorage>>,
    session_storage: Option<Arc<dyn KeyValueStorage>>,
    extra_storages: Vec<Arc<dyn KeyValueStorage>>,
    cookies: Option<Arc<dyn CookieJar>>,
    artifacts: Option<Arc<dyn OfflineArtifacts>>,
    navigator: Option<Arc<dyn Navigator>>,
    session_source: Option<Arc<dyn SessionSource>>,
}

impl SessionContextBuilder {
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Long-lived storage; holds the persisted token snapshot.
    pub fn local_storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.local_storage = Some(storage);
        self
    }

    pub fn session_storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.session_storage = Some(storage);
        self
    }

    /// Any other store emergency cleanup must wipe.
    pub fn extra_storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.extra_storages.push(storage);
        self
    }

    pub fn cookies(mut self, cookies: Arc<dyn CookieJar>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    pub fn artifacts(mut self, artifacts: Arc<dyn OfflineArtifacts>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn session_source(mut self, source: Arc<dyn SessionSource>) -> Self {
        self.session_source = Some(source);
        self
    }

    pub fn build(self) -> Result<SessionContext> {
        let config = self.config;
        config.validate().context("Invalid session configuration")?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let local = self
            .local_storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let session = self
            .session_storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let cookies = self.cookies.ok_or_else(|| anyhow!("A cookie jar is required"))?;
        let artifacts = self
            .artifacts
            .ok_or_else(|| anyhow!("An offline artifact host is required"))?;
        let navigator = self.navigator.ok_or_else(|| anyhow!("A navigator is required"))?;
        let source = match self.session_source {
            Some(source) => source,
            None => Arc::new(HttpSessionSource::new(&config)?),
        };

        let token_store = Arc::new(
            TokenStore::new(clock.clone(), &config)
                .with_persistence(local.clone(), config.token_storage_key.clone()),
        );
        match token_store.restore() {
            Ok(true) => debug!("Restored persisted token snapshot"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Could not restore persisted tokens, starting empty"),
        }

        let errors = Arc::new(ErrorStore::new(clock.clone(), config.max_retries));
        let tokens = TokenManager::new(
            token_store.clone(),
            errors.clone(),
            source,
            clock.clone(),
            &config,
        );
        let interceptor = Arc::new(AuthInterceptor::new(config.unauthorized_threshold));

        let mut cleanup = EmergencyCleanup::new(&config, clock.clone(), cookies, artifacts, navigator)
            .with_storage(local.clone())
            .with_storage(session)
            .with_token_store(token_store.clone());
        for storage in self.extra_storages {
            cleanup = cleanup.with_storage(storage);
        }
        let cleanup = Arc::new(cleanup);

        let detector = Arc::new(StaleSessionDetector::new(
            &config,
            local,
            clock.clone(),
            cleanup.clone(),
        ));
        let guard = SessionGuard::new(
            detector.clone(),
            cleanup.clone(),
            interceptor.clone(),
            tokens.clone(),
            config.monitor_interval(),
        );
        let widget = Arc::new(SessionStatusWidget::new(
            tokens.clone(),
            config.expiring_window(),
            config.widget_interval(),
        ));
        let api = ApiClient::new(&config, tokens.clone(), interceptor.clone(), errors.clone())?;
        let health = HealthChecker::new(
            &config,
            Arc::new(HealthTracker::new()),
            errors.clone(),
            clock.clone(),
        )?;

        Ok(SessionContext {
            config,
            clock,
            token_store,
            errors,
            tokens,
            interceptor,
            cleanup,
            detector,
            guard,
            widget,
            api,
            health,
        })
    }
}

/// Every session service, built once and shared by reference.
pub struct SessionContext {
    config: SessionConfig,
    clock: SharedClock,
    token_store: Arc<TokenStore>,
    errors: Arc<ErrorStore>,
    tokens: TokenManager,
    interceptor: Arc<AuthInterceptor>,
    cleanup: Arc<EmergencyCleanup>,
    detector: Arc<StaleSessionDetector>,
    guard: SessionGuard,
    widget: Arc<SessionStatusWidget>,
    api: ApiClient,
    health: HealthChecker,
}

impl SessionContext {
    pub fn builder(config: SessionConfig) -> SessionContextBuilder {
        SessionContextBuilder {
            config,
            clock: None,
            local_storage: None,
            session_storage: None,
            extra_storages: Vec::new(),
            cookies: None,
            artifacts: None,
            navigator: None,
            session_source: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.token_store
    }

    pub fn errors(&self) -> &Arc<ErrorStore> {
        &self.errors
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn interceptor(&self) -> &Arc<AuthInterceptor> {
        &self.interceptor
    }

    pub fn cleanup(&self) -> &Arc<EmergencyCleanup> {
        &self.cleanup
    }

    pub fn detector(&self) -> &Arc<StaleSessionDetector> {
        &self.detector
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    pub fn widget(&self) -> &Arc<SessionStatusWidget> {
        &self.widget
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    /// Mount the guard and start the widget.
    pub async fn mount(&self) {
        self.guard.mount().await;
        self.widget.start();
    }

    pub fn unmount(&self) {
        self.widget.stop();
        self.guard.unmount();
    }
}
