use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::cookies::{cookies_to_expire, expiry_writes};
use super::redirect::{forced_login_url, RedirectReason};
use crate::auth::TokenStore;
use crate::clock::SharedClock;
use crate::config::SessionConfig;
use crate::platform::{CookieJar, KeyValueStorage, Navigator, OfflineArtifacts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    Storage,
    Cookies,
    Databases,
    Workers,
    Navigation,
}

impl CleanupStep {
    /// A failed essential step turns the redirect into a fallback redirect.
    pub fn is_essential(self) -> bool {
        matches!(self, CleanupStep::Storage | CleanupStep::Cookies)
    }

    fn name(self) -> &'static str {
        match self {
            CleanupStep::Storage => "storage",
            CleanupStep::Cookies => "cookies",
            CleanupStep::Databases => "databases",
            CleanupStep::Workers => "workers",
            CleanupStep::Navigation => "navigation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Where the navigator was sent
    pub url: String,
    pub fallback: bool,
    pub storages_cleared: usize,
    pub cookies_expired: usize,
    pub databases_deleted: usize,
    pub workers_unregistered: usize,
    pub failed_steps: Vec<CleanupStep>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Redirected(CleanupReport),
    /// Another cleanup already owns the redirect.
    AlreadyInProgress,
}

/// The steps of one cleanup, owned by the task that runs them.
#[derive(Clone)]
struct CleanupPlan {
    config: SessionConfig,
    clock: SharedClock,
    storages: Vec<Arc<dyn KeyValueStorage>>,
    cookies: Arc<dyn CookieJar>,
    artifacts: Arc<dyn OfflineArtifacts>,
    navigator: Arc<dyn Navigator>,
    tokens: Option<Arc<TokenStore>>,
}

impl CleanupPlan {
    async fn execute(self) -> CleanupReport {
        let mut failed_steps = Vec::new();
        let mut fail = |step: CleanupStep, e: &anyhow::Error| {
            warn!(error = %e, step = step.name(), "Cleanup step failed, continuing");
            if !failed_steps.contains(&step) {
                failed_steps.push(step);
            }
        };

        if let Some(tokens) = &self.tokens {
            tokens.clear_tokens();
        }

        let mut storages_cleared = 0;
        for storage in &self.storages {
            match storage.clear() {
                Ok(()) => storages_cleared += 1,
                Err(e) => fail(CleanupStep::Storage, &e),
            }
        }

        let cookies_expired = match self.expire_cookies() {
            Ok(count) => count,
            Err((count, e)) => {
                fail(CleanupStep::Cookies, &e);
                count
            }
        };

        let databases_deleted = match self.artifacts.delete_databases().await {
            Ok(count) => count,
            Err(e) => {
                fail(CleanupStep::Databases, &e);
                0
            }
        };

        let workers_unregistered = match self.artifacts.unregister_workers().await {
            Ok(count) => count,
            Err(e) => {
                fail(CleanupStep::Workers, &e);
                0
            }
        };

        let fallback = failed_steps.iter().any(|step| step.is_essential());
        let reason = if fallback {
            RedirectReason::Fallback
        } else {
            RedirectReason::Cleanup
        };
        let url = self.navigate(reason, &mut failed_steps);

        info!(
            fallback,
            storages_cleared,
            cookies_expired,
            databases_deleted,
            workers_unregistered,
            "Emergency auth cleanup finished"
        );
        CleanupReport {
            url,
            fallback,
            storages_cleared,
            cookies_expired,
            databases_deleted,
            workers_unregistered,
            failed_steps,
        }
    }

    fn navigate(&self, reason: RedirectReason, failed_steps: &mut Vec<CleanupStep>) -> String {
        let url = forced_login_url(&self.config, reason, self.clock.now());
        if let Err(e) = self.navigator.replace(&url) {
            error!(error = %e, url = %url, "Forced navigation failed");
            failed_steps.push(CleanupStep::Navigation);
        }
        url
    }

    /// Expire observed auth cookies plus the well-known names at every scope.
    /// Keeps going past failures; the error carries how many names were fully expired.
    fn expire_cookies(&self) -> Result<usize, (usize, anyhow::Error)> {
        let mut first_error = None;
        let observed = match self.cookies.names() {
            Ok(names) => names,
            Err(e) => {
                first_error = Some(e);
                Vec::new()
            }
        };

        let host = self.navigator.host();
        let mut expired = 0;
        for name in cookies_to_expire(&observed) {
            let mut ok = true;
            for write in expiry_writes(&name, &host) {
                if let Err(e) = self.cookies.apply(&write) {
                    ok = false;
                    first_error.get_or_insert(e);
                }
            }
            if ok {
                expired += 1;
            }
        }

        match first_error {
            Some(e) => Err((expired, e)),
            None => Ok(expired),
        }
    }
}

/// Destroys every local session artifact, then forces a fresh login.
///
/// Never fails: each step logs and continues, and navigation always runs.
/// Only the first call does any work; later calls return
/// [`CleanupOutcome::AlreadyInProgress`].
///
/// The steps run on their own task, so dropping the future returned by
/// [`run`](Self::run) (or aborting the task polling it) does not stop a
/// cleanup that has already claimed the latch.
pub struct EmergencyCleanup {
    plan: CleanupPlan,
    in_progress: AtomicBool,
    completed: Arc<watch::Sender<bool>>,
}

impl EmergencyCleanup {
    pub fn new(
        config: &SessionConfig,
        clock: SharedClock,
        cookies: Arc<dyn CookieJar>,
        artifacts: Arc<dyn OfflineArtifacts>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            plan: CleanupPlan {
                config: config.clone(),
                clock,
                storages: Vec::new(),
                cookies,
                artifacts,
                navigator,
                tokens: None,
            },
            in_progress: AtomicBool::new(false),
            completed: Arc::new(watch::channel(false).0),
        }
    }

    /// Add a storage to wipe in full.
    pub fn with_storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.plan.storages.push(storage);
        self
    }

    /// Clear this store's in-memory tokens before wiping storage.
    pub fn with_token_store(mut self, tokens: Arc<TokenStore>) -> Self {
        self.plan.tokens = Some(tokens);
        self
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Flips to `true` once the forced navigation has been attempted.
    pub fn completion(&self) -> watch::Receiver<bool> {
        self.completed.subscribe()
    }

    pub async fn run(&self) -> CleanupOutcome {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            debug!("Emergency cleanup already in progress");
            return CleanupOutcome::AlreadyInProgress;
        }
        warn!("Emergency auth cleanup started");

        let plan = self.plan.clone();
        let completed = self.completed.clone();
        let task = tokio::spawn(async move {
            let report = plan.execute().await;
            completed.send_replace(true);
            report
        });

        match task.await {
            Ok(report) => CleanupOutcome::Redirected(report),
            Err(e) => {
                error!(error = %e, "Cleanup task failed, forcing fallback login");
                let mut failed_steps = Vec::new();
                let url = self
                    .plan
                    .navigate(RedirectReason::Fallback, &mut failed_steps);
                self.completed.send_replace(true);
                CleanupOutcome::Redirected(CleanupReport {
                    url,
                    fallback: true,
                    storages_cleared: 0,
                    cookies_expired: 0,
                    databases_deleted: 0,
                    workers_unregistered: 0,
                    failed_steps,
                })
            }
        }
    }
}
