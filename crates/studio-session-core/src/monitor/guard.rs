use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::{AuthInterceptor, InterceptorSignal};
use crate::auth::{SessionEvent, TokenManager};
use crate::cleanup::{EmergencyCleanup, StaleCheck, StaleSessionDetector};

/// Wires token refresh, stale detection and 401 counting into one mount
/// lifecycle.
///
/// `mount` installs exactly one set of timers and listeners no matter how
/// often it is called; `unmount` (or drop) tears them all down. An in-flight
/// refresh or cleanup is not cancelled.
pub struct SessionGuard {
    detector: Arc<StaleSessionDetector>,
    cleanup: Arc<EmergencyCleanup>,
    interceptor: Arc<AuthInterceptor>,
    tokens: TokenManager,
    interval: Duration,
    tasks: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl SessionGuard {
    pub fn new(
        detector: Arc<StaleSessionDetector>,
        cleanup: Arc<EmergencyCleanup>,
        interceptor: Arc<AuthInterceptor>,
        tokens: TokenManager,
        interval: Duration,
    ) -> Self {
        Self {
            detector,
            cleanup,
            interceptor,
            tokens,
            interval,
            tasks: Mutex::new(None),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.tasks().is_some()
    }

    /// Mount the guard. Returns the result of the immediate stale check, or
    /// `None` if the guard was already mounted.
    pub async fn mount(&self) -> Option<StaleCheck> {
        {
            let mut tasks = self.tasks();
            if tasks.is_some() {
                debug!("Session guard already mounted");
                return None;
            }
            *tasks = Some(Vec::new());
        }

        // Subscribe before the first check so no signal is missed
        let signals = self.interceptor.subscribe();
        let events = self.tokens.subscribe();

        let initial = self.detector.check_for_stale_session().await;

        let handles = vec![
            self.spawn_stale_timer(),
            Self::spawn_signal_listener(signals, self.cleanup.clone()),
            Self::spawn_event_listener(events, self.cleanup.clone()),
        ];

        let mounted = match self.tasks().as_mut() {
            Some(running) => {
                running.extend(handles);
                true
            }
            None => {
                // Unmounted while the initial check ran
                handles.iter().for_each(|handle| handle.abort());
                false
            }
        };
        if mounted {
            self.tokens.initialize();
            info!(interval_secs = self.interval.as_secs(), "Session guard mounted");
        }
        Some(initial)
    }

    pub fn unmount(&self) {
        let Some(handles) = self.tasks().take() else {
            return;
        };
        for handle in handles {
            handle.abort();
        }
        self.tokens.destroy();
        debug!("Session guard unmounted");
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Option<Vec<JoinHandle<()>>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_stale_timer(&self) -> JoinHandle<()> {
        let detector = self.detector.clone();
        let period = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if detector.check_for_stale_session().await.cleanup_performed() {
                    break;
                }
            }
        })
    }

    fn spawn_signal_listener(
        mut signals: broadcast::Receiver<InterceptorSignal>,
        cleanup: Arc<EmergencyCleanup>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(InterceptorSignal::UnauthorizedThreshold { consecutive }) => {
                        warn!(consecutive, "Repeated unauthorized responses, resetting session");
                        cleanup.run().await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Interceptor signals lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_event_listener(
        mut events: broadcast::Receiver<SessionEvent>,
        cleanup: Arc<EmergencyCleanup>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::RefreshExhausted { attempts }) => {
                        warn!(attempts, "Token refresh exhausted, resetting session");
                        cleanup.run().await;
                    }
                    Ok(SessionEvent::Expired) => {
                        warn!("Session expired, resetting session");
                        cleanup.run().await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Session events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock, SharedClock};
    use crate::config::SessionConfig;
    use crate::errors::ErrorStore;
    use crate::platform::{KeyValueStorage, MemoryStorage, OfflineArtifacts};
    use crate::testing::{
        CountingArtifacts, MemoryCookieJar, RecordingNavigator, ScriptedSource, SlowArtifacts,
    };
    use crate::auth::{TokenSet, TokenStore};
    use chrono::{DateTime, Utc};
    use reqwest::StatusCode;

    struct Fixture {
        guard: SessionGuard,
        interceptor: Arc<AuthInterceptor>,
        manager: TokenManager,
        storage: Arc<MemoryStorage>,
        navigator: Arc<RecordingNavigator>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(CountingArtifacts {
            databases: 0,
            workers: 0,
        }))
    }

    fn fixture_with(artifacts: Arc<dyn OfflineArtifacts>) -> Fixture {
        let config = SessionConfig::default();
        let clock = ManualClock::new(Utc::now());
        let shared: SharedClock = Arc::new(clock.clone());
        let storage = Arc::new(MemoryStorage::new());
        let store = Arc::new(
            TokenStore::new(shared.clone(), &config)
                .with_persistence(storage.clone(), config.token_storage_key.clone()),
        );
        let errors = Arc::new(ErrorStore::new(shared.clone(), config.max_retries));
        let manager = TokenManager::new(
            store.clone(),
            errors,
            Arc::new(ScriptedSource::new()),
            shared.clone(),
            &config,
        );
        let navigator = Arc::new(RecordingNavigator::new("localhost"));
        let cleanup = Arc::new(
            EmergencyCleanup::new(
                &config,
                shared.clone(),
                Arc::new(MemoryCookieJar::default()),
                artifacts,
                navigator.clone(),
            )
            .with_storage(storage.clone())
            .with_token_store(store),
        );
        let detector = Arc::new(StaleSessionDetector::new(
            &config,
            storage.clone(),
            shared,
            cleanup.clone(),
        ));
        let interceptor = Arc::new(AuthInterceptor::new(config.unauthorized_threshold));
        let guard = SessionGuard::new(
            detector,
            cleanup,
            interceptor.clone(),
            manager.clone(),
            config.monitor_interval(),
        );
        Fixture {
            guard,
            interceptor,
            manager,
            storage,
            navigator,
            clock,
        }
    }

    /// Write a token snapshot expiring at `at` through the store.
    fn persist_expiry(f: &Fixture, at: DateTime<Utc>) {
        f.manager.store().set_tokens(TokenSet {
            access_token: Some("a".to_string()),
            refresh_token: Some("r".to_string()),
            expires_at: Some(at),
        });
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_runs_stale_check_immediately() {
        let f = fixture();
        persist_expiry(&f, f.clock.now() - chrono::Duration::hours(3));

        let initial = f.guard.mount().await;
        assert!(initial.is_some_and(|check| check.cleanup_performed()));
        assert_eq!(f.navigator.navigations().len(), 1);
        assert!(f.storage.keys().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_is_idempotent() {
        let f = fixture();
        assert_eq!(f.guard.mount().await, Some(StaleCheck::NoAction));
        assert_eq!(f.guard.mount().await, None);
        assert!(f.guard.is_mounted());
        assert!(f.manager.is_initialized());

        f.guard.unmount();
        assert!(!f.guard.is_mounted());
        assert!(!f.manager.is_initialized());

        // Remounting after unmount works again
        assert_eq!(f.guard.mount().await, Some(StaleCheck::NoAction));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_consecutive_unauthorized_trigger_cleanup() {
        let f = fixture();
        f.guard.mount().await;

        for _ in 0..3 {
            f.interceptor.observe(StatusCode::UNAUTHORIZED);
        }
        settle().await;
        assert_eq!(f.navigator.navigations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_success_prevents_cleanup() {
        let f = fixture();
        f.guard.mount().await;

        f.interceptor.observe(StatusCode::UNAUTHORIZED);
        f.interceptor.observe(StatusCode::UNAUTHORIZED);
        f.interceptor.observe(StatusCode::OK);
        f.interceptor.observe(StatusCode::UNAUTHORIZED);
        settle().await;
        assert!(f.navigator.navigations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_stale_check() {
        let f = fixture();
        persist_expiry(&f, f.clock.now() - chrono::Duration::hours(1));
        assert_eq!(f.guard.mount().await, Some(StaleCheck::NoAction));

        f.clock.advance(chrono::Duration::hours(2));
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(f.navigator.navigations().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.navigator.navigations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_exhaustion_triggers_cleanup() {
        let f = fixture();
        f.guard.mount().await;

        for _ in 0..3 {
            let _ = f.manager.refresh_token().await;
        }
        settle().await;
        assert_eq!(f.navigator.navigations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_tears_everything_down() {
        let f = fixture();
        f.guard.mount().await;
        f.guard.unmount();

        persist_expiry(&f, f.clock.now() - chrono::Duration::hours(3));
        for _ in 0..3 {
            f.interceptor.observe(StatusCode::UNAUTHORIZED);
        }
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(f.navigator.navigations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_during_cleanup_still_redirects() {
        let f = fixture_with(Arc::new(SlowArtifacts {
            delay: Duration::from_millis(200),
        }));
        f.storage.set("recent-designs", "[1]").unwrap();
        f.guard.mount().await;

        for _ in 0..3 {
            f.interceptor.observe(StatusCode::UNAUTHORIZED);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(f.navigator.navigations().is_empty());

        f.guard.unmount();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.navigator.navigations().len(), 1);
        assert!(f.storage.keys().unwrap().is_empty());
    }
}
