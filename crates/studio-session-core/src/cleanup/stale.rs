use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::emergency::{CleanupOutcome, EmergencyCleanup};
use crate::auth::PersistedEnvelope;
use crate::clock::SharedClock;
use crate::config::SessionConfig;
use crate::platform::KeyValueStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleCheck {
    NoAction,
    CleanupPerformed(CleanupOutcome),
}

impl StaleCheck {
    pub fn cleanup_performed(&self) -> bool {
        matches!(self, StaleCheck::CleanupPerformed(_))
    }
}

/// A persisted expiry is stale once it lies more than `threshold` in the past.
pub fn is_stale(expires_at: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> bool {
    now - expires_at > threshold
}

/// Looks for a persisted session that expired long ago and was never cleared.
pub struct StaleSessionDetector {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    threshold: Duration,
    clock: SharedClock,
    cleanup: Arc<EmergencyCleanup>,
}

impl StaleSessionDetector {
    pub fn new(
        config: &SessionConfig,
        storage: Arc<dyn KeyValueStorage>,
        clock: SharedClock,
        cleanup: Arc<EmergencyCleanup>,
    ) -> Self {
        Self {
            storage,
            key: config.token_storage_key.clone(),
            threshold: config.stale_threshold(),
            clock,
            cleanup,
        }
    }

    /// The persisted expiry, if the snapshot holds one. Unreadable snapshots count as absent.
    pub fn persisted_expiry(&self) -> Option<DateTime<Utc>> {
        let contents = match self.storage.get(&self.key) {
            Ok(Some(contents)) => contents,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, key = %self.key, "Failed to read persisted session");
                return None;
            }
        };
        match PersistedEnvelope::parse(&contents) {
            Ok(envelope) => envelope.state.token_expires_at,
            Err(e) => {
                warn!(error = %e, key = %self.key, "Ignoring unparsable persisted session");
                None
            }
        }
    }

    /// Classification only; never runs cleanup.
    pub fn is_stale_now(&self) -> bool {
        self.persisted_expiry()
            .is_some_and(|at| is_stale(at, self.clock.now(), self.threshold))
    }

    pub async fn check_for_stale_session(&self) -> StaleCheck {
        let Some(expires_at) = self.persisted_expiry() else {
            return StaleCheck::NoAction;
        };
        let now = self.clock.now();
        if !is_stale(expires_at, now, self.threshold) {
            return StaleCheck::NoAction;
        }

        warn!(
            expired_mins_ago = (now - expires_at).num_minutes(),
            "Stale session detected"
        );
        let outcome = self.cleanup.run().await;
        debug!(?outcome, "Stale session cleanup done");
        StaleCheck::CleanupPerformed(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::platform::MemoryStorage;
    use crate::testing::{CountingArtifacts, MemoryCookieJar, RecordingNavigator};

    struct Fixture {
        detector: StaleSessionDetector,
        storage: Arc<MemoryStorage>,
        navigator: Arc<RecordingNavigator>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let config = SessionConfig::default();
        let clock = ManualClock::new(Utc::now());
        let shared: SharedClock = Arc::new(clock.clone());
        let storage = Arc::new(MemoryStorage::new());
        let navigator = Arc::new(RecordingNavigator::new("localhost"));
        let cleanup = Arc::new(
            EmergencyCleanup::new(
                &config,
                shared.clone(),
                Arc::new(MemoryCookieJar::default()),
                Arc::new(CountingArtifacts {
                    databases: 0,
                    workers: 0,
                }),
                navigator.clone(),
            )
            .with_storage(storage.clone()),
        );
        let detector = StaleSessionDetector::new(&config, storage.clone(), shared, cleanup);
        Fixture {
            detector,
            storage,
            navigator,
            clock,
        }
    }

    fn persist_expiry(storage: &MemoryStorage, at: DateTime<Utc>) {
        let contents = format!(
            r#"{{"state":{{"accessToken":"a","tokenExpiresAt":{}}},"version":0}}"#,
            at.timestamp_millis()
        );
        storage.set("auth-token-storage", &contents).unwrap();
    }

    #[test]
    fn test_is_stale_is_strict() {
        let now = Utc::now();
        let threshold = Duration::hours(2);
        assert!(is_stale(now - Duration::hours(3), now, threshold));
        assert!(!is_stale(now - Duration::hours(2), now, threshold));
        assert!(!is_stale(now - Duration::hours(1), now, threshold));
        assert!(!is_stale(now + Duration::hours(1), now, threshold));
    }

    #[tokio::test]
    async fn test_three_hours_old_triggers_cleanup() {
        let f = fixture();
        persist_expiry(&f.storage, f.clock.now() - Duration::hours(3));

        assert!(f.detector.is_stale_now());
        let result = f.detector.check_for_stale_session().await;
        assert!(result.cleanup_performed());
        assert_eq!(f.navigator.navigations().len(), 1);
        assert_eq!(f.storage.get("auth-token-storage").unwrap(), None);
    }

    #[tokio::test]
    async fn test_one_hour_old_is_left_alone() {
        let f = fixture();
        persist_expiry(&f.storage, f.clock.now() - Duration::hours(1));

        assert_eq!(f.detector.check_for_stale_session().await, StaleCheck::NoAction);
        assert!(f.navigator.navigations().is_empty());
        assert!(f.storage.get("auth-token-storage").unwrap().is_some());

        // The same snapshot goes stale as time passes
        f.clock.advance(Duration::hours(2));
        assert!(f.detector.check_for_stale_session().await.cleanup_performed());
    }

    #[tokio::test]
    async fn test_missing_or_garbled_snapshot_is_no_action() {
        let f = fixture();
        assert_eq!(f.detector.check_for_stale_session().await, StaleCheck::NoAction);

        f.storage.set("auth-token-storage", "not json").unwrap();
        assert_eq!(f.detector.check_for_stale_session().await, StaleCheck::NoAction);

        f.storage
            .set("auth-token-storage", r#"{"state":{"tokenExpiresAt":null},"version":0}"#)
            .unwrap();
        assert_eq!(f.detector.check_for_stale_session().await, StaleCheck::NoAction);
        assert!(f.navigator.navigations().is_empty());
    }
}
