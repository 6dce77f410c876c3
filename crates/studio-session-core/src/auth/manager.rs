//! Proactive token refresh and derived session status.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::error::RefreshError;
use super::session::{IdentitySession, SessionSource};
use super::store::{TokenSet, TokenStore};
use crate::api::ApiError;
use crate::clock::SharedClock;
use crate::config::SessionConfig;
use crate::errors::{ErrorKind, ErrorStore, NewError, Severity};

/// Buffer size for session event broadcasts.
const EVENT_CAPACITY: usize = 16;

pub type RefreshOutcome = Result<TokenSet, RefreshError>;

type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionState {
    Active,
    Expiring,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionStatus {
    pub status: SessionState,
    /// Milliseconds until expiry, never negative
    pub time_left: i64,
}

impl SessionStatus {
    /// Classify an expiry against `now`. No expiry means there is no usable session.
    pub fn classify(
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        expiring_window: Duration,
    ) -> Self {
        let Some(expires_at) = expires_at else {
            return Self {
                status: SessionState::Expired,
                time_left: 0,
            };
        };

        let remaining = expires_at - now;
        let status = if remaining <= Duration::zero() {
            SessionState::Expired
        } else if remaining <= expiring_window {
            SessionState::Expiring
        } else {
            SessionState::Active
        };

        Self {
            status,
            time_left: remaining.num_milliseconds().max(0),
        }
    }

    pub fn time_left(&self) -> Duration {
        Duration::milliseconds(self.time_left)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Refreshed { expires_at: Option<DateTime<Utc>> },
    RefreshFailed { attempts: u32 },
    /// The caller must run emergency cleanup.
    RefreshExhausted { attempts: u32 },
    /// A protected operation found the session expired.
    Expired,
}

struct Inner {
    store: Arc<TokenStore>,
    errors: Arc<ErrorStore>,
    source: Arc<dyn SessionSource>,
    clock: SharedClock,
    expiring_window: Duration,
    check_interval: StdDuration,
    events: broadcast::Sender<SessionEvent>,
    inflight: Mutex<Option<PendingRefresh>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Orchestrates refreshes against the [`TokenStore`].
///
/// Cheap to clone; clones share the same in-flight refresh and timer.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    pub fn new(
        store: Arc<TokenStore>,
        errors: Arc<ErrorStore>,
        source: Arc<dyn SessionSource>,
        clock: SharedClock,
        config: &SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                errors,
                source,
                clock,
                expiring_window: config.expiring_window(),
                check_interval: config.token_check_interval(),
                events,
                inflight: Mutex::new(None),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.inner.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine; events are advisory
        let _ = self.inner.events.send(event);
    }

    // =========================================================================
    // Session object translation
    // =========================================================================

    /// Mirror the identity layer's session into the token store.
    pub fn sync_session(&self, session: Option<&IdentitySession>) {
        let current = self.inner.store.snapshot().tokens();
        match session {
            Some(session) => {
                let tokens = session.to_token_set();
                if tokens != current {
                    self.inner.store.set_tokens(tokens);
                }
            }
            None => {
                if current != TokenSet::default() {
                    info!("Identity session ended, clearing tokens");
                    self.inner.store.clear_tokens();
                }
            }
        }
    }

    pub fn get_session_status(&self) -> SessionStatus {
        SessionStatus::classify(
            self.inner.store.snapshot().expires_at,
            self.inner.clock.now(),
            self.inner.expiring_window,
        )
    }

    /// Gate for protected operations: the access token if the session is
    /// still usable, or a recorded `TOKEN_EXPIRED` failure.
    pub async fn ensure_valid(&self) -> Result<Option<String>, ApiError> {
        let store = &self.inner.store;
        // Joins a refresh already in flight
        if store.is_token_expiring_soon() && !store.is_token_expired() {
            if let Err(e) = self.refresh_token().await {
                debug!(error = %e, "Proactive refresh before request failed");
            }
        }

        let status = self.get_session_status();
        if status.status == SessionState::Expired {
            self.inner.errors.add_error(NewError::new(
                ErrorKind::TokenExpired,
                Severity::High,
                "Session expired",
            ));
            self.emit(SessionEvent::Expired);
            return Err(ApiError::TokenExpired);
        }

        Ok(store.snapshot().access_token.clone())
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Refresh the session. Concurrent callers join the refresh already in
    /// flight instead of starting another one, and all see its outcome.
    ///
    /// The refresh runs on its own task: dropping this future, or calling
    /// [`destroy`](Self::destroy) while it is pending, never leaves the store
    /// stuck in the refreshing state.
    pub async fn refresh_token(&self) -> RefreshOutcome {
        let pending = {
            let mut slot = self
                .inner
                .inflight
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(pending) => {
                    debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    let task = tokio::spawn({
                        let manager = self.clone();
                        async move { manager.run_refresh().await }
                    });
                    let manager = self.clone();
                    let pending = async move {
                        match task.await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                warn!(error = %e, "Token refresh task failed");
                                manager.finish_refresh();
                                Err(RefreshError::Failed {
                                    attempts: manager.inner.store.snapshot().refresh_attempts,
                                    message: format!("refresh task failed: {}", e),
                                })
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    async fn run_refresh(&self) -> RefreshOutcome {
        let store = &self.inner.store;
        store.set_refreshing(true);
        let refresh_token = store.snapshot().refresh_token.clone();

        let outcome = match self.inner.source.refresh(refresh_token.as_deref()).await {
            Ok(Some(session)) => {
                let tokens = session.to_token_set();
                store.set_tokens(tokens.clone());
                info!(expires_at = %session.expires, "Token refreshed");
                self.emit(SessionEvent::Refreshed {
                    expires_at: tokens.expires_at,
                });
                Ok(tokens)
            }
            Ok(None) => self.record_failure(ErrorKind::Auth, "no active session".to_string()),
            Err(e) => self.record_failure(e.kind(), e.to_string()),
        };

        self.finish_refresh();
        outcome
    }

    fn finish_refresh(&self) {
        self.inner.store.set_refreshing(false);
        *self
            .inner
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn record_failure(&self, kind: ErrorKind, message: String) -> RefreshOutcome {
        let store = &self.inner.store;
        let attempts = store.increment_refresh_attempts();
        let max_attempts = store.snapshot().max_refresh_attempts;

        self.inner.errors.add_error(
            NewError::new(kind, Severity::Medium, format!("Token refresh failed: {}", message))
                .with_payload(json!({ "attempts": attempts, "maxAttempts": max_attempts })),
        );

        if attempts >= max_attempts {
            warn!(attempts, "Token refresh attempts exhausted");
            store.clear_tokens();
            self.emit(SessionEvent::RefreshExhausted { attempts });
            Err(RefreshError::Exhausted { attempts })
        } else {
            warn!(attempts, max_attempts, error = %message, "Token refresh failed");
            self.emit(SessionEvent::RefreshFailed { attempts });
            Err(RefreshError::Failed { attempts, message })
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the expiry polling timer. Calling again while it runs is a no-op.
    pub fn initialize(&self) {
        let mut timer = self.inner.timer.lock().unwrap_or_else(|e| e.into_inner());
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Token manager already initialized");
            return;
        }

        let manager = self.clone();
        let period = self.inner.check_interval;
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.check_expiry().await;
            }
        }));
        debug!(period_secs = period.as_secs(), "Token manager initialized");
    }

    /// Stop the polling timer. An in-flight refresh is left to finish.
    pub fn destroy(&self) {
        if let Some(handle) = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
            debug!("Token manager destroyed");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn check_expiry(&self) {
        let snapshot = self.inner.store.snapshot();
        if snapshot.expires_at.is_none() || snapshot.is_refreshing {
            return;
        }
        if self.inner.store.is_token_expiring_soon() {
            debug!(
                time_left_secs = self.inner.store.time_until_expiration().num_seconds(),
                "Token expiring soon, refreshing"
            );
            if let Err(e) = self.refresh_token().await {
                debug!(error = %e, "Scheduled refresh failed");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
