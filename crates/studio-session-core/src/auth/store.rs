use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::persist::{PersistedEnvelope, PersistedTokenState};
use crate::clock::SharedClock;
use crate::config::SessionConfig;
use crate::platform::KeyValueStorage;

/// The token triple replaced atomically by `set_tokens`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionActivity {
    pub last_activity: DateTime<Utc>,
    pub session_warning_shown: bool,
    pub auto_save_enabled: bool,
}

/// Immutable snapshot of the token record.
///
/// `is_refreshing` is only true while a refresh call is in flight.
/// `refresh_attempts` returns to 0 whenever tokens are set or a refresh succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_refreshing: bool,
    pub refresh_attempts: u32,
    pub max_refresh_attempts: u32,
    pub activity: SessionActivity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenAction {
    SetTokens(TokenSet),
    ClearTokens,
    SetRefreshing(bool),
    IncrementRefreshAttempts,
    ResetRefreshAttempts,
    RecordActivity(DateTime<Utc>),
    SetWarningShown(bool),
    SetAutoSave(bool),
}

impl TokenState {
    pub fn empty(max_refresh_attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            expires_at: None,
            is_refreshing: false,
            refresh_attempts: 0,
            max_refresh_attempts,
            activity: SessionActivity {
                last_activity: now,
                session_warning_shown: false,
                auto_save_enabled: true,
            },
        }
    }

    /// Apply an action, producing the next snapshot.
    pub fn reduce(&self, action: TokenAction) -> Self {
        let mut next = self.clone();
        match action {
            TokenAction::SetTokens(tokens) => {
                next.access_token = tokens.access_token;
                next.refresh_token = tokens.refresh_token;
                next.expires_at = tokens.expires_at;
                next.refresh_attempts = 0;
                next.activity.session_warning_shown = false;
            }
            TokenAction::ClearTokens => {
                next.access_token = None;
                next.refresh_token = None;
                next.expires_at = None;
                next.is_refreshing = false;
                next.refresh_attempts = 0;
                next.activity.session_warning_shown = false;
            }
            TokenAction::SetRefreshing(refreshing) => next.is_refreshing = refreshing,
            TokenAction::IncrementRefreshAttempts => next.refresh_attempts += 1,
            TokenAction::ResetRefreshAttempts => next.refresh_attempts = 0,
            TokenAction::RecordActivity(at) => next.activity.last_activity = at,
            TokenAction::SetWarningShown(shown) => next.activity.session_warning_shown = shown,
            TokenAction::SetAutoSave(enabled) => next.activity.auto_save_enabled = enabled,
        }
        next
    }

    pub fn tokens(&self) -> TokenSet {
        TokenSet {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
        }
    }

    /// True once `now + buffer` reaches the expiry. A missing expiry counts as expired.
    pub fn is_expiring_soon(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        match self.expires_at {
            Some(at) => now + buffer >= at,
            None => true,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    pub fn time_until_expiration(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at
            .map(|at| (at - now).max(Duration::zero()))
            .unwrap_or_else(Duration::zero)
    }

    fn to_persisted(&self) -> PersistedEnvelope {
        PersistedEnvelope {
            state: PersistedTokenState {
                access_token: self.access_token.clone(),
                refresh_token: self.refresh_token.clone(),
                token_expires_at: self.expires_at,
                last_activity: Some(self.activity.last_activity),
                auto_save_enabled: Some(self.activity.auto_save_enabled),
            },
            version: 0,
        }
    }
}

struct Persistence {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
}

/// Holder of the current token record.
///
/// Reads are synchronous snapshots; no operation blocks. Every change goes
/// through a [`TokenAction`] and replaces the snapshot wholesale.
pub struct TokenStore {
    state: watch::Sender<Arc<TokenState>>,
    clock: SharedClock,
    refresh_buffer: Duration,
    persistence: Option<Persistence>,
}

impl TokenStore {
    pub fn new(clock: SharedClock, config: &SessionConfig) -> Self {
        let (state, _) = watch::channel(Arc::new(TokenState::empty(
            config.max_refresh_attempts,
            clock.now(),
        )));
        Self {
            state,
            clock,
            refresh_buffer: config.refresh_buffer(),
            persistence: None,
        }
    }

    /// Write a snapshot to `storage` under `key` after every token or activity change.
    pub fn with_persistence(mut self, storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> Self {
        self.persistence = Some(Persistence {
            storage,
            key: key.into(),
        });
        self
    }

    /// Rehydrate from the persisted snapshot. Returns false when there is none.
    pub fn restore(&self) -> Result<bool> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };
        let Some(contents) = persistence.storage.get(&persistence.key)? else {
            return Ok(false);
        };
        let envelope =
            PersistedEnvelope::parse(&contents).context("Failed to parse token snapshot")?;

        let saved = envelope.state;
        self.state.send_modify(|state| {
            let mut next = state.reduce(TokenAction::SetTokens(TokenSet {
                access_token: saved.access_token,
                refresh_token: saved.refresh_token,
                expires_at: saved.token_expires_at,
            }));
            if let Some(at) = saved.last_activity {
                next = next.reduce(TokenAction::RecordActivity(at));
            }
            if let Some(enabled) = saved.auto_save_enabled {
                next = next.reduce(TokenAction::SetAutoSave(enabled));
            }
            *state = Arc::new(next);
        });
        debug!(expires_at = ?self.snapshot().expires_at, "Token store restored");
        Ok(true)
    }

    pub fn snapshot(&self) -> Arc<TokenState> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<TokenState>> {
        self.state.subscribe()
    }

    fn dispatch(&self, action: TokenAction) -> Arc<TokenState> {
        let persist = matches!(
            action,
            TokenAction::SetTokens(_)
                | TokenAction::ClearTokens
                | TokenAction::RecordActivity(_)
                | TokenAction::SetAutoSave(_)
        );

        let mut snapshot = None;
        self.state.send_modify(|state| {
            let next = Arc::new(state.reduce(action));
            snapshot = Some(next.clone());
            *state = next;
        });
        let snapshot = snapshot.unwrap_or_else(|| self.snapshot());

        if persist {
            self.persist(&snapshot);
        }
        snapshot
    }

    fn persist(&self, state: &TokenState) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let result = serde_json::to_string(&state.to_persisted())
            .context("Failed to serialize token snapshot")
            .and_then(|contents| persistence.storage.set(&persistence.key, &contents));
        if let Err(e) = result {
            warn!(error = %e, key = %persistence.key, "Failed to persist token snapshot");
        }
    }

    // ===== Setters =====

    pub fn set_tokens(&self, tokens: TokenSet) {
        debug!(expires_at = ?tokens.expires_at, "Tokens set");
        self.dispatch(TokenAction::SetTokens(tokens));
    }

    pub fn clear_tokens(&self) {
        debug!("Tokens cleared");
        self.dispatch(TokenAction::ClearTokens);
    }

    pub fn set_refreshing(&self, refreshing: bool) {
        self.dispatch(TokenAction::SetRefreshing(refreshing));
    }

    /// Returns the post-increment attempt count.
    pub fn increment_refresh_attempts(&self) -> u32 {
        self.dispatch(TokenAction::IncrementRefreshAttempts)
            .refresh_attempts
    }

    pub fn reset_refresh_attempts(&self) {
        self.dispatch(TokenAction::ResetRefreshAttempts);
    }

    pub fn record_activity(&self) {
        self.dispatch(TokenAction::RecordActivity(self.clock.now()));
    }

    pub fn set_warning_shown(&self, shown: bool) {
        self.dispatch(TokenAction::SetWarningShown(shown));
    }

    pub fn set_auto_save(&self, enabled: bool) {
        self.dispatch(TokenAction::SetAutoSave(enabled));
    }

    // ===== Derived reads =====

    pub fn is_token_expiring_soon(&self) -> bool {
        self.snapshot()
            .is_expiring_soon(self.clock.now(), self.refresh_buffer)
    }

    pub fn is_token_expired(&self) -> bool {
        self.snapshot().is_expired(self.clock.now())
    }

    pub fn time_until_expiration(&self) -> Duration {
        self.snapshot().time_until_expiration(self.clock.now())
    }

    pub fn time_since_activity(&self) -> Duration {
        self.clock.now() - self.snapshot().activity.last_activity
    }
}

// ============================================================================
// Tests
// ============================================================================
