use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum ErrorKind {
    Network,
    Auth,
    Server,
    TokenExpired,
    Unknown,
}

/// Advisory only: the store never escalates or resolves by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// An error as reported by a caller, before the store assigns identity.
#[derive(Debug, Clone, PartialEq)]
pub struct NewError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub payload: Option<serde_json::Value>,
}

impl NewError {
    pub fn new(kind: ErrorKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub id: String,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub payload: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Immutable snapshot of the error registry and retry ledger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorState {
    pub errors: Vec<ErrorRecord>,
    pub retries: HashMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorAction {
    Add(ErrorRecord),
    Remove(String),
    Clear,
    Acknowledge(String),
    IncrementRetry(String),
    ResetRetry(String),
}

impl ErrorState {
    /// Apply an action, producing the next snapshot.
    pub fn reduce(&self, action: ErrorAction) -> Self {
        let mut next = self.clone();
        match action {
            ErrorAction::Add(record) => next.errors.push(record),
            ErrorAction::Remove(id) => next.errors.retain(|e| e.id != id),
            ErrorAction::Clear => next.errors.clear(),
            ErrorAction::Acknowledge(id) => {
                for record in next.errors.iter_mut().filter(|e| e.id == id) {
                    record.acknowledged = true;
                }
            }
            ErrorAction::IncrementRetry(key) => {
                *next.retries.entry(key).or_insert(0) += 1;
            }
            ErrorAction::ResetRetry(key) => {
                next.retries.remove(&key);
            }
        }
        next
    }

    pub fn retry_count(&self, key: &str) -> u32 {
        self.retries.get(key).copied().unwrap_or(0)
    }

    pub fn by_severity(&self, severity: Severity) -> Vec<ErrorRecord> {
        self.errors
            .iter()
            .filter(|e| e.severity == severity)
            .cloned()
            .collect()
    }

    pub fn unacknowledged(&self) -> Vec<ErrorRecord> {
        self.errors
            .iter()
            .filter(|e| !e.acknowledged)
            .cloned()
            .collect()
    }
}

/// Process-wide error registry, owned by the composition root and shared
/// by `Arc`. All mutation goes through named methods that dispatch actions.
pub struct ErrorStore {
    state: watch::Sender<Arc<ErrorState>>,
    clock: SharedClock,
    max_retries: u32,
    sequence: AtomicU64,
}

impl ErrorStore {
    pub fn new(clock: SharedClock, max_retries: u32) -> Self {
        let (state, _) = watch::channel(Arc::new(ErrorState::default()));
        Self {
            state,
            clock,
            max_retries,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<ErrorState> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ErrorState>> {
        self.state.subscribe()
    }

    fn dispatch(&self, action: ErrorAction) {
        self.state.send_modify(|state| *state = Arc::new(state.reduce(action)));
    }

    /// Record an error and return its id. Identical errors are not merged.
    pub fn add_error(&self, error: NewError) -> String {
        let timestamp = self.clock.now();
        // The sequence keeps ids unique when several errors share a millisecond
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let id = format!("err_{}_{}", timestamp.timestamp_millis(), seq);

        if error.severity >= Severity::High {
            warn!(id = %id, kind = ?error.kind, severity = ?error.severity, message = %error.message, "Error recorded");
        } else {
            debug!(id = %id, kind = ?error.kind, severity = ?error.severity, message = %error.message, "Error recorded");
        }

        self.dispatch(ErrorAction::Add(ErrorRecord {
            id: id.clone(),
            kind: error.kind,
            severity: error.severity,
            message: error.message,
            payload: error.payload,
            timestamp,
            acknowledged: false,
        }));
        id
    }

    pub fn remove_error(&self, id: &str) {
        self.dispatch(ErrorAction::Remove(id.to_string()));
    }

    pub fn clear_errors(&self) {
        self.dispatch(ErrorAction::Clear);
    }

    pub fn acknowledge_error(&self, id: &str) {
        self.dispatch(ErrorAction::Acknowledge(id.to_string()));
    }

    // ===== Retry Ledger =====

    /// Bump the attempt count for `key` and return the new count.
    pub fn increment_retry(&self, key: &str) -> u32 {
        let mut count = 0;
        self.state.send_modify(|state| {
            let next = state.reduce(ErrorAction::IncrementRetry(key.to_string()));
            count = next.retry_count(key);
            *state = Arc::new(next);
        });
        count
    }

    pub fn reset_retry(&self, key: &str) {
        self.dispatch(ErrorAction::ResetRetry(key.to_string()));
    }

    pub fn retry_count(&self, key: &str) -> u32 {
        self.state.borrow().retry_count(key)
    }

    pub fn is_max_retries_reached(&self, key: &str) -> bool {
        self.retry_count(key) >= self.max_retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    // ===== Queries =====

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.state.borrow().errors.clone()
    }

    pub fn errors_by_severity(&self, severity: Severity) -> Vec<ErrorRecord> {
        self.state.borrow().by_severity(severity)
    }

    pub fn unacknowledged_errors(&self) -> Vec<ErrorRecord> {
        self.state.borrow().unacknowledged()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::clock::ManualClock;

    fn store() -> ErrorStore {
        ErrorStore::new(Arc::new(ManualClock::new(Utc::now())), 3)
    }

    #[test]
    fn test_add_then_acknowledge() {
        let store = store();
        let id = store.add_error(NewError::new(ErrorKind::Network, Severity::Low, "offline"));

        let pending = store.unacknowledged_errors();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].kind, ErrorKind::Network);
        assert_eq!(pending[0].severity, Severity::Low);
        assert!(!pending[0].acknowledged);

        store.acknowledge_error(&id);
        assert!(store.unacknowledged_errors().is_empty());
        // Acknowledged records are kept until removed
        assert_eq!(store.errors().len(), 1);
    }

    #[test]
    fn test_ids_unique_within_same_instant() {
        let store = store();
        let ids: HashSet<String> = (0..50)
            .map(|_| store.add_error(NewError::new(ErrorKind::Unknown, Severity::Low, "x")))
            .collect();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn test_no_deduplication() {
        let store = store();
        store.add_error(NewError::new(ErrorKind::Server, Severity::High, "boom"));
        store.add_error(NewError::new(ErrorKind::Server, Severity::High, "boom"));
        assert_eq!(store.errors().len(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let store = store();
        let a = store.add_error(NewError::new(ErrorKind::Auth, Severity::Medium, "a"));
        store.add_error(NewError::new(ErrorKind::Auth, Severity::Medium, "b"));

        store.remove_error(&a);
        let remaining = store.errors();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "b");

        store.clear_errors();
        assert!(store.errors().is_empty());
    }

    #[test]
    fn test_errors_by_severity() {
        let store = store();
        store.add_error(NewError::new(ErrorKind::Network, Severity::Low, "slow"));
        store.add_error(NewError::new(ErrorKind::Server, Severity::Critical, "down"));
        store.add_error(NewError::new(ErrorKind::Auth, Severity::Low, "retry"));

        let low = store.errors_by_severity(Severity::Low);
        assert_eq!(low.len(), 2);
        assert_eq!(store.errors_by_severity(Severity::Critical)[0].message, "down");
        assert!(store.errors_by_severity(Severity::High).is_empty());
    }

    #[test]
    fn test_retry_ledger() {
        let store = store();
        assert!(!store.is_max_retries_reached("GET /api/fonts"));

        assert_eq!(store.increment_retry("GET /api/fonts"), 1);
        assert_eq!(store.increment_retry("GET /api/fonts"), 2);
        assert!(!store.is_max_retries_reached("GET /api/fonts"));
        assert_eq!(store.increment_retry("GET /api/fonts"), 3);
        assert!(store.is_max_retries_reached("GET /api/fonts"));

        // Keys are independent
        assert_eq!(store.retry_count("GET /api/templates"), 0);

        store.reset_retry("GET /api/fonts");
        assert_eq!(store.retry_count("GET /api/fonts"), 0);
        assert!(!store.is_max_retries_reached("GET /api/fonts"));
    }

    #[test]
    fn test_reduce_leaves_previous_snapshot_untouched() {
        let store = store();
        let before = store.snapshot();
        store.add_error(NewError::new(ErrorKind::Unknown, Severity::Low, "x"));
        assert!(before.errors.is_empty());
        assert_eq!(store.snapshot().errors.len(), 1);
    }

    #[test]
    fn test_payload_is_kept() {
        let store = store();
        let id = store.add_error(
            NewError::new(ErrorKind::Server, Severity::High, "502")
                .with_payload(serde_json::json!({ "status": 502 })),
        );
        let record = store.errors().into_iter().find(|e| e.id == id).unwrap();
        assert_eq!(record.payload, Some(serde_json::json!({ "status": 502 })));
    }
}
