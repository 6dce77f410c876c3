//! Client-side session and token lifecycle coordination for the design studio.
//!
//! The crate decides when a user's authentication is valid, expiring, stale or
//! broken beyond repair, and drives the recovery: proactive refresh, warning
//! countdown, and as a last resort a full wipe of local session state followed
//! by a forced login.
//!
//! Everything is built once by [`SessionContext`] and injected from there.
//! Host resources (storage, cookies, offline databases, navigation) are reached
//! only through the traits in [`platform`].

pub mod api;
pub mod auth;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod context;
pub mod errors;
pub mod health;
pub mod monitor;
pub mod platform;
pub mod utils;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ApiError, AuthInterceptor};
pub use auth::{
    IdentitySession, RefreshError, SessionEvent, SessionState, SessionStatus, TokenManager,
    TokenSet, TokenStore,
};
pub use cleanup::{CleanupOutcome, EmergencyCleanup, StaleCheck, StaleSessionDetector};
pub use clock::{Clock, SharedClock, SystemClock};
pub use config::SessionConfig;
pub use context::{SessionContext, SessionContextBuilder};
pub use errors::{ErrorKind, ErrorStore, Severity};
pub use health::{AppHealth, HealthChecker, HealthTracker, ServerStatus};
pub use monitor::{SessionGuard, SessionStatusWidget, WidgetView};
