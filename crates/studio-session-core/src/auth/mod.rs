//! Authentication token lifecycle.
//!
//! This module provides:
//! - `TokenStore`: the current access/refresh token pair, its expiry and
//!   refresh bookkeeping, plus the user's session activity record
//! - `TokenManager`: proactive refresh with a single in-flight request and the
//!   derived session status (active / expiring / expired)
//! - `IdentitySession` / `SessionSource`: the identity layer's session object
//!   and how a fresh one is fetched
//!
//! Token snapshots are persisted under a well-known storage key so a later
//! run can detect sessions that were never cleaned up.

pub mod error;
pub mod manager;
pub mod persist;
pub mod session;
pub mod store;

pub use error::RefreshError;
pub use manager::{RefreshOutcome, SessionEvent, SessionState, SessionStatus, TokenManager};
pub use persist::{PersistedEnvelope, PersistedTokenState};
pub use session::{HttpSessionSource, IdentitySession, SessionSource, SessionUser};
pub use store::{SessionActivity, TokenAction, TokenSet, TokenState, TokenStore};
