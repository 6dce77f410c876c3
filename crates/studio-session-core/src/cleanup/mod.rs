//! Stale-session detection and emergency cleanup.
//!
//! Cleanup is the single terminal path of the session lifecycle: it wipes
//! every local session artifact and forces a fresh login. Each step runs in
//! its own failure boundary and the navigation always happens last.

pub mod cookies;
pub mod emergency;
pub mod redirect;
pub mod stale;

pub use cookies::{cookies_to_expire, is_auth_cookie, CookieExpiry, WELL_KNOWN_AUTH_COOKIES};
pub use emergency::{CleanupOutcome, CleanupReport, CleanupStep, EmergencyCleanup};
pub use redirect::{forced_login_url, RedirectReason};
pub use stale::{is_stale, StaleCheck, StaleSessionDetector};
