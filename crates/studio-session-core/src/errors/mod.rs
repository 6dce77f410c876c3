//! Registry of user-facing failures.
//!
//! This module provides:
//! - `ErrorStore`: severity-tagged error records and the per-key retry ledger
//! - `ErrorKind` / `Severity`: the failure taxonomy shared with the API client
//!
//! Records live for the process only; nothing here is persisted.

pub mod store;

pub use store::{ErrorAction, ErrorKind, ErrorRecord, ErrorState, ErrorStore, NewError, Severity};
