//! Host platform seams.
//!
//! The coordinator never touches storage, cookies, offline artifacts or
//! navigation directly; it goes through these traits so the same logic runs
//! against a browser bridge, the CLI host, or in-memory test doubles.
//!
//! Host implementations:
//! - `MemoryStorage`: session-scoped key-value storage
//! - `FileStorage`: JSON-file key-value storage under the data directory
//! - `KeyringStorage`: OS keychain key-value storage
//! - `FileCookieJar`: JSON cookie jar
//! - `CacheDirArtifacts`: cache directory databases and worker pid files
//! - `TerminalNavigator`: prints the forced-login URL

use anyhow::Result;
use async_trait::async_trait;

use crate::cleanup::CookieExpiry;

pub mod artifacts;
pub mod cookie_jar;
pub mod file;
pub mod keychain;
pub mod memory;
pub mod navigator;

pub use artifacts::CacheDirArtifacts;
pub use cookie_jar::{FileCookieJar, StoredCookie};
pub use file::FileStorage;
pub use keychain::KeyringStorage;
pub use memory::MemoryStorage;
pub use navigator::TerminalNavigator;

/// String key-value persistence (local storage, session storage, keychain).
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
    /// Remove every entry, not just known keys.
    fn clear(&self) -> Result<()>;
}

/// Script-visible cookie access.
pub trait CookieJar: Send + Sync {
    /// Names of all cookies currently visible.
    fn names(&self) -> Result<Vec<String>>;
    /// Perform a single expiry write.
    fn apply(&self, expiry: &CookieExpiry) -> Result<()>;
}

/// Structured local databases and background workers.
#[async_trait]
pub trait OfflineArtifacts: Send + Sync {
    /// Returns the number of databases deleted.
    async fn delete_databases(&self) -> Result<usize>;
    /// Returns the number of workers unregistered.
    async fn unregister_workers(&self) -> Result<usize>;
}

pub trait Navigator: Send + Sync {
    /// Host of the current location, without port.
    fn host(&self) -> String;
    /// Navigate without leaving a history entry.
    fn replace(&self, url: &str) -> Result<()>;
}
