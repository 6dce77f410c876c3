use std::collections::hash_map::{self, HashMap};
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::debug;

use super::KeyValueStorage;

/// Entry holding the JSON list of keys this storage has written.
/// The keychain cannot be enumerated, so `clear` relies on it.
const INDEX_KEY: &str = "__keys";

/// Key-value storage in the OS keychain.
///
/// One [`Entry`] is kept per key, so every operation on a key goes through
/// the same credential handle.
pub struct KeyringStorage {
    service: String,
    entries: Mutex<HashMap<String, Entry>>,
}

impl KeyringStorage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Run `op` against the cached entry for `key`, creating it on first use.
    fn with_entry<T>(
        &self,
        key: &str,
        op: impl FnOnce(&Entry) -> keyring::Result<T>,
    ) -> Result<keyring::Result<T>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = match entries.entry(key.to_string()) {
            hash_map::Entry::Occupied(slot) => slot.into_mut(),
            hash_map::Entry::Vacant(slot) => slot.insert(
                Entry::new(&self.service, key).context("Failed to create keyring entry")?,
            ),
        };
        Ok(op(entry))
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        match self.with_entry(key, |entry| entry.get_password())? {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read from keychain"),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.with_entry(key, |entry| entry.delete_credential())? {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.with_entry(key, |entry| entry.set_password(value))?
            .context("Failed to store value in keychain")
    }

    fn write_index(&self, keys: &[String]) -> Result<()> {
        let contents = serde_json::to_string(keys)?;
        self.write(INDEX_KEY, &contents)
            .context("Failed to store keychain index")
    }
}

impl KeyValueStorage for KeyringStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.read(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write(key, value)?;

        let mut keys = self.keys()?;
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
            self.write_index(&keys)?;
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.delete(key)?;
        let mut keys = self.keys()?;
        let before = keys.len();
        keys.retain(|k| k != key);
        if keys.len() != before {
            self.write_index(&keys)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        match self.read(INDEX_KEY)? {
            Some(contents) => {
                serde_json::from_str(&contents).context("Failed to parse keychain index")
            }
            None => Ok(Vec::new()),
        }
    }

    fn clear(&self) -> Result<()> {
        let keys = self.keys()?;
        debug!(service = %self.service, count = keys.len(), "Clearing keychain entries");
        for key in &keys {
            self.delete(key)?;
        }
        self.delete(INDEX_KEY)
    }
}
