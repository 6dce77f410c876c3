use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CookieJar;
use crate::cleanup::CookieExpiry;
use crate::clock::SharedClock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    /// `None` for host-only cookies
    pub domain: Option<String>,
    pub path: String,
    pub expires: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|at| at <= now).unwrap_or(false)
    }

    /// Whether an expiry write targets this cookie's scope.
    fn matches(&self, expiry: &CookieExpiry) -> bool {
        if self.name != expiry.name || self.path != expiry.path {
            return false;
        }
        match (&self.domain, &expiry.domain) {
            (None, None) => true,
            (Some(ours), Some(theirs)) => {
                ours.trim_start_matches('.') == theirs.trim_start_matches('.')
            }
            _ => false,
        }
    }
}

/// Cookie jar persisted as a JSON array. Expired cookies are dropped on write.
pub struct FileCookieJar {
    path: PathBuf,
    clock: SharedClock,
    cookies: Mutex<Vec<StoredCookie>>,
}

impl FileCookieJar {
    pub fn open(path: PathBuf, clock: SharedClock) -> Result<Self> {
        let cookies = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read cookie file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse cookie file")?
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            clock,
            cookies: Mutex::new(cookies),
        })
    }

    /// Store a cookie, replacing one with the same name and scope.
    pub fn insert(&self, cookie: StoredCookie) -> Result<()> {
        let mut cookies = self.cookies();
        cookies.retain(|c| {
            !(c.name == cookie.name && c.path == cookie.path && c.domain == cookie.domain)
        });
        cookies.push(cookie);
        self.flush(&mut cookies)
    }

    fn flush(&self, cookies: &mut Vec<StoredCookie>) -> Result<()> {
        let now = self.clock.now();
        cookies.retain(|c| !c.is_expired(now));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(cookies)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write cookie file {}", self.path.display()))?;
        Ok(())
    }

    fn cookies(&self) -> std::sync::MutexGuard<'_, Vec<StoredCookie>> {
        self.cookies.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CookieJar for FileCookieJar {
    fn names(&self) -> Result<Vec<String>> {
        let now = self.clock.now();
        let mut names: Vec<String> = self
            .cookies()
            .iter()
            .filter(|c| !c.is_expired(now))
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn apply(&self, expiry: &CookieExpiry) -> Result<()> {
        let mut cookies = self.cookies();
        let mut touched = false;
        for cookie in cookies.iter_mut().filter(|c| c.matches(expiry)) {
            cookie.expires = Some(expiry.expires);
            touched = true;
        }
        if touched {
            self.flush(&mut cookies)?;
        }
        Ok(())
    }
}
