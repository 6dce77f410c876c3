use std::sync::Mutex;

use anyhow::Result;
use tracing::info;

use super::Navigator;

/// Navigator for terminal hosts: there is no page to replace, so the target
/// is reported to the operator and remembered.
pub struct TerminalNavigator {
    host: String,
    last: Mutex<Option<String>>,
}

impl TerminalNavigator {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            last: Mutex::new(None),
        }
    }

    /// The most recent navigation target, if any.
    pub fn last_navigation(&self) -> Option<String> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Navigator for TerminalNavigator {
    fn host(&self) -> String {
        self.host.clone()
    }

    fn replace(&self, url: &str) -> Result<()> {
        info!(url = %url, "Forcing re-authentication");
        eprintln!("Session reset. Sign in again at: {}", url);
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(url.to_string());
        Ok(())
    }
}
