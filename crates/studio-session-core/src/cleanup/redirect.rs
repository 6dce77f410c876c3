use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectReason {
    /// Every essential cleanup step succeeded.
    Cleanup,
    /// Some essential step failed; the redirect still happens.
    Fallback,
}

impl RedirectReason {
    fn marker(self) -> &'static str {
        match self {
            RedirectReason::Cleanup => "cleanup",
            RedirectReason::Fallback => "fallback",
        }
    }
}

/// Login entry point carrying the forced-fresh markers and a cache-busting
/// timestamp.
pub fn forced_login_url(config: &SessionConfig, reason: RedirectReason, now: DateTime<Utc>) -> String {
    let timestamp = now.timestamp_millis().to_string();
    match config.url(&config.login_path) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("force_fresh", "true")
                .append_pair(reason.marker(), "true")
                .append_pair("timestamp", &timestamp);
            url.to_string()
        }
        Err(e) => {
            // Still navigate somewhere
            warn!(error = %e, "Could not build login URL, using relative path");
            format!(
                "{}?force_fresh=true&{}=true&timestamp={}",
                config.login_path,
                reason.marker(),
                timestamp
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_login_url() {
        let config = SessionConfig::default();
        let now = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();

        assert_eq!(
            forced_login_url(&config, RedirectReason::Cleanup, now),
            "http://localhost:3000/login?force_fresh=true&cleanup=true&timestamp=1700000000123"
        );
        assert_eq!(
            forced_login_url(&config, RedirectReason::Fallback, now),
            "http://localhost:3000/login?force_fresh=true&fallback=true&timestamp=1700000000123"
        );
    }

    #[test]
    fn test_forced_login_url_with_bad_base() {
        let config = SessionConfig {
            base_url: "not a url".to_string(),
            ..SessionConfig::default()
        };
        let now = DateTime::from_timestamp_millis(5).unwrap();
        assert_eq!(
            forced_login_url(&config, RedirectReason::Fallback, now),
            "/login?force_fresh=true&fallback=true&timestamp=5"
        );
    }
}
