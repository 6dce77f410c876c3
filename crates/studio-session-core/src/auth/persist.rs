use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted token snapshot: `{ "state": { ... }, "version": 0 }`.
/// Instants are epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedEnvelope {
    pub state: PersistedTokenState,
    #[serde(default)]
    pub version: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTokenState {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub token_expires_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_save_enabled: Option<bool>,
}

impl PersistedEnvelope {
    pub fn parse(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_minimal_snapshot() {
        let envelope = PersistedEnvelope::parse(r#"{"state":{"tokenExpiresAt":1700000000000}}"#)
            .expect("Failed to parse snapshot");
        assert_eq!(
            envelope.state.token_expires_at,
            Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
        );
        assert_eq!(envelope.state.access_token, None);
        assert_eq!(envelope.version, 0);
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let envelope = PersistedEnvelope::parse(
            r#"{"state":{"tokenExpiresAt":null,"isRefreshing":true,"extra":1},"version":2}"#,
        )
        .expect("Failed to parse snapshot");
        assert_eq!(envelope.state.token_expires_at, None);
        assert_eq!(envelope.version, 2);
    }

    #[test]
    fn test_serialized_shape() {
        let envelope = PersistedEnvelope {
            state: PersistedTokenState {
                token_expires_at: Some(Utc.timestamp_millis_opt(1_000).unwrap()),
                ..Default::default()
            },
            version: 0,
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["state"]["tokenExpiresAt"], 1000);
    }
}
