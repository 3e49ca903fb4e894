use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ─── Constants ────────────────────────────────────────────────────

/// Default heartbeat period. Kept well below any "assume dead" threshold
/// an observer of the presence record might apply.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Default delay between identity resolution attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Key prefix under which presence records live.
pub const DEFAULT_KEY_PREFIX: &str = "presence/";

/// Reserved key reflecting this client's live connection to the backend.
pub const CONNECTED_KEY: &str = ".info/connected";

// ─── Identity ─────────────────────────────────────────────────────

/// Opaque, stable user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Build an identifier, rejecting blank values.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Presence Record ──────────────────────────────────────────────

/// The value stored at `presence/<user id>`.
///
/// `updated_at` is epoch milliseconds. It is advisory for readers; the
/// client never uses it for conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub online: bool,
    pub updated_at: i64,
}

impl PresenceRecord {
    pub fn online(updated_at: i64) -> Self {
        Self {
            online: true,
            updated_at,
        }
    }

    pub fn offline(updated_at: i64) -> Self {
        Self {
            online: false,
            updated_at,
        }
    }

    /// Encode as the JSON value written to the store.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "online": self.online,
            "updated_at": self.updated_at,
        })
    }

    /// Decode a stored value. Returns `None` for anything not shaped like a record.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

// ─── Connection State ─────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Reachable,
    #[default]
    Unreachable,
}

impl ConnectionState {
    /// Interpret the value at the connection key. Only a literal `true`
    /// counts as reachable; a missing or malformed value does not.
    pub fn from_value(value: Option<&serde_json::Value>) -> Self {
        match value {
            Some(serde_json::Value::Bool(true)) => Self::Reachable,
            _ => Self::Unreachable,
        }
    }

    pub fn is_reachable(self) -> bool {
        self == Self::Reachable
    }
}

// ─── Configuration ────────────────────────────────────────────────

/// Tunables for the presence subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceConfig {
    pub heartbeat_interval: Duration,
    pub retry_interval: Duration,
    pub key_prefix: String,
    pub connected_key: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            connected_key: CONNECTED_KEY.to_owned(),
        }
    }
}

impl PresenceConfig {
    /// Store key holding the presence record for `user`.
    pub fn presence_key(&self, user: &UserId) -> String {
        format!("{}{}", self.key_prefix, user.as_str())
    }

    /// Reject configurations that would spin or collide with the connection key.
    pub fn validate(&self) -> Result<(), PresenceError> {
        if self.heartbeat_interval.is_zero() {
            return Err(PresenceError::InvalidConfig(
                "heartbeat interval must be non-zero".to_owned(),
            ));
        }
        if self.retry_interval.is_zero() {
            return Err(PresenceError::InvalidConfig(
                "retry interval must be non-zero".to_owned(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(PresenceError::InvalidConfig(
                "key prefix must be non-empty".to_owned(),
            ));
        }
        if self.connected_key.is_empty() || self.connected_key.starts_with(&self.key_prefix) {
            return Err(PresenceError::InvalidConfig(format!(
                "connection key {:?} overlaps presence keys",
                self.connected_key
            )));
        }
        Ok(())
    }
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    #[error("unknown lifecycle signal: {0}")]
    UnknownSignal(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_rejects_blank() {
        assert!(UserId::new("").is_none());
        assert!(UserId::new("   ").is_none());
        assert_eq!(UserId::new("u-1").map(|u| u.to_string()), Some("u-1".into()));
    }

    #[test]
    fn record_wire_shape() {
        let value = PresenceRecord::online(1_700_000_000_000).to_value();
        assert_eq!(
            value,
            serde_json::json!({"online": true, "updated_at": 1_700_000_000_000_i64})
        );
        assert_eq!(
            PresenceRecord::from_value(&value),
            Some(PresenceRecord::online(1_700_000_000_000))
        );
    }

    #[test]
    fn record_from_foreign_value_is_none() {
        assert_eq!(PresenceRecord::from_value(&serde_json::json!("online")), None);
        assert_eq!(
            PresenceRecord::from_value(&serde_json::json!({"online": "yes"})),
            None
        );
    }

    #[test]
    fn connection_state_only_true_is_reachable() {
        let t = serde_json::Value::Bool(true);
        let f = serde_json::Value::Bool(false);
        let s = serde_json::json!("true");
        assert_eq!(ConnectionState::from_value(Some(&t)), ConnectionState::Reachable);
        assert_eq!(ConnectionState::from_value(Some(&f)), ConnectionState::Unreachable);
        assert_eq!(ConnectionState::from_value(Some(&s)), ConnectionState::Unreachable);
        assert_eq!(ConnectionState::from_value(None), ConnectionState::Unreachable);
    }

    #[test]
    fn presence_key_uses_prefix() {
        let config = PresenceConfig::default();
        let user = UserId::new("abc").expect("valid id");
        assert_eq!(config.presence_key(&user), "presence/abc");
    }

    #[test]
    fn default_config_is_valid() {
        let config = PresenceConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.retry_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_intervals_rejected() {
        let config = PresenceConfig {
            heartbeat_interval: Duration::ZERO,
            ..PresenceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PresenceError::InvalidConfig(_))
        ));

        let config = PresenceConfig {
            retry_interval: Duration::ZERO,
            ..PresenceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn connection_key_inside_presence_space_rejected() {
        let config = PresenceConfig {
            connected_key: "presence/.info".to_owned(),
            ..PresenceConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
