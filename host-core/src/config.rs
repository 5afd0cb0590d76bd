//! Host configuration, loaded from a JSON file like the relay's game config.
//!
//! Every field has a default, so a file only needs to name what differs:
//!
//! ```text
//! { "display_name": "Friday match", "password": "abc" }
//! ```

use crate::admission::hash_password;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Period of the announcement loop.
pub const DEFAULT_TICK_PERIOD_SECS: f64 = 6.0;
/// A player is disconnected after `grace_factor` ticks without heartbeat.
pub const DEFAULT_GRACE_FACTOR: f64 = 1.5;
/// 48 hours of six second ticks.
pub const DEFAULT_MAX_TICKS: u64 = 28_800;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// The name the session is listed with.
    pub display_name: String,
    /// Plain text password, only its hash is ever compared or sent.
    pub password: Option<String>,
    pub rule_set: String,
    pub tick_period_secs: f64,
    pub grace_factor: f64,
    /// After that many ticks the session counts as abandoned and stops announcing.
    pub max_ticks: u64,
    /// Buffer of the local notification channel.
    pub notification_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            display_name: "Hosted match".to_string(),
            password: None,
            rule_set: "standard".to_string(),
            tick_period_secs: DEFAULT_TICK_PERIOD_SECS,
            grace_factor: DEFAULT_GRACE_FACTOR,
            max_ticks: DEFAULT_MAX_TICKS,
            notification_capacity: protocol::CHANNEL_BUFFER_SIZE,
        }
    }
}

impl HostConfig {
    /// Reads and validates a config file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json_content = fs::read_to_string(path).await?;
        Self::from_json(&json_content)
    }

    pub fn from_json(json_content: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = serde_json::from_str(json_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_period_secs.is_finite() && self.tick_period_secs > 0.0) {
            return Err(ConfigError::Invalid {
                field: "tick_period_secs",
                reason: format!("{} is not a positive number", self.tick_period_secs),
            });
        }
        if !(self.grace_factor.is_finite() && self.grace_factor >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "grace_factor",
                reason: format!("{} must be at least 1", self.grace_factor),
            });
        }
        if self.max_ticks == 0 {
            return Err(ConfigError::Invalid {
                field: "max_ticks",
                reason: "must not be 0".to_string(),
            });
        }
        if self.notification_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "notification_capacity",
                reason: "must not be 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::try_from_secs_f64(self.tick_period_secs)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TICK_PERIOD_SECS))
    }

    /// How long a player may stay silent before counting as disconnected.
    pub fn disconnect_threshold(&self) -> Duration {
        self.tick_period().mul_f64(self.grace_factor.max(1.0))
    }

    pub fn password_hash(&self) -> Option<String> {
        self.password.as_deref().map(hash_password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reference_values() {
        let config = HostConfig::default();
        assert_eq!(config.tick_period(), Duration::from_secs(6));
        assert_eq!(config.disconnect_threshold(), Duration::from_secs(9));
        assert_eq!(config.max_ticks, 28_800);
        assert!(config.password_hash().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            HostConfig::from_json(r#"{ "display_name": "Friday", "password": "abc" }"#).unwrap();
        assert_eq!(config.display_name, "Friday");
        assert_eq!(config.password_hash(), Some(hash_password("abc")));
        assert_eq!(config.tick_period_secs, DEFAULT_TICK_PERIOD_SECS);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            HostConfig::from_json(r#"{ "tick_period_secs": 0 }"#),
            Err(ConfigError::Invalid {
                field: "tick_period_secs",
                ..
            })
        ));
        assert!(matches!(
            HostConfig::from_json(r#"{ "grace_factor": 0.5 }"#),
            Err(ConfigError::Invalid {
                field: "grace_factor",
                ..
            })
        ));
        assert!(matches!(
            HostConfig::from_json("not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[tokio::test]
    async fn load_reads_file() {
        let path = std::env::temp_dir().join(format!("host-config-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, r#"{ "rule_set": "advanced", "max_ticks": 10 }"#)
            .await
            .unwrap();
        let config = HostConfig::load(&path).await.unwrap();
        assert_eq!(config.rule_set, "advanced");
        assert_eq!(config.max_ticks, 10);
        fs::remove_file(&path).await.unwrap();

        assert!(matches!(
            HostConfig::load(&path).await,
            Err(ConfigError::Io(_))
        ));
    }
}
