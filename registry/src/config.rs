//! Registry configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Seconds an owned companion stays dormant after dying.
    pub respawn_delay_secs: i64,
    /// Ticks between drains of the pending re-check set.
    pub recheck_interval_ticks: u64,
    /// Ticks between flushes of queued client pushes.
    pub sync_interval_ticks: u64,
    /// Ticks between scans for elapsed respawn timers.
    pub respawn_check_interval_ticks: u64,
    /// A live actor within this many blocks of the requester is re-targeted
    /// instead of teleported.
    pub near_distance: f64,
    /// Horizontal search radius, in blocks, for a safe placement.
    pub placement_radius: i32,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            respawn_delay_secs: 30,
            recheck_interval_ticks: 25,
            sync_interval_ticks: 1,
            respawn_check_interval_ticks: 20,
            near_distance: 16.0,
            placement_radius: 4,
        }
    }
}

impl CompanionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.respawn_delay_secs < 0 {
            return Err(ConfigError::Invalid("respawn_delay_secs must not be negative".into()));
        }
        for (name, value) in [
            ("recheck_interval_ticks", self.recheck_interval_ticks),
            ("sync_interval_ticks", self.sync_interval_ticks),
            ("respawn_check_interval_ticks", self.respawn_check_interval_ticks),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be at least 1", name)));
            }
        }
        if !(self.near_distance > 0.0) {
            return Err(ConfigError::Invalid("near_distance must be positive".into()));
        }
        if self.placement_radius < 0 {
            return Err(ConfigError::Invalid("placement_radius must not be negative".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CompanionConfig::from_json_str(r#"{ "respawn_delay_secs": 60 }"#).unwrap();
        assert_eq!(config.respawn_delay_secs, 60);
        assert_eq!(config.recheck_interval_ticks, 25);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = CompanionConfig::from_json_str(r#"{ "sync_interval_ticks": 0 }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
