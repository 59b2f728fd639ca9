//! Application configuration management.
//!
//! Handles loading, saving, and validating visor configuration including:
//! - Emergency contact and automatic emergency-call opt-in
//! - Crash countdown length, tick period, and follow-up delays
//! - Transport write-size budget and bridge endpoint
//! - Timezone used for human-readable alert timestamps

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VisorError};
use crate::protocol::DEFAULT_MAX_WRITE_LEN;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisorConfig {
    /// Address of the paired sensor unit, if configured.
    pub device_address: Option<String>,

    /// Endpoint of the transport bridge the daemon connects to.
    pub bridge_addr: String,

    /// Phone number of the emergency contact, if configured.
    pub emergency_contact: Option<String>,

    /// Emergency services number for automatic dialing.
    pub emergency_number: String,

    /// Whether to automatically call emergency services after a crash
    /// alert proceeds.
    pub auto_call_emergency: bool,

    /// Crash countdown length in ticks.
    pub countdown_ticks: u8,

    /// Countdown tick period in milliseconds. The cue loop runs at half
    /// this period.
    pub tick_period_ms: u64,

    /// Delay before the emergency contact is notified after an alert
    /// proceeds, in milliseconds.
    pub contact_delay_ms: u64,

    /// Further delay before emergency services are dialed, in
    /// milliseconds.
    pub auto_call_delay_ms: u64,

    /// Maximum single-write size of the transport, in bytes.
    pub max_write_len: usize,

    /// Timezone for human-readable timestamps in emergency messages.
    #[serde(with = "timezone_serde")]
    pub timezone: Tz,
}

impl Default for VisorConfig {
    fn default() -> Self {
        Self {
            device_address: None,
            bridge_addr: "127.0.0.1:9670".to_string(),
            emergency_contact: None,
            emergency_number: "911".to_string(),
            auto_call_emergency: false,
            countdown_ticks: crate::crash::DEFAULT_COUNTDOWN_TICKS,
            tick_period_ms: 1000,
            contact_delay_ms: 2000,
            auto_call_delay_ms: 5000,
            max_write_len: DEFAULT_MAX_WRITE_LEN,
            timezone: chrono_tz::UTC,
        }
    }
}

impl VisorConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| VisorError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`, creating parent directories as
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| VisorError::ConfigParse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The default configuration file path.
    ///
    /// On Linux deployments: `/etc/visor/config.toml`; elsewhere the
    /// platform config directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/visor/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "visor").map_or_else(
                || PathBuf::from("visor-config.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }

    /// Check the configuration for invalid values.
    ///
    /// # Errors
    ///
    /// Returns [`VisorError::ConfigValidation`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.countdown_ticks == 0 {
            return Err(VisorError::ConfigValidation {
                field: "countdown_ticks",
                message: "must be at least 1".to_string(),
            });
        }
        if self.tick_period_ms == 0 {
            return Err(VisorError::ConfigValidation {
                field: "tick_period_ms",
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_write_len == 0 {
            return Err(VisorError::ConfigValidation {
                field: "max_write_len",
                message: "must be at least 1".to_string(),
            });
        }
        if self.auto_call_emergency && self.emergency_number.trim().is_empty() {
            return Err(VisorError::ConfigValidation {
                field: "emergency_number",
                message: "required when auto_call_emergency is enabled".to_string(),
            });
        }
        if matches!(&self.emergency_contact, Some(phone) if phone.trim().is_empty()) {
            return Err(VisorError::ConfigValidation {
                field: "emergency_contact",
                message: "must not be empty when set".to_string(),
            });
        }
        Ok(())
    }

    /// The countdown tick period.
    #[must_use]
    pub const fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    /// The cue pulse period: half the tick period.
    #[must_use]
    pub const fn cue_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms / 2)
    }

    /// Delay before the emergency contact is notified.
    #[must_use]
    pub const fn contact_delay(&self) -> Duration {
        Duration::from_millis(self.contact_delay_ms)
    }

    /// Further delay before emergency services are dialed.
    #[must_use]
    pub const fn auto_call_delay(&self) -> Duration {
        Duration::from_millis(self.auto_call_delay_ms)
    }
}

mod timezone_serde {
    use chrono_tz::Tz;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(tz.name())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Tz, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.countdown_ticks, 10);
        assert_eq!(config.max_write_len, 20);
        assert_eq!(config.cue_period(), Duration::from_millis(500));
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = VisorConfig::default();
        config.emergency_contact = Some("+15551234567".to_string());
        config.auto_call_emergency = true;
        config.timezone = chrono_tz::America::Los_Angeles;
        config.save(&path).unwrap();

        let loaded = VisorConfig::load(&path).unwrap();
        assert_eq!(loaded.emergency_contact, config.emergency_contact);
        assert!(loaded.auto_call_emergency);
        assert_eq!(loaded.timezone, chrono_tz::America::Los_Angeles);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = VisorConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.countdown_ticks, 10);
    }

    #[test]
    fn test_zero_countdown_is_rejected() {
        let config = VisorConfig {
            countdown_ticks: 0,
            ..VisorConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_auto_call_requires_number() {
        let config = VisorConfig {
            auto_call_emergency: true,
            emergency_number: "  ".to_string(),
            ..VisorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_contact_is_rejected() {
        let config = VisorConfig {
            emergency_contact: Some(String::new()),
            ..VisorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "countdown_ticks = \"ten\"").unwrap();
        let err = VisorConfig::load(&path).unwrap_err();
        assert!(err.is_config_error());
    }
}
