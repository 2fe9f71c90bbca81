//! Engine settings.
//!
//! Sources, later ones overriding earlier ones: built-in defaults, an
//! optional TOML file, then `ROSTER_SYNC__*` environment variables
//! (`ROSTER_SYNC__REQUEST_TIMEOUT_MS`, `ROSTER_SYNC__LOGGING__LEVEL`, ...).

use crate::logging::normalize_level;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "ROSTER_SYNC";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Deadline for one backend request before it is rolled back.
    pub request_timeout_ms: u64,
    /// Number of recent change-event fingerprints kept for de-duplication.
    pub dedupe_window: usize,
    /// Maximum events read from the backend per `changes_since` call.
    pub feed_batch_size: usize,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// Absolute log directory; `None` leaves file logging off.
    pub dir: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            dedupe_window: 4096,
            feed_batch_size: 256,
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            dir: None,
        }
    }
}

impl SyncSettings {
    /// Loads and validates settings from defaults, `path` and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.request_timeout_ms == 0 {
            return Err(SettingsError::Invalid {
                key: "request_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.dedupe_window == 0 {
            return Err(SettingsError::Invalid {
                key: "dedupe_window",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.feed_batch_size == 0 {
            return Err(SettingsError::Invalid {
                key: "feed_batch_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        normalize_level(&self.logging.level).map_err(|err| SettingsError::Invalid {
            key: "logging.level",
            reason: err.to_string(),
        })?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = SyncSettings::default();
        settings.validate().expect("defaults should validate");
        assert_eq!(settings.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "request_timeout_ms = 2500\n\n[logging]\nlevel = \"warn\""
        )
        .unwrap();

        let settings = SyncSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.request_timeout_ms, 2500);
        assert_eq!(settings.logging.level, "warn");
        assert_eq!(settings.dedupe_window, 4096);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let settings = SyncSettings {
            request_timeout_ms: 0,
            ..SyncSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid {
                key: "request_timeout_ms",
                ..
            })
        ));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut settings = SyncSettings::default();
        settings.logging.level = "chatty".to_string();
        assert!(settings.validate().is_err());
    }
}
