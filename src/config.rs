use crate::network::scheduler::MIN_SEND_INTERVAL;
use crate::network::state::{DEFAULT_FOREGROUND_SETTLE_DELAY, DEFAULT_RECONNECT_DELAY};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default time to wait for a reply before retrying
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Default number of resends before giving up on a request
pub const DEFAULT_MAX_RETRIES: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid setting {setting}: {issue}")]
    Invalid {
        setting: &'static str,
        issue: String,
    },

    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Tunables for a connection manager. Durations are written to TOML as
/// fractional seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Time to wait for a reply before each retry decision
    #[serde(with = "secs")]
    pub timeout: Duration,
    /// Resends allowed before the retries-exhausted failure is delivered
    pub max_retries: u32,
    /// Minimum spacing between physical writes
    #[serde(with = "secs")]
    pub min_send_interval: Duration,
    /// Delay before reconnecting after a transient error or unexpected cancel
    #[serde(with = "secs")]
    pub reconnect_delay: Duration,
    /// Pause after returning to the foreground before reconnecting
    #[serde(with = "secs")]
    pub foreground_settle_delay: Duration,
    /// Interval between keep-alive pings; disabled when unset
    #[serde(with = "opt_secs", skip_serializing_if = "Option::is_none")]
    pub keep_alive_interval: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            min_send_interval: MIN_SEND_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            foreground_settle_delay: DEFAULT_FOREGROUND_SETTLE_DELAY,
            keep_alive_interval: None,
        }
    }
}

impl ManagerConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }

    /// Worst-case time from submission to the retries-exhausted failure
    pub fn time_to_failure(&self) -> Duration {
        self.timeout * (self.max_retries + 1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                setting: "timeout",
                issue: "must be greater than zero".to_string(),
            });
        }
        if self.keep_alive_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(ConfigError::Invalid {
                setting: "keep_alive_interval",
                issue: "must be greater than zero when set".to_string(),
            });
        }
        Ok(())
    }

    /// Default config file location
    pub fn default_config_file() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("dev", "tideline", "tideline")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ManagerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is absent
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_f64(duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(deserializer)? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
