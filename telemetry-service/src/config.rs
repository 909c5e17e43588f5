use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};

use crate::{analytics::AlertThresholds, store::LiveStatePolicy};

pub const CONFIG_ENV: &str = "TELEMETRY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "telemetry-config.toml";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_queue_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            flush_interval_ms: 5000,
            max_queue_size: 50_000,
        }
    }
}

impl BufferConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LiveStateConfig {
    pub policy: LiveStatePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub analytics: AlertThresholds,
    #[serde(default)]
    pub live_state: LiveStateConfig,
}

impl AppConfig {
    /// Load from the file named by `TELEMETRY_CONFIG`, falling back to
    /// `telemetry-config.toml` in the working directory.
    pub fn load() -> Result<Self, ConfigError> {
        let path = PathBuf::from(
            env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
        );
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.buffer;
        if b.batch_size == 0 {
            return Err(ConfigError::Invalid("buffer.batch_size must be > 0".into()));
        }
        if b.max_queue_size <= b.batch_size {
            return Err(ConfigError::Invalid(format!(
                "buffer.max_queue_size ({}) must exceed buffer.batch_size ({})",
                b.max_queue_size, b.batch_size
            )));
        }
        if b.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "buffer.flush_interval_ms must be > 0".into(),
            ));
        }
        let a = &self.analytics;
        if a.battery_temp_warning > a.battery_temp_critical {
            return Err(ConfigError::Invalid(format!(
                "analytics.battery_temp_warning ({}) exceeds battery_temp_critical ({})",
                a.battery_temp_warning, a.battery_temp_critical
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [database]
            uri = "postgres://localhost/telemetry"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.database.max_connections, 10);
        assert_eq!(cfg.buffer, BufferConfig::default());
        assert_eq!(cfg.buffer.flush_interval(), Duration::from_secs(5));
        assert_eq!(cfg.analytics, AlertThresholds::default());
        assert_eq!(cfg.live_state.policy, LiveStatePolicy::LastArrivalWins);
    }

    #[test]
    fn full_config_overrides() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [database]
            uri = "postgres://db/telemetry"
            max_connections = 4

            [buffer]
            batch_size = 200
            flush_interval_ms = 1000
            max_queue_size = 5000

            [analytics]
            efficiency = 90.0
            battery_temp_warning = 40.0
            battery_temp_critical = 50.0

            [live_state]
            policy = "newest_observation_wins"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.buffer.batch_size, 200);
        assert_eq!(cfg.analytics.efficiency, 90.0);
        assert_eq!(cfg.live_state.policy, LiveStatePolicy::NewestObservationWins);
    }

    #[test]
    fn rejects_cap_not_above_batch_size() {
        let err = AppConfig::from_toml_str(
            r#"
            [database]
            uri = "postgres://db/telemetry"
            [buffer]
            batch_size = 100
            max_queue_size = 100
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_temperature_thresholds() {
        let err = AppConfig::from_toml_str(
            r#"
            [database]
            uri = "postgres://db/telemetry"
            [analytics]
            battery_temp_warning = 60.0
            battery_temp_critical = 55.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("battery_temp_warning"));
    }

    #[test]
    fn rejects_zero_batch_size_and_interval() {
        for buffer in ["batch_size = 0", "flush_interval_ms = 0"] {
            let toml = format!("[database]\nuri = \"x\"\n[buffer]\n{buffer}\n");
            assert!(AppConfig::from_toml_str(&toml).is_err(), "{buffer}");
        }
    }

    #[test]
    fn missing_database_section_is_a_parse_error() {
        let err = AppConfig::from_toml_str("[buffer]\nbatch_size = 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
