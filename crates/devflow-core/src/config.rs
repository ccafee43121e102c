/*!
 * Configuration management for devflow.
 *
 * This module loads and validates the framework-level settings: general
 * application information, logging, and the per-device worker defaults that
 * drivers start from.
 */
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Framework configuration for devflow
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Default worker-loop settings applied to every device worker unless
    /// overridden per device
    #[serde(default)]
    pub worker: WorkerDefaults,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Data directory for per-device auxiliary resources
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether transport and effect failures include full diagnostic detail
    #[serde(default)]
    pub verbose_errors: bool,
}

/// Default settings for device command workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDefaults {
    /// Seconds between full status polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds to wait after initialization before the first status poll
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: f64,

    /// Milliseconds to sleep on each empty-queue iteration
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,

    /// Number of idle cycles that use a halved sleep interval after a
    /// command completes
    #[serde(default = "default_empty_queue_fast_cycles")]
    pub empty_queue_fast_cycles: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            verbose_errors: false,
        }
    }
}

impl Default for WorkerDefaults {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            startup_delay_secs: default_startup_delay_secs(),
            idle_sleep_ms: default_idle_sleep_ms(),
            empty_queue_fast_cycles: default_empty_queue_fast_cycles(),
        }
    }
}

impl WorkerDefaults {
    /// Status poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Startup delay as a duration
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs_f64(self.startup_delay_secs)
    }

    /// Idle sleep as a duration
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

impl Config {
    /// Load configuration from a file, layered with `DEVFLOW_*` environment
    /// variables (environment wins)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = ConfigLib::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("DEVFLOW").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        debug!("Loaded configuration for {}", config.general.app_name);
        Ok(config)
    }

    /// Build configuration from environment variables only, falling back to
    /// defaults for everything unset
    pub fn from_env() -> Result<Self> {
        let settings = ConfigLib::builder()
            .add_source(Environment::with_prefix("DEVFLOW").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        Ok(config)
    }

    /// Wrap the configuration for sharing across workers
    pub fn into_shared(self) -> SharedConfig {
        Arc::new(self)
    }
}

/// A shared, immutable configuration handle
pub type SharedConfig = Arc<Config>;

fn default_app_name() -> String {
    "devflow".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_secs() -> u64 {
    90
}

fn default_startup_delay_secs() -> f64 {
    3.0
}

fn default_idle_sleep_ms() -> u64 {
    100
}

fn default_empty_queue_fast_cycles() -> u32 {
    80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.general.app_name, "devflow");
        assert_eq!(config.worker.poll_interval_secs, 90);
        assert_eq!(config.worker.empty_queue_fast_cycles, 80);
        assert_eq!(config.worker.idle_sleep(), Duration::from_millis(100));
        assert_eq!(config.worker.startup_delay(), Duration::from_secs(3));
        assert!(!config.logging.verbose_errors);
    }

    #[test]
    fn test_from_env_uses_defaults() {
        let config = Config::from_env().unwrap();
        assert_eq!(config.worker.poll_interval(), Duration::from_secs(90));
    }
}
