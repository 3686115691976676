use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::prober::ProberSettings;
use crate::types::{Resolution, StreamQuality};

pub const MIN_PROBE_INTERVAL_SECS: u64 = 5;

/// How camera liveness is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    Tcp,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("probe_interval_secs must be at least {min}, got {actual}")]
    ProbeIntervalTooShort { actual: u64, min: u64 },

    #[error("probe_timeout_secs ({timeout}) must be greater than 0 and below probe_interval_secs ({interval})")]
    ProbeTimeoutOutOfRange { timeout: u64, interval: u64 },

    #[error("max_concurrent_probes must be at least 1")]
    NoProbeConcurrency,

    #[error("offline_after_failures must be at least 1")]
    ZeroFailureThreshold,

    #[error("simulated_online_probability must be within [0, 1], got {0}")]
    InvalidProbability(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http_port: u16,

    pub auto_refresh: bool,
    pub probe_mode: ProbeMode,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub max_concurrent_probes: usize,
    pub offline_after_failures: u32,
    pub simulated_online_probability: f64,

    pub default_resolution: Resolution,
    pub default_quality: StreamQuality,

    pub snapshot_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,

            auto_refresh: true,
            probe_mode: ProbeMode::Tcp,
            probe_interval_secs: 30,
            probe_timeout_secs: 5,
            max_concurrent_probes: 64,
            offline_after_failures: 2,
            simulated_online_probability: 0.9,

            default_resolution: Resolution::FullHd1080,
            default_quality: StreamQuality::Medium,

            snapshot_path: None,
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = match fs::read_to_string(path) {
            Ok(config_str) => serde_json::from_str::<AppConfig>(&config_str)
                .with_context(|| format!("invalid configuration in {}", path.display()))?,
            Err(_) => {
                // Fall back to default configuration
                tracing::warn!("{} not found, using default configuration", path.display());
                AppConfig::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_interval_secs < MIN_PROBE_INTERVAL_SECS {
            return Err(ConfigError::ProbeIntervalTooShort {
                actual: self.probe_interval_secs,
                min: MIN_PROBE_INTERVAL_SECS,
            });
        }
        if self.probe_timeout_secs == 0 || self.probe_timeout_secs >= self.probe_interval_secs {
            return Err(ConfigError::ProbeTimeoutOutOfRange {
                timeout: self.probe_timeout_secs,
                interval: self.probe_interval_secs,
            });
        }
        if self.max_concurrent_probes == 0 {
            return Err(ConfigError::NoProbeConcurrency);
        }
        if self.offline_after_failures == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if !(0.0..=1.0).contains(&self.simulated_online_probability) {
            return Err(ConfigError::InvalidProbability(self.simulated_online_probability));
        }
        Ok(())
    }

    pub fn prober_settings(&self) -> ProberSettings {
        ProberSettings {
            interval: Duration::from_secs(self.probe_interval_secs),
            timeout: Duration::from_secs(self.probe_timeout_secs),
            max_concurrent_probes: self.max_concurrent_probes,
            offline_after_failures: self.offline_after_failures,
        }
    }
}
