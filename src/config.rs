//! Recorder configuration
//!
//! Stored as JSON. Missing fields take their defaults, so a partial file is
//! enough to override a single setting.

use crate::capture::registry::ScanPolicy;
use crate::capture::traits::CaptureLimits;
use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "GEOCAM_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Longest clip the camera may record
    pub max_duration_seconds: u64,
    /// Largest artifact the camera may produce
    pub max_size_bytes: u64,
    /// GPS polling cadence
    pub gps_sample_interval_ms: u64,
    /// Elapsed-time tick (also the cadence of cap checks)
    pub tick_interval_ms: u64,
    /// How long to wait for the upload pipeline before reporting failure
    pub upload_timeout_seconds: u64,
    pub scan_policy: ScanPolicy,
    /// Where GPS journals are written; no journaling when unset
    pub journal_dir: Option<PathBuf>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_duration_seconds: 300,
            max_size_bytes: 512 * 1024 * 1024,
            gps_sample_interval_ms: 1000,
            tick_interval_ms: 1000,
            upload_timeout_seconds: 120,
            scan_policy: ScanPolicy::Strict,
            journal_dir: None,
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> RecorderResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RecorderConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults
    pub fn load_or_default(path: &Path) -> RecorderResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("No configuration at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Load from the file named by `GEOCAM_CONFIG`, or defaults when unset
    pub fn from_env() -> RecorderResult<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> RecorderResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> RecorderResult<()> {
        let zero_field = [
            ("maxDurationSeconds", self.max_duration_seconds),
            ("maxSizeBytes", self.max_size_bytes),
            ("gpsSampleIntervalMs", self.gps_sample_interval_ms),
            ("tickIntervalMs", self.tick_interval_ms),
            ("uploadTimeoutSeconds", self.upload_timeout_seconds),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);

        if let Some((name, _)) = zero_field {
            return Err(RecorderError::Config(format!(
                "{name} must be greater than zero"
            )));
        }

        // The duration cap is only checked on a tick
        if self.tick_interval_ms > self.max_duration_seconds.saturating_mul(1000) {
            return Err(RecorderError::Config(format!(
                "tickIntervalMs ({}) must not exceed maxDurationSeconds ({}s)",
                self.tick_interval_ms, self.max_duration_seconds
            )));
        }

        Ok(())
    }

    pub fn capture_limits(&self) -> CaptureLimits {
        CaptureLimits {
            max_duration_seconds: self.max_duration_seconds,
            max_size_bytes: self.max_size_bytes,
        }
    }

    pub fn gps_sample_interval(&self) -> Duration {
        Duration::from_millis(self.gps_sample_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_seconds)
    }
}
