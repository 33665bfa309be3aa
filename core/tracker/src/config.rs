//! Runtime configuration loaded from `~/.shift-tracker/config.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.

use chrono::Duration;
use serde::Deserialize;
use shift_tracker_protocol::TrackingConfig;
use std::path::{Path, PathBuf};

use crate::error::TrackerError;

pub const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".shift-tracker/config.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_active_interval_secs")]
    pub active_interval_secs: u32,
    #[serde(default = "default_stationary_interval_secs")]
    pub stationary_interval_secs: u32,
    #[serde(default = "default_distance_filter_meters")]
    pub distance_filter_meters: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            active_interval_secs: default_active_interval_secs(),
            stationary_interval_secs: default_stationary_interval_secs(),
            distance_filter_meters: default_distance_filter_meters(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    #[serde(default = "default_verification_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_verification_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_ping_every")]
    pub ping_every: u64,
    #[serde(default = "default_validate_every_successful_pings")]
    pub validate_every_successful_pings: u64,
    #[serde(default = "default_escalate_after_failures")]
    pub escalate_after_failures: u32,
    #[serde(default = "default_self_heal_quiet_secs")]
    pub self_heal_quiet_secs: i64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_every: default_ping_every(),
            validate_every_successful_pings: default_validate_every_successful_pings(),
            escalate_after_failures: default_escalate_after_failures(),
            self_heal_quiet_secs: default_self_heal_quiet_secs(),
        }
    }
}

impl HeartbeatConfig {
    pub fn self_heal_quiet(&self) -> Duration {
        Duration::seconds(self.self_heal_quiet_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MidnightConfig {
    #[serde(default = "default_warning_lead_minutes")]
    pub warning_lead_minutes: u32,
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: u32,
}

impl Default for MidnightConfig {
    fn default() -> Self {
        Self {
            warning_lead_minutes: default_warning_lead_minutes(),
            grace_minutes: default_grace_minutes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TrackerConfig {
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub midnight: MidnightConfig,
}

impl TrackerConfig {
    pub fn tracking_config(&self) -> TrackingConfig {
        TrackingConfig {
            active_interval_secs: self.sampling.active_interval_secs,
            stationary_interval_secs: self.sampling.stationary_interval_secs,
            distance_filter_meters: self.sampling.distance_filter_meters,
            thermal_multiplier: 1,
        }
    }

    pub fn verification_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.verification.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sampling.active_interval_secs == 0 || self.sampling.stationary_interval_secs == 0 {
            return Err("sampling intervals must be positive".to_string());
        }
        if !self.sampling.distance_filter_meters.is_finite()
            || self.sampling.distance_filter_meters < 0.0
        {
            return Err("distance_filter_meters must be a non-negative number".to_string());
        }
        if self.verification.timeout_secs == 0 {
            return Err("verification timeout must be positive".to_string());
        }
        if self.heartbeat.ping_every == 0
            || self.heartbeat.validate_every_successful_pings == 0
            || self.heartbeat.escalate_after_failures == 0
        {
            return Err("heartbeat cadences must be positive".to_string());
        }
        if self.heartbeat.self_heal_quiet_secs <= 0 {
            return Err("self_heal_quiet_secs must be positive".to_string());
        }
        if self.midnight.warning_lead_minutes == 0 || self.midnight.warning_lead_minutes > 60 {
            return Err("warning_lead_minutes must be between 1 and 60".to_string());
        }
        if self.midnight.grace_minutes == 0 || self.midnight.grace_minutes > 60 {
            return Err("grace_minutes must be between 1 and 60".to_string());
        }
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_runtime_config(path: Option<PathBuf>) -> Result<TrackerConfig, TrackerError> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path().map_err(|details| TrackerError::Config {
            path: PathBuf::from(DEFAULT_CONFIG_RELATIVE_PATH),
            details,
        })?,
    };

    if !config_path.exists() {
        return Ok(TrackerConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| config_error(&config_path, err))?;
    let config =
        toml::from_str::<TrackerConfig>(&content).map_err(|err| config_error(&config_path, err))?;
    config
        .validate()
        .map_err(|details| config_error(&config_path, details))?;
    Ok(config)
}

fn config_error(path: &Path, details: impl std::fmt::Display) -> TrackerError {
    TrackerError::Config {
        path: path.to_path_buf(),
        details: details.to_string(),
    }
}

fn default_active_interval_secs() -> u32 {
    10
}

fn default_stationary_interval_secs() -> u32 {
    60
}

fn default_distance_filter_meters() -> f64 {
    10.0
}

fn default_verification_timeout_secs() -> u64 {
    15
}

fn default_ping_every() -> u64 {
    3
}

fn default_validate_every_successful_pings() -> u64 {
    10
}

fn default_escalate_after_failures() -> u32 {
    10
}

fn default_self_heal_quiet_secs() -> i64 {
    120
}

fn default_warning_lead_minutes() -> u32 {
    5
}

fn default_grace_minutes() -> u32 {
    5
}
