//! Configuration
//!
//! One validated struct, built once at startup (file, then command-line
//! overrides) and handed to each component. Missing keys take the defaults
//! below, so an empty `{}` file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::convert::CalibrationParams;
use crate::protocol::{BackoffConfig, DEFAULT_BAUD_RATE, DEFAULT_MAX_LINE_LEN, DEFAULT_PORT};
use crate::reference::DEFAULT_UDP_PORT;

/// Configuration errors (fatal at startup)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Serial connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path
    pub port: String,
    pub baud_rate: u32,
    /// Lines longer than this are dropped
    pub max_line_len: usize,
    pub reconnect_backoff_secs: f64,
    pub reconnect_backoff_max_secs: f64,
    /// Fractional jitter on each reconnect delay
    pub reconnect_jitter: f64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            reconnect_backoff_secs: 5.0,
            reconnect_backoff_max_secs: 60.0,
            reconnect_jitter: 0.2,
        }
    }
}

impl SerialConfig {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_secs_f64(self.reconnect_backoff_secs),
            max: Duration::from_secs_f64(self.reconnect_backoff_max_secs),
            jitter: self.reconnect_jitter,
        }
    }
}

/// Interval reporting settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub interval_secs: u64,
    /// Also publish the per-sample Davis diagnostic channels
    pub publish_samples: bool,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            publish_samples: false,
        }
    }
}

impl ReportingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Calibration seeds applied at startup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSeed {
    pub speed_factor: f64,
    pub direction_offset: f64,
    pub direction_scale: f64,
}

impl Default for CalibrationSeed {
    fn default() -> Self {
        let p = CalibrationParams::default();
        Self {
            speed_factor: p.speed_factor,
            direction_offset: p.direction_offset,
            direction_scale: p.direction_scale,
        }
    }
}

impl From<CalibrationSeed> for CalibrationParams {
    fn from(seed: CalibrationSeed) -> Self {
        Self {
            speed_factor: seed.speed_factor,
            direction_offset: seed.direction_offset,
            direction_scale: seed.direction_scale,
        }
    }
}

/// Continuous calibration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuousConfig {
    pub enabled: bool,
    /// Start in ongoing mode (seeds already come from an earlier calibration)
    pub skip_bootstrap: bool,
    /// Wait between ongoing cycles
    pub interval_secs: u64,
    /// Pairs collected per ongoing cycle
    pub samples_per_cycle: u32,
    /// Spacing between collection ticks
    pub sample_interval_secs: u64,
    pub speed_confidence_threshold: f64,
    /// 0.0 disables the direction gate
    pub direction_confidence_threshold: f64,
    /// Fraction of the suggested change applied per ongoing cycle
    pub adjustment_rate: f64,
    /// Pairs collected per bootstrap cycle
    pub bootstrap_samples: u32,
    pub bootstrap_speed_confidence_threshold: f64,
    pub bootstrap_direction_confidence_threshold: f64,
    /// Wait before retrying a skipped bootstrap
    pub bootstrap_retry_secs: u64,
    /// A collection gives up after `samples × max_tick_factor` ticks
    pub max_tick_factor: u32,
    /// Fewer pairs than this and the cycle is skipped
    pub min_pairs: u32,
    /// Below this the Davis mean speed is treated as calm; also the per-pair
    /// floor for speed ratios
    pub min_speed_knots: f64,
    /// Largest reading/reference time gap accepted as a pair
    pub max_pair_skew_secs: f64,
}

impl Default for ContinuousConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            skip_bootstrap: false,
            interval_secs: 900,
            samples_per_cycle: 20,
            sample_interval_secs: 5,
            speed_confidence_threshold: 0.5,
            direction_confidence_threshold: 0.0,
            adjustment_rate: 0.3,
            bootstrap_samples: 10,
            bootstrap_speed_confidence_threshold: 0.3,
            bootstrap_direction_confidence_threshold: 0.0,
            bootstrap_retry_secs: 180,
            max_tick_factor: 3,
            min_pairs: 3,
            min_speed_knots: 0.1,
            max_pair_skew_secs: 10.0,
        }
    }
}

impl ContinuousConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn bootstrap_retry(&self) -> Duration {
        Duration::from_secs(self.bootstrap_retry_secs)
    }

    pub fn max_pair_skew(&self) -> Duration {
        Duration::from_secs_f64(self.max_pair_skew_secs)
    }
}

/// Reference station settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub bind_addr: SocketAddr,
    pub stale_after_secs: u64,
    /// Fall back to `obs_st` average wind when no fresh `rapid_wind` exists
    pub accept_obs_st: bool,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_UDP_PORT)),
            stale_after_secs: 30,
            accept_obs_st: false,
        }
    }
}

impl ReferenceConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindvaneConfig {
    pub serial: SerialConfig,
    pub reporting: ReportingConfig,
    pub calibration: CalibrationSeed,
    pub continuous: ContinuousConfig,
    pub reference: ReferenceConfig,
    /// Readings buffered for the calibration engine between ticks
    pub queue_capacity: usize,
}

impl Default for WindvaneConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            reporting: ReportingConfig::default(),
            calibration: CalibrationSeed::default(),
            continuous: ContinuousConfig::default(),
            reference: ReferenceConfig::default(),
            queue_capacity: 256,
        }
    }
}

impl WindvaneConfig {
    /// Load from a JSON file (not yet validated)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Starting calibration
    pub fn initial_params(&self) -> CalibrationParams {
        self.calibration.into()
    }

    /// Check every numeric constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("calibration.speed_factor", self.calibration.speed_factor)?;
        positive("calibration.direction_scale", self.calibration.direction_scale)?;
        finite("calibration.direction_offset", self.calibration.direction_offset)?;

        if self.serial.port.trim().is_empty() {
            return Err(invalid("serial.port", "must not be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(invalid("serial.baud_rate", "must be > 0"));
        }
        if self.serial.max_line_len == 0 {
            return Err(invalid("serial.max_line_len", "must be > 0"));
        }
        positive("serial.reconnect_backoff_secs", self.serial.reconnect_backoff_secs)?;
        if !(self.serial.reconnect_backoff_max_secs >= self.serial.reconnect_backoff_secs) {
            return Err(invalid(
                "serial.reconnect_backoff_max_secs",
                "must be >= reconnect_backoff_secs",
            ));
        }
        unit_interval("serial.reconnect_jitter", self.serial.reconnect_jitter)?;

        if self.reporting.interval_secs == 0 {
            return Err(invalid("reporting.interval_secs", "must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be > 0"));
        }
        if self.reference.stale_after_secs == 0 {
            return Err(invalid("reference.stale_after_secs", "must be > 0"));
        }

        let c = &self.continuous;
        if c.interval_secs == 0 {
            return Err(invalid("continuous.interval_secs", "must be > 0"));
        }
        if c.sample_interval_secs == 0 {
            return Err(invalid("continuous.sample_interval_secs", "must be > 0"));
        }
        if c.samples_per_cycle == 0 {
            return Err(invalid("continuous.samples_per_cycle", "must be > 0"));
        }
        if c.bootstrap_samples == 0 {
            return Err(invalid("continuous.bootstrap_samples", "must be > 0"));
        }
        if c.bootstrap_retry_secs == 0 {
            return Err(invalid("continuous.bootstrap_retry_secs", "must be > 0"));
        }
        if c.max_tick_factor == 0 {
            return Err(invalid("continuous.max_tick_factor", "must be > 0"));
        }
        if c.min_pairs < 2 {
            return Err(invalid("continuous.min_pairs", "must be >= 2"));
        }
        if c.min_pairs > c.samples_per_cycle || c.min_pairs > c.bootstrap_samples {
            return Err(invalid(
                "continuous.min_pairs",
                "must not exceed samples_per_cycle or bootstrap_samples",
            ));
        }
        unit_interval("continuous.speed_confidence_threshold", c.speed_confidence_threshold)?;
        unit_interval(
            "continuous.direction_confidence_threshold",
            c.direction_confidence_threshold,
        )?;
        unit_interval(
            "continuous.bootstrap_speed_confidence_threshold",
            c.bootstrap_speed_confidence_threshold,
        )?;
        unit_interval(
            "continuous.bootstrap_direction_confidence_threshold",
            c.bootstrap_direction_confidence_threshold,
        )?;
        positive("continuous.adjustment_rate", c.adjustment_rate)?;
        if c.adjustment_rate > 1.0 {
            return Err(invalid("continuous.adjustment_rate", "must be <= 1.0"));
        }
        positive("continuous.min_speed_knots", c.min_speed_knots)?;
        positive("continuous.max_pair_skew_secs", c.max_pair_skew_secs)?;

        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn finite(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(invalid(field, format!("must be finite, got {}", v)))
    }
}

fn positive(field: &'static str, v: f64) -> Result<(), ConfigError> {
    finite(field, v)?;
    if v > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("must be > 0, got {}", v)))
    }
}

fn unit_interval(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(invalid(field, format!("must be within [0, 1], got {}", v)))
    }
}
