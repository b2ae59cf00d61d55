//! Raw sample → calibrated reading
//!
//! Pure and infallible: garbage in (a pot value past full scale, say) still
//! yields numbers. Range policing belongs to whoever consumes the reading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::RawSample;
use crate::units::{mps_to_knots, normalize_degrees, pot_to_degrees, rpm_to_mps, rpm_to_rps};

/// Calibration applied by the converter
///
/// Handed around by value; see [`ParamsHandle`](crate::calibration::ParamsHandle)
/// for how the live snapshot is shared.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Multiplier on the factory RPM → m/s conversion; always > 0
    pub speed_factor: f64,
    /// Degrees added after scaling; any real, wrapped on use
    pub direction_offset: f64,
    /// Multiplier on the pot-derived base direction; always > 0
    pub direction_scale: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            speed_factor: 1.0,
            direction_offset: 0.0,
            direction_scale: 1.0,
        }
    }
}

impl CalibrationParams {
    /// Whether the parameters satisfy the converter's preconditions
    pub fn is_valid(&self) -> bool {
        self.speed_factor.is_finite()
            && self.speed_factor > 0.0
            && self.direction_scale.is_finite()
            && self.direction_scale > 0.0
            && self.direction_offset.is_finite()
    }
}

/// A converted measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub speed_mps: f64,
    pub speed_knots: f64,
    /// Always in `[0, 360)`
    pub direction_deg: f64,
    /// Cup rotations per second
    pub rps: f64,
    pub raw: RawSample,
    pub at: DateTime<Utc>,
}

/// Convert a raw frame using the given calibration
pub fn convert(raw: &RawSample, params: &CalibrationParams) -> Reading {
    let rpm = raw.rpm_tops as f64;
    let speed_mps = rpm_to_mps(rpm, params.speed_factor);
    let direction_base = pot_to_degrees(raw.pot_value as f64);
    let direction_deg =
        normalize_degrees(direction_base * params.direction_scale + params.direction_offset);

    Reading {
        speed_mps,
        speed_knots: mps_to_knots(speed_mps),
        direction_deg,
        rps: rpm_to_rps(rpm),
        raw: *raw,
        at: raw.received_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pot: u16, rpm: u32) -> RawSample {
        RawSample {
            iteration: 1,
            pot_value: pot,
            rpm_tops: rpm,
            rpm_raw: rpm,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_negative_offset_wraps() {
        let params = CalibrationParams {
            direction_offset: -20.0,
            ..Default::default()
        };
        let reading = convert(&raw(0, 0), &params);
        assert!((reading.direction_deg - 340.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_scale_pot_is_zero_degrees() {
        let reading = convert(&raw(1024, 0), &CalibrationParams::default());
        assert_eq!(reading.direction_deg, 0.0);
    }

    #[test]
    fn test_params_validity() {
        assert!(CalibrationParams::default().is_valid());
        let bad = CalibrationParams {
            speed_factor: 0.0,
            ..Default::default()
        };
        assert!(!bad.is_valid());
        let nan = CalibrationParams {
            direction_offset: f64::NAN,
            ..Default::default()
        };
        assert!(!nan.is_valid());
    }
}
