//! Unit Conversion Functions
//!
//! Conversions used by the Davis acquisition pipeline and the reference decoder:
//! - Speed: m/s ↔ knots
//! - Anemometer: debounced RPM → m/s, RPM → rotations per second
//! - Vane: potentiometer counts → degrees
//! - Angles: normalisation into `[0, 360)` and `[-180, 180)`

/// Meters per second to knots, as used for the Davis sensor
pub const MPS_TO_KNOTS: f64 = 1.94384;

/// Meters per second to knots, as used by the reference station decoder
pub const REFERENCE_MPS_TO_KNOTS: f64 = 1.943844;

/// Default Davis cup conversion: speed (m/s) = RPM * 0.098
pub const DAVIS_RPM_TO_MPS: f64 = 0.098;

/// Full-scale potentiometer reading of the Davis vane
pub const POT_FULL_SCALE: f64 = 1024.0;

/// Convert m/s to knots
pub fn mps_to_knots(mps: f64) -> f64 {
    mps * MPS_TO_KNOTS
}

/// Convert debounced RPM to m/s for a Davis cup assembly
///
/// # Arguments
/// * `rpm` - Debounced rotations per minute
/// * `factor` - Calibration multiplier (1.0 = factory conversion)
pub fn rpm_to_mps(rpm: f64, factor: f64) -> f64 {
    rpm * DAVIS_RPM_TO_MPS * factor
}

/// Convert RPM to rotations per second
pub fn rpm_to_rps(rpm: f64) -> f64 {
    rpm / 60.0
}

/// Map a raw potentiometer value onto 0-360 degrees (before scale/offset)
pub fn pot_to_degrees(pot: f64) -> f64 {
    (pot / POT_FULL_SCALE) * 360.0
}

/// Normalise an angle into `[0, 360)`
pub fn normalize_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Wrap an angular difference into `[-180, 180)`
pub fn wrap_signed_degrees(deg: f64) -> f64 {
    let wrapped = normalize_degrees(deg);
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mps_to_knots() {
        assert!((mps_to_knots(1.0) - 1.94384).abs() < 1e-9);
        assert_eq!(mps_to_knots(0.0), 0.0);
    }

    #[test]
    fn test_rpm_to_mps() {
        assert!((rpm_to_mps(45.0, 1.0) - 4.41).abs() < 1e-9);
        assert!((rpm_to_mps(45.0, 2.0) - 8.82).abs() < 1e-9);
        assert_eq!(rpm_to_mps(0.0, 1.3), 0.0);
    }

    #[test]
    fn test_pot_to_degrees() {
        assert_eq!(pot_to_degrees(0.0), 0.0);
        assert_eq!(pot_to_degrees(512.0), 180.0);
        assert_eq!(pot_to_degrees(1024.0), 360.0);
    }

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(360.0), 0.0);
        assert_eq!(normalize_degrees(-10.0), 350.0);
        assert_eq!(normalize_degrees(725.0), 5.0);
        assert_eq!(normalize_degrees(-1e-15), 0.0);
    }

    #[test]
    fn test_wrap_signed_degrees() {
        assert_eq!(wrap_signed_degrees(190.0), -170.0);
        assert_eq!(wrap_signed_degrees(-190.0), 170.0);
        assert_eq!(wrap_signed_degrees(180.0), -180.0);
        assert_eq!(wrap_signed_degrees(20.0), 20.0);
    }
}
