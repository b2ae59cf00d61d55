use chrono::Utc;
use windvane_core::convert::{convert, CalibrationParams};
use windvane_core::protocol::RawSample;

fn raw(pot_value: u16, rpm_tops: u32) -> RawSample {
    RawSample {
        iteration: 1,
        pot_value,
        rpm_tops,
        rpm_raw: rpm_tops + 2,
        received_at: Utc::now(),
    }
}

#[test]
fn test_half_scale_pot_is_south() {
    let reading = convert(&raw(512, 0), &CalibrationParams::default());
    assert!((reading.direction_deg - 180.0).abs() < 1e-9);
}

#[test]
fn test_factory_speed_conversion() {
    let reading = convert(&raw(0, 45), &CalibrationParams::default());
    assert!((reading.speed_mps - 4.41).abs() < 1e-9);
    assert!((reading.speed_knots - 8.57).abs() < 0.01);
    assert!((reading.rps - 0.75).abs() < 1e-9);
}

#[test]
fn test_calibration_is_applied() {
    let params = CalibrationParams {
        speed_factor: 1.1,
        direction_offset: 200.0,
        direction_scale: 1.0,
    };
    let reading = convert(&raw(512, 45), &params);
    assert!((reading.speed_mps - 4.851).abs() < 1e-9);
    // 180 + 200 wraps to 20
    assert!((reading.direction_deg - 20.0).abs() < 1e-9);
}

#[test]
fn test_direction_scale() {
    let params = CalibrationParams {
        direction_scale: 0.5,
        ..Default::default()
    };
    let reading = convert(&raw(512, 0), &params);
    assert!((reading.direction_deg - 90.0).abs() < 1e-9);
}

#[test]
fn test_reading_keeps_raw_fields_and_time() {
    let sample = raw(100, 10);
    let reading = convert(&sample, &CalibrationParams::default());
    assert_eq!(reading.raw, sample);
    assert_eq!(reading.at, sample.received_at);
}
