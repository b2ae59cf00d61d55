use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::time::Duration;
use windvane_core::aggregate::IntervalAggregator;
use windvane_core::convert::Reading;
use windvane_core::protocol::RawSample;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn reading(offset_secs: i64, knots: f64, direction_deg: f64) -> Reading {
    let at = t0() + TimeDelta::seconds(offset_secs);
    Reading {
        speed_mps: knots / 1.94384,
        speed_knots: knots,
        direction_deg,
        rps: 0.0,
        raw: RawSample {
            iteration: 0,
            pot_value: 0,
            rpm_tops: 0,
            rpm_raw: 0,
            received_at: at,
        },
        at,
    }
}

fn minute() -> IntervalAggregator {
    IntervalAggregator::new(Duration::from_secs(60), t0())
}

#[test]
fn test_direction_average_wraps_through_north() {
    let mut agg = minute();
    agg.push(&reading(10, 5.0, 350.0));
    agg.push(&reading(20, 5.0, 10.0));
    let report = agg.close_due(t0() + TimeDelta::seconds(61)).remove(0);

    let stats = report.stats.unwrap();
    let dir = stats.direction_avg_deg;
    assert!(dir < 1e-6 || 360.0 - dir < 1e-6, "expected north, got {}", dir);
    assert!(stats.consistency > 0.99);
}

#[test]
fn test_uniform_spread_has_no_consistency() {
    let mut agg = minute();
    for (i, dir) in [0.0, 90.0, 180.0, 270.0].into_iter().enumerate() {
        agg.push(&reading(i as i64 + 1, 5.0, dir));
    }
    let report = agg.flush(t0() + TimeDelta::seconds(30));
    assert!(report.consistency().unwrap() < 1e-9);
    assert_eq!(report.sample_count, 4);
}

#[test]
fn test_speed_statistics() {
    let mut agg = minute();
    for (i, knots) in [4.0, 6.0, 11.0].into_iter().enumerate() {
        agg.push(&reading(i as i64 + 1, knots, 90.0));
    }
    let stats = agg.flush(t0() + TimeDelta::seconds(30)).stats.unwrap();
    assert!((stats.speed_avg_knots - 7.0).abs() < 1e-9);
    assert_eq!(stats.speed_min_knots, 4.0);
    assert_eq!(stats.speed_max_knots, 11.0);
    assert!((stats.speed_avg_mps - 7.0 / 1.94384).abs() < 1e-9);
}

#[test]
fn test_empty_window_is_marked_missing() {
    let mut agg = minute();
    let reports = agg.close_due(t0() + TimeDelta::seconds(61));
    assert_eq!(reports.len(), 1);
    let report = reports[0];
    assert_eq!(report.sample_count, 0);
    assert!(report.is_empty());
    assert_eq!(report.stats, None);
    assert_eq!(report.speed_avg_knots(), None);
    assert_eq!(report.direction_avg_deg(), None);
}

#[test]
fn test_boundary_sample_belongs_to_closing_window() {
    let mut agg = minute();
    agg.push(&reading(30, 5.0, 90.0));
    assert!(agg.push(&reading(60, 7.0, 90.0)).is_empty());

    let reports = agg.push(&reading(61, 9.0, 90.0));
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].sample_count, 2);
    assert_eq!(reports[0].window_end, t0() + TimeDelta::seconds(60));
    assert_eq!(agg.pending_count(), 1);
}

#[test]
fn test_gap_produces_one_report_per_window() {
    let mut agg = minute();
    agg.push(&reading(5, 5.0, 90.0));
    let reports = agg.push(&reading(200, 5.0, 90.0));
    let counts: Vec<u64> = reports.iter().map(|r| r.sample_count).collect();
    assert_eq!(counts, vec![1, 0, 0]);
    assert_eq!(agg.window_start(), t0() + TimeDelta::seconds(180));
}

#[test]
fn test_aligned_windows_close_on_the_minute() {
    let agg = IntervalAggregator::aligned(Duration::from_secs(60), t0() + TimeDelta::milliseconds(42_500));
    assert_eq!(agg.window_start(), t0());
    assert_eq!(agg.window_end(), t0() + TimeDelta::seconds(60));
}
