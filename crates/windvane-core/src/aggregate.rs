//! Interval aggregation
//!
//! Folds the high-rate reading stream into one report per wall-clock window.
//! Direction is vector-averaged (see [`crate::circular`]) and reported with a
//! consistency score; speeds get min/max/mean in both knots and m/s.
//!
//! Windows are half-open on the left: a window covers `(start, end]`, so a
//! reading stamped exactly on the boundary belongs to the window being closed.
//! A window with no readings still produces a report, with `stats: None`.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::circular::VectorSum;
use crate::convert::Reading;

/// Default reporting window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Overdue windows reported one by one before the rest are folded into a single gap report
const MAX_CATCH_UP_WINDOWS: u32 = 1440;

/// Statistics for a window that saw at least one reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalStats {
    pub speed_avg_knots: f64,
    pub speed_min_knots: f64,
    pub speed_max_knots: f64,
    /// Vector-averaged direction in `[0, 360)`
    pub direction_avg_deg: f64,
    /// Mean resultant length in `[0, 1]`
    pub consistency: f64,
    pub speed_avg_mps: f64,
    pub speed_min_mps: f64,
    pub speed_max_mps: f64,
}

/// One closed reporting window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sample_count: u64,
    /// `None` when the sensor was silent for the whole window
    pub stats: Option<IntervalStats>,
}

impl IntervalReport {
    /// Whether the window had no readings
    pub fn is_empty(&self) -> bool {
        self.stats.is_none()
    }

    pub fn speed_avg_knots(&self) -> Option<f64> {
        self.stats.map(|s| s.speed_avg_knots)
    }

    pub fn direction_avg_deg(&self) -> Option<f64> {
        self.stats.map(|s| s.direction_avg_deg)
    }

    pub fn consistency(&self) -> Option<f64> {
        self.stats.map(|s| s.consistency)
    }
}

#[derive(Debug, Clone, Copy)]
struct MinMaxSum {
    min: f64,
    max: f64,
    sum: f64,
}

impl Default for MinMaxSum {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }
}

impl MinMaxSum {
    fn push(&mut self, v: f64) {
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.sum += v;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    direction: VectorSum,
    knots: MinMaxSum,
    mps: MinMaxSum,
    count: u64,
}

impl Accumulator {
    fn push(&mut self, reading: &Reading) {
        self.direction.push_degrees(reading.direction_deg);
        self.knots.push(reading.speed_knots);
        self.mps.push(reading.speed_mps);
        self.count += 1;
    }

    fn stats(&self) -> Option<IntervalStats> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(IntervalStats {
            speed_avg_knots: self.knots.sum / n,
            speed_min_knots: self.knots.min,
            speed_max_knots: self.knots.max,
            direction_avg_deg: self.direction.mean_degrees()?,
            consistency: self.direction.resultant_length()?,
            speed_avg_mps: self.mps.sum / n,
            speed_min_mps: self.mps.min,
            speed_max_mps: self.mps.max,
        })
    }
}

/// Stateful window accumulator
#[derive(Debug, Clone)]
pub struct IntervalAggregator {
    window: TimeDelta,
    window_start: DateTime<Utc>,
    acc: Accumulator,
}

impl IntervalAggregator {
    /// Start a window of length `window` at `start`
    pub fn new(window: Duration, start: DateTime<Utc>) -> Self {
        let window = TimeDelta::from_std(window)
            .ok()
            .filter(|w| *w > TimeDelta::zero())
            .unwrap_or_else(|| TimeDelta::seconds(60));
        Self {
            window,
            window_start: start,
            acc: Accumulator::default(),
        }
    }

    /// Start at the most recent multiple of `window` since the epoch, so
    /// 60-second windows close on the minute
    pub fn aligned(window: Duration, now: DateTime<Utc>) -> Self {
        let mut agg = Self::new(window, now);
        let window_ms = agg.window.num_milliseconds().max(1);
        let now_ms = now.timestamp_millis();
        let start_ms = now_ms - now_ms.rem_euclid(window_ms);
        if let Some(start) = DateTime::from_timestamp_millis(start_ms) {
            agg.window_start = start;
        }
        agg
    }

    /// Start of the open window
    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    /// End of the open window
    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_start + self.window
    }

    /// Readings in the open window so far
    pub fn pending_count(&self) -> u64 {
        self.acc.count
    }

    /// Add a reading, first closing every window that ended before it
    pub fn push(&mut self, reading: &Reading) -> Vec<IntervalReport> {
        let closed = self.close_due(reading.at);
        self.acc.push(reading);
        closed
    }

    /// Close every window whose end lies strictly before `now`
    pub fn close_due(&mut self, now: DateTime<Utc>) -> Vec<IntervalReport> {
        let mut reports = Vec::new();
        while now > self.window_end() {
            if reports.len() as u32 >= MAX_CATCH_UP_WINDOWS {
                // Clock jump or very long outage: one gap report up to the window holding `now`
                let gap_end = self.window_holding(now);
                reports.push(IntervalReport {
                    window_start: self.window_start,
                    window_end: gap_end,
                    sample_count: 0,
                    stats: None,
                });
                self.window_start = gap_end;
                break;
            }
            let end = self.window_end();
            reports.push(self.take_report(end));
            self.window_start = end;
        }
        reports
    }

    /// Close the open window early at `now` (used on shutdown)
    pub fn flush(&mut self, now: DateTime<Utc>) -> IntervalReport {
        let end = now.max(self.window_start);
        let report = self.take_report(end);
        self.window_start = end;
        report
    }

    /// Start of the window that `now` falls in, stepping whole windows from
    /// the open one; `now` itself if that is not representable
    fn window_holding(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let window_ms = self.window.num_milliseconds().max(1);
        let behind_ms = (now - self.window_start).num_milliseconds();
        (behind_ms / window_ms)
            .checked_mul(window_ms)
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|step| self.window_start.checked_add_signed(step))
            .unwrap_or(now)
    }

    fn take_report(&mut self, end: DateTime<Utc>) -> IntervalReport {
        let acc = std::mem::take(&mut self.acc);
        IntervalReport {
            window_start: self.window_start,
            window_end: end,
            sample_count: acc.count,
            stats: acc.stats(),
        }
    }
}
