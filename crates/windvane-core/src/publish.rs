//! Telemetry publishing
//!
//! The sink is an outside collaborator that takes `(topic, value)` pairs with
//! best-effort delivery. [`Publisher::publish`] must never block: the
//! acquisition loop calls it between serial reads.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::aggregate::IntervalReport;
use crate::calibration::CalibrationCycleResult;
use crate::convert::{CalibrationParams, Reading};

/// Topic names, following the plugin's published schema
pub mod topics {
    pub const SPEED_KNOTS: &str = "env.wind.speed";
    pub const SPEED_MIN_KNOTS: &str = "env.wind.speed.min";
    pub const SPEED_MAX_KNOTS: &str = "env.wind.speed.max";
    pub const SPEED_MPS: &str = "env.wind.speed.mps";
    pub const SPEED_MIN_MPS: &str = "env.wind.speed.mps.min";
    pub const SPEED_MAX_MPS: &str = "env.wind.speed.mps.max";
    pub const DIRECTION: &str = "env.wind.direction";
    pub const CONSISTENCY: &str = "env.wind.consistency";
    pub const SAMPLE_COUNT: &str = "davis.wind.sample_count";
    pub const SENSOR_STATUS: &str = "davis.wind.sensor_status";

    pub const RPS: &str = "davis.wind.rps";
    pub const RPM_TOPS: &str = "davis.wind.rpm.tops";
    pub const RPM_RAW: &str = "davis.wind.rpm.raw";
    pub const POT_VALUE: &str = "davis.wind.pot.value";
    pub const ITERATION: &str = "davis.wind.iteration";

    pub const CAL_SPEED_FACTOR: &str = "davis.calibration.speed_factor";
    pub const CAL_DIRECTION_OFFSET: &str = "davis.calibration.direction_offset";
    pub const CAL_SPEED_CONFIDENCE: &str = "davis.calibration.speed_confidence";
    pub const CAL_DIRECTION_CONFIDENCE: &str = "davis.calibration.direction_confidence";
}

/// One published value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub topic: &'static str,
    pub value: f64,
    pub units: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryRecord {
    pub fn new(topic: &'static str, value: f64, units: &'static str, timestamp: DateTime<Utc>) -> Self {
        Self {
            topic,
            value,
            units,
            timestamp,
        }
    }
}

/// Fire-and-forget telemetry sink
pub trait Publisher: Send + Sync {
    /// Hand off one record. Must return promptly; failures are swallowed.
    fn publish(&self, record: TelemetryRecord);
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn publish(&self, record: TelemetryRecord) {
        (**self).publish(record)
    }
}

/// Publisher counters
#[derive(Debug, Default)]
pub struct PublisherStats {
    published: AtomicU64,
    dropped: AtomicU64,
}

impl PublisherStats {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Bounded-channel publisher; drops (and counts) when the consumer lags
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<TelemetryRecord>,
    stats: Arc<PublisherStats>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiver the consumer drains
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TelemetryRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                stats: Arc::new(PublisherStats::default()),
            },
            rx,
        )
    }

    pub fn stats(&self) -> Arc<PublisherStats> {
        Arc::clone(&self.stats)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, record: TelemetryRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Publisher that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPublisher;

impl Publisher for TracingPublisher {
    fn publish(&self, record: TelemetryRecord) {
        info!(
            topic = record.topic,
            value = record.value,
            units = record.units,
            "publish"
        );
    }
}

/// Publish a closed reporting window
///
/// Silent windows only publish their zero sample count; speed and direction
/// are left unpublished rather than sent as 0.
pub fn publish_report(publisher: &dyn Publisher, report: &IntervalReport) {
    let ts = report.window_end;
    publisher.publish(TelemetryRecord::new(
        topics::SAMPLE_COUNT,
        report.sample_count as f64,
        "count",
        ts,
    ));
    let Some(stats) = report.stats else {
        return;
    };
    for (topic, value, units) in [
        (topics::SPEED_KNOTS, stats.speed_avg_knots, "knots"),
        (topics::SPEED_MIN_KNOTS, stats.speed_min_knots, "knots"),
        (topics::SPEED_MAX_KNOTS, stats.speed_max_knots, "knots"),
        (topics::SPEED_MPS, stats.speed_avg_mps, "m/s"),
        (topics::SPEED_MIN_MPS, stats.speed_min_mps, "m/s"),
        (topics::SPEED_MAX_MPS, stats.speed_max_mps, "m/s"),
        (topics::DIRECTION, stats.direction_avg_deg, "degrees"),
        (topics::CONSISTENCY, stats.consistency, "ratio"),
    ] {
        publisher.publish(TelemetryRecord::new(topic, value, units, ts));
    }
}

/// Publish the per-sample diagnostic channels
pub fn publish_reading(publisher: &dyn Publisher, reading: &Reading) {
    let ts = reading.at;
    for (topic, value, units) in [
        (topics::RPS, reading.rps, "rps"),
        (topics::RPM_TOPS, reading.raw.rpm_tops as f64, "rpm"),
        (topics::RPM_RAW, reading.raw.rpm_raw as f64, "rpm"),
        (topics::POT_VALUE, reading.raw.pot_value as f64, "counts"),
        (topics::ITERATION, reading.raw.iteration as f64, "count"),
    ] {
        publisher.publish(TelemetryRecord::new(topic, value, units, ts));
    }
}

/// Publish sensor status (1 = ok, 0 = error)
pub fn publish_sensor_status(publisher: &dyn Publisher, ok: bool) {
    publisher.publish(TelemetryRecord::new(
        topics::SENSOR_STATUS,
        if ok { 1.0 } else { 0.0 },
        "status",
        Utc::now(),
    ));
}

/// Publish freshly applied calibration
pub fn publish_calibration(
    publisher: &dyn Publisher,
    params: &CalibrationParams,
    result: &CalibrationCycleResult,
) {
    let ts = Utc::now();
    for (topic, value, units) in [
        (topics::CAL_SPEED_FACTOR, params.speed_factor, "factor"),
        (topics::CAL_DIRECTION_OFFSET, params.direction_offset, "degrees"),
        (topics::CAL_SPEED_CONFIDENCE, result.speed_confidence, "ratio"),
        (topics::CAL_DIRECTION_CONFIDENCE, result.direction_confidence, "ratio"),
    ] {
        publisher.publish(TelemetryRecord::new(topic, value, units, ts));
    }
}
