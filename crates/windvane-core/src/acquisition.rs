//! Acquisition loop
//!
//! The single owner of the sensor connection. Reads lines, parses and
//! converts them with the live calibration snapshot, offers each reading to
//! the calibration queue and folds it into the interval aggregator.
//!
//! Besides the serial read the loop wakes once a second to close reporting
//! windows on the wall clock, so a silent sensor still yields (empty)
//! reports on time.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregate::{IntervalAggregator, IntervalReport};
use crate::calibration::{CalibrationQueue, ParamsReader};
use crate::config::WindvaneConfig;
use crate::convert::convert;
use crate::protocol::{parse, ConnectionState, FrameSource, PortOpener, SourceError};
use crate::publish::{publish_reading, publish_report, publish_sensor_status, Publisher};

/// How often reporting windows are checked against the clock
const HOUSEKEEPING_TICK: Duration = Duration::from_secs(1);

/// Counters for everything the loop absorbs
///
/// `malformed` covers unparseable lines and lines the codec dropped for
/// exceeding `max_line_len`.
#[derive(Debug, Default)]
pub struct AcquisitionStats {
    lines: AtomicU64,
    samples: AtomicU64,
    malformed: AtomicU64,
    reconnects: AtomicU64,
    reports: AtomicU64,
}

/// Point-in-time copy of [`AcquisitionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AcquisitionStatsSnapshot {
    pub lines: u64,
    pub samples: u64,
    pub malformed: u64,
    pub reconnects: u64,
    pub reports: u64,
}

impl AcquisitionStats {
    pub fn snapshot(&self) -> AcquisitionStatsSnapshot {
        AcquisitionStatsSnapshot {
            lines: self.lines.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            reports: self.reports.load(Ordering::Relaxed),
        }
    }
}

/// Acquisition settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionOptions {
    /// Reporting window
    pub window: Duration,
    /// Also publish every converted sample
    pub publish_samples: bool,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            window: crate::aggregate::DEFAULT_WINDOW,
            publish_samples: false,
        }
    }
}

impl From<&WindvaneConfig> for AcquisitionOptions {
    fn from(config: &WindvaneConfig) -> Self {
        Self {
            window: config.reporting.interval(),
            publish_samples: config.reporting.publish_samples,
        }
    }
}

/// Everything downstream of the frame source
struct Pipeline {
    params: ParamsReader,
    aggregator: IntervalAggregator,
    queue: Arc<CalibrationQueue>,
    publisher: Arc<dyn Publisher>,
    stats: Arc<AcquisitionStats>,
    publish_samples: bool,
}

impl Pipeline {
    fn handle_line(&mut self, line: &str) {
        self.stats.lines.fetch_add(1, Ordering::Relaxed);
        let raw = match parse(line) {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                debug!("Ignoring line {:?}: {}", line.trim_end(), e);
                return;
            }
        };
        self.stats.samples.fetch_add(1, Ordering::Relaxed);

        let reading = convert(&raw, &self.params.current());
        if self.publish_samples {
            publish_reading(&*self.publisher, &reading);
        }
        self.queue.offer(reading);
        let reports = self.aggregator.push(&reading);
        self.emit(reports);
    }

    fn count_discarded(&self, discarded: u64) {
        if discarded > 0 {
            self.stats.malformed.fetch_add(discarded, Ordering::Relaxed);
            debug!(discarded, "Dropped overlong serial lines");
        }
    }

    fn emit(&self, reports: Vec<IntervalReport>) {
        for report in reports {
            self.emit_one(&report);
        }
    }

    fn emit_one(&self, report: &IntervalReport) {
        self.stats.reports.fetch_add(1, Ordering::Relaxed);
        match report.stats {
            Some(stats) => info!(
                samples = report.sample_count,
                speed_knots = stats.speed_avg_knots,
                min_knots = stats.speed_min_knots,
                max_knots = stats.speed_max_knots,
                direction = stats.direction_avg_deg,
                consistency = stats.consistency,
                "Wind report"
            ),
            None => info!(
                window_start = %report.window_start,
                window_end = %report.window_end,
                "No wind samples in window"
            ),
        }
        publish_report(&*self.publisher, report);
    }
}

/// Main acquisition loop
pub struct Acquisition<O: PortOpener> {
    source: FrameSource<O>,
    pipeline: Pipeline,
}

impl<O: PortOpener> Acquisition<O> {
    /// Wire a frame source to the downstream pipeline
    ///
    /// Installs a connection observer that publishes `davis.wind.sensor_status`
    /// and counts reconnects.
    pub fn new(
        source: FrameSource<O>,
        params: ParamsReader,
        queue: Arc<CalibrationQueue>,
        publisher: Arc<dyn Publisher>,
        options: AcquisitionOptions,
    ) -> Self {
        let stats = Arc::new(AcquisitionStats::default());

        let observer_publisher = Arc::clone(&publisher);
        let observer_stats = Arc::clone(&stats);
        let source = source.with_observer(Box::new(move |state: ConnectionState| match state {
            ConnectionState::Connected => publish_sensor_status(&*observer_publisher, true),
            ConnectionState::Disconnected => {
                observer_stats.reconnects.fetch_add(1, Ordering::Relaxed);
                publish_sensor_status(&*observer_publisher, false);
            }
            ConnectionState::Error => publish_sensor_status(&*observer_publisher, false),
        }));

        Self {
            source,
            pipeline: Pipeline {
                params,
                aggregator: IntervalAggregator::aligned(options.window, Utc::now()),
                queue,
                publisher,
                stats,
                publish_samples: options.publish_samples,
            },
        }
    }

    /// Build the frame source from configuration as well
    pub fn from_config(
        opener: O,
        config: &WindvaneConfig,
        params: ParamsReader,
        queue: Arc<CalibrationQueue>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let source = FrameSource::new(opener, config.serial.backoff(), config.serial.max_line_len);
        Self::new(source, params, queue, publisher, config.into())
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<AcquisitionStats> {
        Arc::clone(&self.pipeline.stats)
    }

    /// Open the connection now, surfacing a missing device at startup
    pub fn connect(&mut self) -> Result<(), SourceError> {
        self.source.connect()
    }

    /// Run until cancelled
    ///
    /// Returns `Err` only for [`SourceError::DeviceNotFound`] on the first
    /// open. On cancellation the open window is flushed as a final, possibly
    /// partial, report and the connection is dropped.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<AcquisitionStatsSnapshot, SourceError> {
        self.source.connect()?;

        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_TICK);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let Self {
            mut source,
            mut pipeline,
        } = self;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                line = source.next_line() => {
                    let line = line?;
                    pipeline.count_discarded(source.take_discarded());
                    pipeline.handle_line(&line);
                }
                _ = housekeeping.tick() => {
                    let reports = pipeline.aggregator.close_due(Utc::now());
                    pipeline.emit(reports);
                }
            }
        }

        pipeline.count_discarded(source.take_discarded());
        let reports = pipeline.aggregator.close_due(Utc::now());
        pipeline.emit(reports);
        let last = pipeline.aggregator.flush(Utc::now());
        pipeline.emit_one(&last);
        drop(source);

        let stats = pipeline.stats.snapshot();
        info!(
            lines = stats.lines,
            samples = stats.samples,
            malformed = stats.malformed,
            reconnects = stats.reconnects,
            reports = stats.reports,
            "Acquisition stopped"
        );
        Ok(stats)
    }
}
