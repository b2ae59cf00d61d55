//! Continuous calibration engine
//!
//! Runs on its own task. Each cycle opens the calibration queue, pairs queued
//! Davis readings with the reference station's latest observation once per
//! tick, evaluates the pairs and either swaps in new parameters or skips.
//!
//! The engine never touches the serial port: readings reach it only through
//! [`CalibrationQueue`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::evaluate::{decide, evaluate, Decision};
use super::{
    CalibrationCycleResult, CalibrationQueue, CycleMode, ObservationPair, ParamsHandle, SkipReason,
};
use crate::config::ContinuousConfig;
use crate::convert::{CalibrationParams, Reading};
use crate::publish::{publish_calibration, Publisher};
use crate::reference::ReferenceSource;

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationPhase {
    Idle,
    BootstrapCollecting,
    BootstrapEvaluate,
    BootstrapRetryWait,
    OngoingWait,
    OngoingCollecting,
    OngoingEvaluate,
}

impl CalibrationPhase {
    fn collecting(mode: CycleMode) -> Self {
        match mode {
            CycleMode::Bootstrap => Self::BootstrapCollecting,
            CycleMode::Ongoing => Self::OngoingCollecting,
        }
    }

    fn evaluating(mode: CycleMode) -> Self {
        match mode {
            CycleMode::Bootstrap => Self::BootstrapEvaluate,
            CycleMode::Ongoing => Self::OngoingEvaluate,
        }
    }

    /// Whether the queue is open in this phase
    pub fn is_collecting(self) -> bool {
        matches!(self, Self::BootstrapCollecting | Self::OngoingCollecting)
    }
}

/// Observable engine state, published on every transition
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub phase: CalibrationPhase,
    pub cycles_applied: u64,
    pub cycles_skipped: u64,
    pub last_result: Option<CalibrationCycleResult>,
    pub last_skip: Option<SkipReason>,
    /// Parameters live after the last transition
    pub params: CalibrationParams,
    /// Wait scheduled before the next collection, if waiting
    pub next_wait: Option<Duration>,
}

impl EngineStatus {
    fn new(params: CalibrationParams) -> Self {
        Self {
            phase: CalibrationPhase::Idle,
            cycles_applied: 0,
            cycles_skipped: 0,
            last_result: None,
            last_skip: None,
            params,
            next_wait: None,
        }
    }
}

/// How one cycle ended
enum CycleOutcome {
    Applied,
    Skipped,
}

/// Calibration state machine
pub struct CalibrationEngine<R: ReferenceSource> {
    config: ContinuousConfig,
    params: ParamsHandle,
    queue: Arc<CalibrationQueue>,
    reference: R,
    publisher: Option<Arc<dyn Publisher>>,
    status: watch::Sender<EngineStatus>,
}

impl<R: ReferenceSource> CalibrationEngine<R> {
    pub fn new(
        config: ContinuousConfig,
        params: ParamsHandle,
        queue: Arc<CalibrationQueue>,
        reference: R,
    ) -> Self {
        let (status, _rx) = watch::channel(EngineStatus::new(params.current()));
        Self {
            config,
            params,
            queue,
            reference,
            publisher: None,
            status,
        }
    }

    /// Publish applied calibration under the `davis.calibration.*` topics
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Subscribe to state transitions
    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    /// Run cycles until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut mode = if self.config.skip_bootstrap {
            CycleMode::Ongoing
        } else {
            CycleMode::Bootstrap
        };
        info!(?mode, "Calibration engine started");

        loop {
            let samples = mode.samples(&self.config);
            self.set_phase(CalibrationPhase::collecting(mode), None);
            let Some(pairs) = self.collect(samples, &cancel).await else {
                break;
            };

            self.set_phase(CalibrationPhase::evaluating(mode), None);
            let outcome = self.evaluate_cycle(mode, &pairs);

            let (phase, wait) = match (mode, outcome) {
                (CycleMode::Bootstrap, CycleOutcome::Skipped) => (
                    CalibrationPhase::BootstrapRetryWait,
                    self.config.bootstrap_retry(),
                ),
                (CycleMode::Bootstrap, CycleOutcome::Applied) => {
                    info!("Bootstrap complete, switching to ongoing calibration");
                    mode = CycleMode::Ongoing;
                    (CalibrationPhase::OngoingWait, self.config.interval())
                }
                (CycleMode::Ongoing, _) => (CalibrationPhase::OngoingWait, self.config.interval()),
            };
            debug!(?phase, "Next calibration cycle in {}s", wait.as_secs());
            self.set_phase(phase, Some(wait));

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.queue.end();
        self.set_phase(CalibrationPhase::Idle, None);
        let status = self.status.borrow().clone();
        info!(
            applied = status.cycles_applied,
            skipped = status.cycles_skipped,
            "Calibration engine stopped"
        );
    }

    /// Collect up to `samples` pairs, one per tick
    ///
    /// Ticks with no fresh reference, a reference already paired, or no
    /// matching reading do not count toward `samples`; the collection gives up
    /// after `samples × max_tick_factor` ticks. `None` means cancelled.
    async fn collect(
        &self,
        samples: usize,
        cancel: &CancellationToken,
    ) -> Option<Vec<ObservationPair>> {
        let max_ticks = samples.saturating_mul(self.config.max_tick_factor as usize);
        let max_skew = self.config.max_pair_skew();
        let mut pairs = Vec::with_capacity(samples);
        let mut ticks = 0usize;
        let mut last_paired: Option<DateTime<Utc>> = None;

        self.queue.begin();
        while pairs.len() < samples && ticks < max_ticks {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.queue.end();
                    return None;
                }
                _ = tokio::time::sleep(self.config.sample_interval()) => {}
            }
            ticks += 1;

            let readings = self.queue.take_all();
            let Some(reference) = self.reference.latest() else {
                trace!(tick = ticks, "No fresh reference, tick skipped");
                continue;
            };
            if last_paired.is_some_and(|at| reference.received_at <= at) {
                trace!(tick = ticks, "Reference unchanged since last pair, tick skipped");
                continue;
            }
            let Some(reading) = nearest(&readings, reference.received_at, max_skew) else {
                trace!(tick = ticks, queued = readings.len(), "No matching reading, tick skipped");
                continue;
            };
            let pair = ObservationPair::new(reading, &reference);
            trace!(
                tick = ticks,
                davis_knots = pair.davis_speed_knots,
                reference_knots = pair.reference_speed_knots,
                davis_dir = pair.davis_direction_deg,
                reference_dir = pair.reference_direction_deg,
                "Calibration pair"
            );
            pairs.push(pair);
            last_paired = Some(reference.received_at);
        }
        self.queue.end();

        debug!(
            pairs = pairs.len(),
            ticks,
            evicted = self.queue.dropped(),
            "Collection finished"
        );
        Some(pairs)
    }

    fn evaluate_cycle(&self, mode: CycleMode, pairs: &[ObservationPair]) -> CycleOutcome {
        let current = self.params.current();
        let result = match evaluate(
            pairs,
            &current,
            self.config.min_pairs as usize,
            self.config.min_speed_knots,
        ) {
            Ok(result) => result,
            Err(reason) => return self.skip(mode, reason, None),
        };

        info!(
            ?mode,
            pairs = result.sample_count,
            usable = result.usable_count,
            speed_factor_suggestion = result.speed_factor_suggestion,
            direction_offset_suggestion = result.direction_offset_suggestion,
            speed_confidence = result.speed_confidence,
            direction_confidence = result.direction_confidence,
            "Calibration cycle evaluated"
        );

        let next = match decide(&result, &current, &mode.thresholds(&self.config)) {
            Decision::Apply(next) => next,
            Decision::Skip(reason) => return self.skip(mode, reason, Some(result)),
        };
        if let Err(e) = self.params.replace(next) {
            return self.skip(mode, e.into(), Some(result));
        }

        info!(
            ?mode,
            speed_factor_old = current.speed_factor,
            speed_factor_new = next.speed_factor,
            direction_offset_old = current.direction_offset,
            direction_offset_new = next.direction_offset,
            "Calibration applied"
        );
        if let Some(publisher) = self.publisher.as_deref() {
            publish_calibration(publisher, &next, &result);
        }
        self.status.send_modify(|s| {
            s.cycles_applied += 1;
            s.last_result = Some(result);
            s.last_skip = None;
            s.params = next;
        });
        CycleOutcome::Applied
    }

    fn skip(
        &self,
        mode: CycleMode,
        reason: SkipReason,
        result: Option<CalibrationCycleResult>,
    ) -> CycleOutcome {
        match reason {
            SkipReason::Rejected(_) => warn!(?mode, "Calibration suggestion rejected: {}", reason),
            _ => warn!(?mode, "Calibration cycle skipped: {}", reason),
        }
        self.status.send_modify(|s| {
            s.cycles_skipped += 1;
            s.last_skip = Some(reason);
            if result.is_some() {
                s.last_result = result;
            }
        });
        CycleOutcome::Skipped
    }

    fn set_phase(&self, phase: CalibrationPhase, next_wait: Option<Duration>) {
        let params = self.params.current();
        self.status.send_modify(|s| {
            s.phase = phase;
            s.next_wait = next_wait;
            s.params = params;
        });
    }
}

/// Reading closest in time to `at`, if within `max_skew`
fn nearest(readings: &[Reading], at: DateTime<Utc>, max_skew: Duration) -> Option<&Reading> {
    let max_ms = i64::try_from(max_skew.as_millis()).unwrap_or(i64::MAX);
    readings
        .iter()
        .map(|r| (r, (r.at - at).num_milliseconds().abs()))
        .filter(|(_, skew)| *skew <= max_ms)
        .min_by_key(|(_, skew)| *skew)
        .map(|(r, _)| r)
}
