use chrono::{DateTime, TimeDelta, Utc};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use windvane_core::calibration::{
    CalibrationEngine, CalibrationError, CalibrationPhase, CalibrationQueue, EngineStatus,
    ParamsHandle, SkipReason,
};
use windvane_core::config::ContinuousConfig;
use windvane_core::convert::{CalibrationParams, Reading};
use windvane_core::protocol::RawSample;
use windvane_core::publish::{topics, ChannelPublisher};
use windvane_core::reference::{ReferenceKind, ReferenceSample, ReferenceSource};

static STAMPS: AtomicI64 = AtomicI64::new(0);

/// Strictly increasing receive time, one per reference packet
fn stamp() -> DateTime<Utc> {
    Utc::now() + TimeDelta::microseconds(STAMPS.fetch_add(1, Ordering::SeqCst))
}

fn sample(speed_knots: f64, direction_deg: f64, received_at: DateTime<Utc>) -> ReferenceSample {
    ReferenceSample {
        speed_knots,
        direction_deg,
        observed_at: received_at,
        received_at,
        kind: ReferenceKind::RapidWind,
    }
}

/// Reference that reports the same wind in a new packet every time (or nothing)
struct FixedReference(Option<(f64, f64)>);

impl ReferenceSource for FixedReference {
    fn latest(&self) -> Option<ReferenceSample> {
        let (speed_knots, direction_deg) = self.0?;
        Some(sample(speed_knots, direction_deg, stamp()))
    }
}

/// Reference whose packets alternate between wind and flat calm
struct GustyReference {
    knots: f64,
    packets: AtomicUsize,
}

impl ReferenceSource for GustyReference {
    fn latest(&self) -> Option<ReferenceSample> {
        let packet = self.packets.fetch_add(1, Ordering::SeqCst);
        let knots = if packet % 2 == 0 { self.knots } else { 0.0 };
        Some(sample(knots, 90.0, stamp()))
    }
}

/// Reference that never receives a second packet
struct SinglePacketReference(ReferenceSample);

impl ReferenceSource for SinglePacketReference {
    fn latest(&self) -> Option<ReferenceSample> {
        Some(self.0)
    }
}

fn reading(speed_knots: f64, direction_deg: f64) -> Reading {
    let at = Utc::now();
    Reading {
        speed_mps: speed_knots / 1.94384,
        speed_knots,
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

/// Stand-in for the acquisition loop: one reading per second
fn spawn_feeder(
    queue: Arc<CalibrationQueue>,
    speed_knots: f64,
    direction_deg: f64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
            queue.offer(reading(speed_knots, direction_deg));
        }
    })
}

struct Harness {
    params: ParamsHandle,
    queue: Arc<CalibrationQueue>,
    status: tokio::sync::watch::Receiver<EngineStatus>,
    cancel: CancellationToken,
    engine: JoinHandle<()>,
    feeder: JoinHandle<()>,
}

impl Harness {
    fn start(
        config: ContinuousConfig,
        reference: impl ReferenceSource + 'static,
        davis: (f64, f64),
        publisher: Option<ChannelPublisher>,
    ) -> Self {
        let params = ParamsHandle::default();
        let queue = Arc::new(CalibrationQueue::new(64));
        let cancel = CancellationToken::new();
        let mut engine = CalibrationEngine::new(config, params.clone(), Arc::clone(&queue), reference);
        if let Some(publisher) = publisher {
            engine = engine.with_publisher(Arc::new(publisher));
        }
        let status = engine.status();
        let feeder = spawn_feeder(Arc::clone(&queue), davis.0, davis.1, cancel.clone());
        let engine = tokio::spawn(engine.run(cancel.clone()));
        Self {
            params,
            queue,
            status,
            cancel,
            engine,
            feeder,
        }
    }

    async fn wait_for_cycles(&mut self, cycles: u64) -> EngineStatus {
        self.status
            .wait_for(|s| s.cycles_applied + s.cycles_skipped >= cycles)
            .await
            .unwrap()
            .clone()
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.engine.await.unwrap();
        self.feeder.await.unwrap();
        assert!(!self.queue.is_collecting());
    }
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_applies_full_ratio() {
    let (publisher, mut records) = ChannelPublisher::new(64);
    let mut h = Harness::start(
        ContinuousConfig::default(),
        FixedReference(Some((10.0, 90.0))),
        (9.0, 90.0),
        Some(publisher),
    );

    let status = h.wait_for_cycles(1).await;
    assert_eq!(status.cycles_applied, 1);
    assert_eq!(status.phase, CalibrationPhase::OngoingWait);
    assert_eq!(status.next_wait, Some(Duration::from_secs(900)));

    let params = h.params.current();
    assert!((params.speed_factor - 1.111).abs() < 1e-3);
    assert!(params.direction_offset.abs() < 1e-9);
    assert_eq!(status.params, params);

    let result = status.last_result.unwrap();
    assert_eq!(result.sample_count, 10);
    assert!(result.speed_confidence > 0.99);

    let record = records.try_recv().unwrap();
    assert_eq!(record.topic, topics::CAL_SPEED_FACTOR);
    assert!((record.value - 10.0 / 9.0).abs() < 1e-9);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_ongoing_moves_thirty_percent() {
    let config = ContinuousConfig {
        skip_bootstrap: true,
        ..Default::default()
    };
    let mut h = Harness::start(config, FixedReference(Some((10.0, 90.0))), (9.0, 90.0), None);

    let status = h.wait_for_cycles(1).await;
    assert_eq!(status.cycles_applied, 1);
    let factor = h.params.current().speed_factor;
    assert!((factor - (1.0 + 0.3 * (10.0 / 9.0 - 1.0))).abs() < 1e-9);
    assert!((factor - 1.0333).abs() < 1e-3);
    assert_eq!(status.last_result.unwrap().sample_count, 20);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_direction_offset_learned_in_bootstrap() {
    let mut h = Harness::start(
        ContinuousConfig::default(),
        FixedReference(Some((10.0, 5.0))),
        (10.0, 350.0),
        None,
    );
    h.wait_for_cycles(1).await;
    let params = h.params.current();
    assert!((params.direction_offset - 15.0).abs() < 1e-6);
    assert!((params.speed_factor - 1.0).abs() < 1e-9);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_reference_schedules_bootstrap_retry() {
    let mut h = Harness::start(
        ContinuousConfig::default(),
        FixedReference(None),
        (9.0, 90.0),
        None,
    );

    let status = h.wait_for_cycles(1).await;
    assert_eq!(status.cycles_applied, 0);
    assert_eq!(status.cycles_skipped, 1);
    assert_eq!(status.phase, CalibrationPhase::BootstrapRetryWait);
    assert_eq!(status.next_wait, Some(Duration::from_secs(180)));
    assert_eq!(
        status.last_skip,
        Some(SkipReason::TooFewPairs { got: 0, need: 3 })
    );
    assert_eq!(h.params.current(), CalibrationParams::default());
    assert!(!h.queue.is_collecting());

    // Still bootstrapping on the next attempt
    let status = h.wait_for_cycles(2).await;
    assert_eq!(status.phase, CalibrationPhase::BootstrapRetryWait);
    assert_eq!(status.cycles_skipped, 2);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_reference_in_ongoing_waits_full_interval() {
    let config = ContinuousConfig {
        skip_bootstrap: true,
        ..Default::default()
    };
    let mut h = Harness::start(config, FixedReference(None), (9.0, 90.0), None);

    let status = h.wait_for_cycles(1).await;
    assert_eq!(status.cycles_skipped, 1);
    assert_eq!(status.phase, CalibrationPhase::OngoingWait);
    assert_eq!(status.next_wait, Some(Duration::from_secs(900)));
    assert_eq!(h.params.current(), CalibrationParams::default());

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_non_finite_suggestion_is_rejected() {
    let mut h = Harness::start(
        ContinuousConfig::default(),
        FixedReference(Some((f64::INFINITY, 90.0))),
        (9.0, 90.0),
        None,
    );

    let status = h.wait_for_cycles(1).await;
    assert_eq!(
        status.last_skip,
        Some(SkipReason::Rejected(CalibrationError::NonFiniteSuggestion))
    );
    assert_eq!(h.params.current(), CalibrationParams::default());

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_calm_davis_is_skipped() {
    let mut h = Harness::start(
        ContinuousConfig::default(),
        FixedReference(Some((3.0, 90.0))),
        (0.0, 90.0),
        None,
    );

    let status = h.wait_for_cycles(1).await;
    assert!(matches!(status.last_skip, Some(SkipReason::CalmWind { .. })));
    assert_eq!(h.params.current(), CalibrationParams::default());

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_calm_reference_is_skipped() {
    let mut h = Harness::start(
        ContinuousConfig::default(),
        FixedReference(Some((0.0, 90.0))),
        (9.0, 90.0),
        None,
    );

    let status = h.wait_for_cycles(1).await;
    assert_eq!(
        status.last_skip,
        Some(SkipReason::CalmWind { usable: 0, total: 10 })
    );
    assert_eq!(h.params.current(), CalibrationParams::default());

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_calm_reference_packets_do_not_drag_the_factor_down() {
    let reference = GustyReference {
        knots: 10.0,
        packets: AtomicUsize::new(0),
    };
    let mut h = Harness::start(ContinuousConfig::default(), reference, (9.0, 90.0), None);

    let status = h.wait_for_cycles(1).await;
    assert_eq!(status.cycles_applied, 1);
    let result = status.last_result.unwrap();
    assert_eq!(result.sample_count, 10);
    assert_eq!(result.usable_count, 5);
    assert!((result.speed_confidence - 0.5).abs() < 1e-6);
    assert!((h.params.current().speed_factor - 10.0 / 9.0).abs() < 1e-6);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_reference_packet_is_paired_only_once() {
    let reference = SinglePacketReference(sample(10.0, 90.0, Utc::now()));
    let mut h = Harness::start(ContinuousConfig::default(), reference, (9.0, 90.0), None);

    let status = h.wait_for_cycles(1).await;
    assert_eq!(
        status.last_skip,
        Some(SkipReason::TooFewPairs { got: 1, need: 3 })
    );
    assert_eq!(h.params.current(), CalibrationParams::default());

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_collection() {
    let mut h = Harness::start(
        ContinuousConfig::default(),
        FixedReference(Some((10.0, 90.0))),
        (9.0, 90.0),
        None,
    );
    h.status
        .wait_for(|s| s.phase == CalibrationPhase::BootstrapCollecting)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert!(h.queue.is_collecting());

    let mut status = h.status.clone();
    h.stop().await;
    assert_eq!(status.borrow_and_update().phase, CalibrationPhase::Idle);
}
