//! Demo Mode - Simulated Davis sensor
//!
//! Generates realistic `wind:` lines so the whole pipeline can run without
//! hardware. Simulates a steady breeze of ~10 knots with slowly veering
//! direction and random gusts.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::protocol::{OpenError, PortOpener, PortStream, RawSample};

/// Debounced RPM of the steady breeze (about 10 knots at factor 1.0)
const BASE_RPM: f64 = 52.0;

/// Pot value the vane wanders around (roughly south-west)
const BASE_POT: f64 = 640.0;

/// Simulated Davis anemometer that generates raw samples
pub struct DemoSimulator {
    /// Time when simulation started (ms)
    start_time_ms: Option<u64>,
    /// Last update time (ms)
    last_update_ms: u64,
    /// Time of next gust (ms from start)
    next_gust_at_ms: u64,
    gust_state: GustState,
    /// Current RPM (smoothed)
    current_rpm: f64,
    /// Peak RPM for the current gust
    gust_peak_rpm: f64,
    iteration: u32,
    rng: StdRng,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum GustState {
    /// Steady breeze
    Steady,
    /// Gust building
    Rise { start_ms: u64 },
    /// At gust peak
    Hold { start_ms: u64 },
    /// Gust dying off
    Decay { start_ms: u64 },
}

const RISE_MS: u64 = 2_000;
const HOLD_MS: u64 = 3_000;
const DECAY_MS: u64 = 6_000;

impl Default for DemoSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoSimulator {
    /// Create a simulator seeded from entropy
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a reproducible simulator
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(mut rng: StdRng) -> Self {
        let first_gust = rng.gen_range(10_000..25_000);
        Self {
            start_time_ms: None,
            last_update_ms: 0,
            next_gust_at_ms: first_gust,
            gust_state: GustState::Steady,
            current_rpm: BASE_RPM,
            gust_peak_rpm: BASE_RPM,
            iteration: 0,
            rng,
        }
    }

    /// Advance the simulation and produce the next sample
    ///
    /// # Arguments
    /// * `elapsed_ms` - Milliseconds since an arbitrary fixed origin
    pub fn update(&mut self, elapsed_ms: u64) -> RawSample {
        let start = *self.start_time_ms.get_or_insert(elapsed_ms);
        let sim_time = elapsed_ms.saturating_sub(start);
        let delta_ms = elapsed_ms.saturating_sub(self.last_update_ms.max(start));
        self.last_update_ms = elapsed_ms;

        self.update_gust_state(sim_time);

        // Cups have inertia: limit how fast RPM follows the wind
        let target_rpm = self.target_rpm(sim_time);
        let max_change = 30.0 * (delta_ms as f64 / 1000.0);
        self.current_rpm += (target_rpm - self.current_rpm).clamp(-max_change, max_change);

        let t = sim_time as f64 / 1000.0;
        let turbulence = 2.5 * (t * 1.7).sin() + self.rng.gen_range(-1.5..1.5);
        let rpm_tops = (self.current_rpm + turbulence).max(0.0);
        let rpm_raw = (rpm_tops + self.rng.gen_range(-3.0..3.0)).max(0.0);

        // Slow veer plus vane flutter, wrapped onto the pot range
        let veer = 40.0 * (t / 90.0).sin();
        let flutter = self.rng.gen_range(-12.0..12.0);
        let pot = (BASE_POT + veer + flutter).rem_euclid(1024.0);

        self.iteration = self.iteration.wrapping_add(1);
        RawSample {
            iteration: self.iteration,
            pot_value: pot.round() as u16 % 1024,
            rpm_tops: rpm_tops.round() as u32,
            rpm_raw: rpm_raw.round() as u32,
            received_at: chrono::Utc::now(),
        }
    }

    fn update_gust_state(&mut self, sim_time: u64) {
        match self.gust_state {
            GustState::Steady => {
                if sim_time >= self.next_gust_at_ms {
                    self.gust_peak_rpm = BASE_RPM * self.rng.gen_range(1.3..1.9);
                    self.gust_state = GustState::Rise { start_ms: sim_time };
                }
            }
            GustState::Rise { start_ms } => {
                if sim_time >= start_ms + RISE_MS {
                    self.gust_state = GustState::Hold { start_ms: sim_time };
                }
            }
            GustState::Hold { start_ms } => {
                if sim_time >= start_ms + HOLD_MS {
                    self.gust_state = GustState::Decay { start_ms: sim_time };
                }
            }
            GustState::Decay { start_ms } => {
                if sim_time >= start_ms + DECAY_MS {
                    self.gust_state = GustState::Steady;
                    self.next_gust_at_ms = sim_time + self.rng.gen_range(10_000..25_000);
                }
            }
        }
    }

    fn target_rpm(&self, sim_time: u64) -> f64 {
        match self.gust_state {
            GustState::Steady => BASE_RPM,
            GustState::Rise { start_ms } => {
                let progress = ((sim_time - start_ms) as f64 / RISE_MS as f64).min(1.0);
                BASE_RPM + (self.gust_peak_rpm - BASE_RPM) * progress
            }
            GustState::Hold { .. } => self.gust_peak_rpm,
            GustState::Decay { start_ms } => {
                let progress = ((sim_time - start_ms) as f64 / DECAY_MS as f64).min(1.0);
                self.gust_peak_rpm + (BASE_RPM - self.gust_peak_rpm) * progress
            }
        }
    }
}

/// [`PortOpener`] that serves simulated lines instead of a serial port
///
/// Each `open()` spawns a writer task feeding an in-memory pipe; the task
/// ends when the reading side is dropped.
#[derive(Debug, Clone)]
pub struct DemoOpener {
    period: Duration,
    seed: Option<u64>,
}

impl DemoOpener {
    /// Emit one line every `period`
    pub fn new(period: Duration) -> Self {
        Self { period, seed: None }
    }

    /// Use a fixed RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Default for DemoOpener {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl PortOpener for DemoOpener {
    fn open(&self) -> Result<PortStream, OpenError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| OpenError::Failed(format!("demo mode needs a tokio runtime: {}", e)))?;

        let (reader, mut writer) = tokio::io::duplex(4096);
        let mut sim = match self.seed {
            Some(seed) => DemoSimulator::with_seed(seed),
            None => DemoSimulator::new(),
        };
        let period = self.period;

        runtime.spawn(async move {
            let started = tokio::time::Instant::now();
            loop {
                tokio::time::sleep(period).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let line = format!("{}\r\n", sim.update(elapsed_ms).to_line());
                if writer.write_all(line.as_bytes()).await.is_err() {
                    debug!("Demo reader closed");
                    break;
                }
            }
        });

        Ok(Box::new(reader))
    }

    fn describe(&self) -> String {
        format!("demo sensor ({} ms/line)", self.period.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{convert, CalibrationParams};
    use crate::protocol::parse;

    #[test]
    fn test_lines_parse() {
        let mut sim = DemoSimulator::with_seed(7);
        for ms in (0..5_000).step_by(500) {
            let sample = sim.update(ms);
            let parsed = parse(&sample.to_line()).unwrap();
            assert_eq!(parsed.iteration, sample.iteration);
            assert_eq!(parsed.pot_value, sample.pot_value);
            assert_eq!(parsed.rpm_tops, sample.rpm_tops);
        }
    }

    #[test]
    fn test_steady_breeze_range() {
        let mut sim = DemoSimulator::with_seed(42);
        // Well before the earliest possible gust
        for ms in (0..9_000).step_by(250) {
            let reading = convert(&sim.update(ms), &CalibrationParams::default());
            assert!(
                reading.speed_knots > 7.0 && reading.speed_knots < 13.0,
                "speed {} out of breeze range",
                reading.speed_knots
            );
            assert!(reading.raw.pot_value < 1024);
        }
    }

    #[test]
    fn test_iteration_increments() {
        let mut sim = DemoSimulator::with_seed(1);
        let a = sim.update(0);
        let b = sim.update(500);
        assert_eq!(b.iteration, a.iteration + 1);
    }

    #[tokio::test]
    async fn test_opener_streams_lines() {
        use tokio::io::AsyncBufReadExt;

        let opener = DemoOpener::new(Duration::from_millis(5)).with_seed(3);
        let stream = opener.open().unwrap();
        let mut lines = tokio::io::BufReader::new(stream).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(parse(&line).is_ok(), "unparseable demo line {:?}", line);
    }
}
