//! Continuous Calibration
//!
//! Compares the Davis sensor against a reference station and nudges the
//! speed factor and direction offset toward agreement.
//!
//! - [`ParamsHandle`] / [`ParamsReader`]: the live calibration snapshot
//! - [`CalibrationQueue`]: readings handed from acquisition to the engine
//! - [`evaluate`] / [`decide`]: the per-cycle math
//! - [`CalibrationEngine`]: the bootstrap/ongoing state machine

mod engine;
mod error;
mod evaluate;
mod params;
mod queue;

pub use engine::{CalibrationEngine, CalibrationPhase, EngineStatus};
pub use error::CalibrationError;
pub use evaluate::{
    decide, evaluate, CalibrationCycleResult, CycleMode, CycleThresholds, Decision,
    ObservationPair, SkipReason,
};
pub use params::{ParamsHandle, ParamsReader};
pub use queue::CalibrationQueue;
