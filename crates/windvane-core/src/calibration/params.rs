//! Shared calibration snapshot
//!
//! A `watch` channel holding a `Copy` value: readers copy the whole struct out,
//! the engine replaces the whole struct, and nobody can see half an update.

use std::sync::Arc;
use tokio::sync::watch;

use super::CalibrationError;
use crate::convert::CalibrationParams;

/// Write side, owned by the calibration engine
#[derive(Debug, Clone)]
pub struct ParamsHandle {
    tx: Arc<watch::Sender<CalibrationParams>>,
}

/// Read side, cloned into the acquisition loop
#[derive(Debug, Clone)]
pub struct ParamsReader {
    rx: watch::Receiver<CalibrationParams>,
}

impl ParamsHandle {
    pub fn new(initial: CalibrationParams) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Copy of the live parameters
    pub fn current(&self) -> CalibrationParams {
        *self.tx.borrow()
    }

    /// Swap in a new snapshot; invalid parameters are refused and the old
    /// snapshot stays live
    pub fn replace(&self, params: CalibrationParams) -> Result<CalibrationParams, CalibrationError> {
        if !(params.speed_factor.is_finite()
            && params.direction_offset.is_finite()
            && params.direction_scale.is_finite())
        {
            return Err(CalibrationError::NonFiniteSuggestion);
        }
        if params.speed_factor <= 0.0 {
            return Err(CalibrationError::NonPositiveSpeedFactor(params.speed_factor));
        }
        if params.direction_scale <= 0.0 {
            return Err(CalibrationError::NonPositiveDirectionScale(params.direction_scale));
        }
        Ok(self.tx.send_replace(params))
    }

    /// New reader starting at the current snapshot
    pub fn reader(&self) -> ParamsReader {
        ParamsReader {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ParamsHandle {
    fn default() -> Self {
        Self::new(CalibrationParams::default())
    }
}

impl ParamsReader {
    /// Copy of the live parameters
    pub fn current(&self) -> CalibrationParams {
        *self.rx.borrow()
    }
}
