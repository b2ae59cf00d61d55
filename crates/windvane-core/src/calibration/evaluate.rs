//! Cycle evaluation
//!
//! Pure functions from a set of Davis/reference pairs to a suggestion, and
//! from a suggestion to an apply/skip decision.
//!
//! Only usable pairs, where both sensors read at least `min_speed_knots`,
//! feed the suggestions and confidences. Speed confidence is `1 / (1 + cv)`
//! over the per-pair speed ratios, where `cv` is their coefficient of
//! variation, scaled by the usable share of the collection: pairs where one
//! sensor sees wind and the other reads calm count as disagreement. Direction
//! confidence is the mean resultant length of the per-pair angle differences,
//! so a constant offset scores 1 and random scatter scores 0.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CalibrationError;
use crate::circular::VectorSum;
use crate::config::ContinuousConfig;
use crate::convert::{CalibrationParams, Reading};
use crate::reference::ReferenceSample;
use crate::units::wrap_signed_degrees;

/// One Davis reading matched with one reference observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservationPair {
    pub davis_speed_knots: f64,
    pub davis_direction_deg: f64,
    pub reference_speed_knots: f64,
    pub reference_direction_deg: f64,
}

impl ObservationPair {
    pub fn new(reading: &Reading, reference: &ReferenceSample) -> Self {
        Self {
            davis_speed_knots: reading.speed_knots,
            davis_direction_deg: reading.direction_deg,
            reference_speed_knots: reference.speed_knots,
            reference_direction_deg: reference.direction_deg,
        }
    }
}

/// What one evaluated cycle suggests
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCycleResult {
    /// Absolute speed factor that would make the Davis mean match the reference
    pub speed_factor_suggestion: f64,
    /// Absolute direction offset, in `[-180, 180)`
    pub direction_offset_suggestion: f64,
    pub speed_confidence: f64,
    pub direction_confidence: f64,
    /// Pairs collected
    pub sample_count: usize,
    /// Pairs with wind on both sensors
    pub usable_count: usize,
}

/// Bootstrap establishes a baseline; ongoing nudges it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleMode {
    Bootstrap,
    Ongoing,
}

/// Gates and step size for one mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleThresholds {
    pub speed_confidence: f64,
    /// 0.0 turns the direction gate off
    pub direction_confidence: f64,
    /// Fraction of the suggested change to apply
    pub adjustment_rate: f64,
}

impl CycleMode {
    pub fn thresholds(self, config: &ContinuousConfig) -> CycleThresholds {
        match self {
            CycleMode::Bootstrap => CycleThresholds {
                speed_confidence: config.bootstrap_speed_confidence_threshold,
                direction_confidence: config.bootstrap_direction_confidence_threshold,
                adjustment_rate: 1.0,
            },
            CycleMode::Ongoing => CycleThresholds {
                speed_confidence: config.speed_confidence_threshold,
                direction_confidence: config.direction_confidence_threshold,
                adjustment_rate: config.adjustment_rate,
            },
        }
    }

    /// Pairs to collect per cycle
    pub fn samples(self, config: &ContinuousConfig) -> usize {
        match self {
            CycleMode::Bootstrap => config.bootstrap_samples as usize,
            CycleMode::Ongoing => config.samples_per_cycle as usize,
        }
    }
}

/// Why a cycle left the parameters alone
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    #[error("only {got} usable pairs, need {need}")]
    TooFewPairs { got: usize, need: usize },

    #[error("only {usable} of {total} pairs have wind on both sensors")]
    CalmWind { usable: usize, total: usize },

    #[error("speed confidence {confidence:.3} below {threshold:.3}")]
    LowSpeedConfidence { confidence: f64, threshold: f64 },

    #[error("direction confidence {confidence:.3} below {threshold:.3}")]
    LowDirectionConfidence { confidence: f64, threshold: f64 },

    #[error("suggestion rejected: {0}")]
    Rejected(#[from] CalibrationError),
}

/// Outcome of [`decide`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Apply(CalibrationParams),
    Skip(SkipReason),
}

/// Compute suggestions and confidences for a collection
pub fn evaluate(
    pairs: &[ObservationPair],
    current: &CalibrationParams,
    min_pairs: usize,
    min_speed_knots: f64,
) -> Result<CalibrationCycleResult, SkipReason> {
    let n = pairs.len();
    if n == 0 || n < min_pairs {
        return Err(SkipReason::TooFewPairs {
            got: n,
            need: min_pairs.max(1),
        });
    }

    let usable: Vec<&ObservationPair> = pairs
        .iter()
        .filter(|p| {
            p.davis_speed_knots >= min_speed_knots && p.reference_speed_knots >= min_speed_knots
        })
        .collect();
    if usable.len() < min_pairs.max(1) {
        return Err(SkipReason::CalmWind {
            usable: usable.len(),
            total: n,
        });
    }

    let m = usable.len() as f64;
    let mean_davis = usable.iter().map(|p| p.davis_speed_knots).sum::<f64>() / m;
    let mean_reference = usable.iter().map(|p| p.reference_speed_knots).sum::<f64>() / m;
    let speed_factor_suggestion = current.speed_factor * (mean_reference / mean_davis);

    let differences: VectorSum = usable
        .iter()
        .map(|p| wrap_signed_degrees(p.reference_direction_deg - p.davis_direction_deg))
        .collect();
    let mean_difference = differences.mean_degrees().unwrap_or(0.0);
    let direction_offset_suggestion =
        wrap_signed_degrees(current.direction_offset + mean_difference);

    if !(speed_factor_suggestion.is_finite() && direction_offset_suggestion.is_finite()) {
        return Err(CalibrationError::NonFiniteSuggestion.into());
    }
    if speed_factor_suggestion <= 0.0 {
        return Err(CalibrationError::NonPositiveSpeedFactor(speed_factor_suggestion).into());
    }

    let usable_share = m / n as f64;
    Ok(CalibrationCycleResult {
        speed_factor_suggestion,
        direction_offset_suggestion,
        speed_confidence: ratio_agreement(&usable) * usable_share,
        direction_confidence: differences.resultant_length().unwrap_or(0.0),
        sample_count: n,
        usable_count: usable.len(),
    })
}

/// `1 / (1 + cv)` of the per-pair speed ratios; 0.0 with fewer than two
fn ratio_agreement(usable: &[&ObservationPair]) -> f64 {
    if usable.len() < 2 {
        return 0.0;
    }
    let ratios: Vec<f64> = usable
        .iter()
        .map(|p| p.reference_speed_knots / p.davis_speed_knots)
        .collect();
    let n = ratios.len() as f64;
    let mean = ratios.iter().sum::<f64>() / n;
    let variance = ratios.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let cv = variance.sqrt() / mean;
    if cv.is_finite() {
        1.0 / (1.0 + cv)
    } else {
        0.0
    }
}

/// Gate a result on confidence and work out the parameters to apply
///
/// Applies `adjustment_rate` of the way from `current` toward the
/// suggestion; the offset moves along the shorter arc.
pub fn decide(
    result: &CalibrationCycleResult,
    current: &CalibrationParams,
    thresholds: &CycleThresholds,
) -> Decision {
    if result.speed_confidence < thresholds.speed_confidence {
        return Decision::Skip(SkipReason::LowSpeedConfidence {
            confidence: result.speed_confidence,
            threshold: thresholds.speed_confidence,
        });
    }
    if result.direction_confidence < thresholds.direction_confidence {
        return Decision::Skip(SkipReason::LowDirectionConfidence {
            confidence: result.direction_confidence,
            threshold: thresholds.direction_confidence,
        });
    }

    let rate = thresholds.adjustment_rate;
    let speed_factor =
        current.speed_factor + rate * (result.speed_factor_suggestion - current.speed_factor);
    let offset_delta =
        wrap_signed_degrees(result.direction_offset_suggestion - current.direction_offset);
    let direction_offset = wrap_signed_degrees(current.direction_offset + rate * offset_delta);

    if !(speed_factor.is_finite() && direction_offset.is_finite()) {
        return Decision::Skip(CalibrationError::NonFiniteSuggestion.into());
    }
    if speed_factor <= 0.0 {
        return Decision::Skip(CalibrationError::NonPositiveSpeedFactor(speed_factor).into());
    }

    Decision::Apply(CalibrationParams {
        speed_factor,
        direction_offset,
        direction_scale: current.direction_scale,
    })
}
