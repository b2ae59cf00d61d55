use thiserror::Error;

/// A calibration suggestion that cannot be applied
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum CalibrationError {
    #[error("Suggested speed factor {0} is not positive")]
    NonPositiveSpeedFactor(f64),

    #[error("Direction scale {0} is not positive")]
    NonPositiveDirectionScale(f64),

    #[error("Suggested calibration is not finite")]
    NonFiniteSuggestion,
}
