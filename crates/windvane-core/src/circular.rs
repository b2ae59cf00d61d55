//! Circular statistics
//!
//! Angles cannot be averaged arithmetically: the mean of 350° and 10° is 0°,
//! not 180°. Every direction average in the crate goes through [`VectorSum`],
//! which accumulates unit vectors and reads back the resultant.

use crate::units::normalize_degrees;

/// Running sum of unit vectors for a set of angles
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VectorSum {
    sum_x: f64,
    sum_y: f64,
    count: u64,
}

impl VectorSum {
    /// Create an empty sum
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one angle in degrees
    pub fn push_degrees(&mut self, deg: f64) {
        let rad = deg.to_radians();
        self.sum_x += rad.cos();
        self.sum_y += rad.sin();
        self.count += 1;
    }

    /// Mean direction in `[0, 360)`, or `None` when empty
    ///
    /// A perfectly balanced set (e.g. 0° and 180°) has no defined direction;
    /// `atan2(0, 0)` yields 0° in that case and [`Self::resultant_length`]
    /// reports 0.0 so callers can tell.
    pub fn mean_degrees(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(normalize_degrees(self.sum_y.atan2(self.sum_x).to_degrees()))
    }

    /// Mean resultant length in `[0, 1]` (1.0 = all angles identical)
    pub fn resultant_length(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let r = (self.sum_x * self.sum_x + self.sum_y * self.sum_y).sqrt() / self.count as f64;
        Some(r.clamp(0.0, 1.0))
    }
}

impl FromIterator<f64> for VectorSum {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut sum = Self::new();
        for deg in iter {
            sum.push_degrees(deg);
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraparound_mean() {
        let sum: VectorSum = [350.0, 10.0].into_iter().collect();
        let mean = sum.mean_degrees().unwrap();
        assert!(mean < 1e-9 || (360.0 - mean) < 1e-9, "got {mean}");
    }

    #[test]
    fn test_empty_sum() {
        let sum = VectorSum::new();
        assert_eq!(sum.mean_degrees(), None);
        assert_eq!(sum.resultant_length(), None);
    }

    #[test]
    fn test_uniform_spread_has_no_resultant() {
        let sum: VectorSum = [0.0, 90.0, 180.0, 270.0].into_iter().collect();
        assert!(sum.resultant_length().unwrap() < 1e-9);
    }

    #[test]
    fn test_identical_angles_have_unit_resultant() {
        let sum: VectorSum = [42.0; 5].into_iter().collect();
        assert!((sum.resultant_length().unwrap() - 1.0).abs() < 1e-12);
        assert!((sum.mean_degrees().unwrap() - 42.0).abs() < 1e-9);
    }
}
