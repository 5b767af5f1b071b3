use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Default calibration coefficients for Thermo FT instruments.
pub const THERMO_A_FT: f64 = 1.075e8;
pub const THERMO_B_FT: f64 = -3.455e8;

/// Two-parameter frequency calibration: `mz(f) = A/f + B/f^2`.
///
/// The inverse mapping solves the quadratic `mz*f^2 - A*f - B = 0` for the
/// positive root, degenerating to the reciprocal form when `B == 0`.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct CalibrationParameters {
    pub a: f64,
    pub b: f64,
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        CalibrationParameters { a: 0.0, b: 0.0 }
    }
}

impl CalibrationParameters {
    pub fn new(a: f64, b: f64) -> Self {
        CalibrationParameters { a, b }
    }

    pub fn thermo_ft() -> Self {
        CalibrationParameters { a: THERMO_A_FT, b: THERMO_B_FT }
    }

    /// m/z observed at a given frequency.
    pub fn mz(&self, frequency: f64) -> f64 {
        self.a / frequency + self.b / (frequency * frequency)
    }

    /// Frequency at which a given m/z is observed.
    pub fn frequency(&self, mz: f64) -> f64 {
        if self.b == 0.0 {
            self.a / mz
        } else {
            (self.a + (self.a * self.a + 4.0 * self.b * mz).sqrt()) / (2.0 * mz)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mz_frequency_round_trip() {
        let cp = CalibrationParameters::thermo_ft();
        for mz in [400.0, 800.0, 1200.0, 2000.0] {
            let frequency = cp.frequency(mz);
            let back = cp.mz(frequency);
            assert!((back - mz).abs() / mz < 1e-10);
        }
    }

    #[test]
    fn test_reciprocal_form_without_b() {
        let cp = CalibrationParameters::new(1.075e8, 0.0);
        assert!((cp.frequency(1000.0) - 107500.0).abs() < 1e-9);
        assert!((cp.mz(107500.0) - 1000.0).abs() < 1e-12);
    }
}
