use std::fmt;
use std::fmt::{Display, Formatter};

use itertools::Itertools;
use nalgebra::Complex;
use ordered_float::OrderedFloat;

use crate::chemistry::calibration::CalibrationParameters;
use crate::error::{FtmError, Result};

pub type Complex64 = Complex<f64>;

/// Frequency axis values of two spectra may differ by at most this much
/// before element-wise addition is rejected as a domain mismatch.
const DOMAIN_EPSILON: f64 = 1e-6;

/// One complex sample of a frequency-domain spectrum.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct FrequencyDatum {
    pub frequency: f64,
    pub intensity: Complex64,
}

impl FrequencyDatum {
    pub fn new(frequency: f64, intensity: Complex64) -> Self {
        FrequencyDatum { frequency, intensity }
    }

    /// Sample with a purely real intensity.
    pub fn real(frequency: f64, intensity: f64) -> Self {
        FrequencyDatum { frequency, intensity: Complex64::new(intensity, 0.0) }
    }

    pub fn magnitude(&self) -> f64 {
        self.intensity.norm()
    }
}

/// A frequency-domain mass spectrum with scan metadata and derived
/// statistics.
///
/// The sample sequence is strictly increasing in frequency. Derived
/// statistics (`max`, `mean`, `mean_square`, `variance` and the automatic
/// noise floor) are consistent with the data only after [`analyze`] has run;
/// mutating `data` directly leaves them stale until `analyze` is re-invoked.
///
/// [`analyze`]: FrequencySpectrum::analyze
#[derive(Clone, Debug)]
pub struct FrequencySpectrum {
    pub data: Vec<FrequencyDatum>,
    pub scan_number: i32,
    pub retention_time: f64,
    pub calibration: CalibrationParameters,
    pub observation_duration: f64,
    pub noise_floor: f64,

    shift: f64,
    scale: Complex64,

    max_index: Option<usize>,
    mean: f64,
    mean_square: f64,
    sum_squares: f64,
    variance: f64,
}

impl FrequencySpectrum {
    /// Builds a spectrum from raw samples with zeroed metadata and runs
    /// [`analyze`](FrequencySpectrum::analyze).
    pub fn new(data: Vec<FrequencyDatum>) -> Self {
        Self::with_metadata(data, 0, 0.0, CalibrationParameters::default(), 0.0, 0.0)
    }

    /// Builds a spectrum with explicit scan metadata. A nonzero `noise_floor`
    /// is kept as-is; a zero one is estimated from the data during the
    /// initial `analyze` pass.
    pub fn with_metadata(
        data: Vec<FrequencyDatum>,
        scan_number: i32,
        retention_time: f64,
        calibration: CalibrationParameters,
        observation_duration: f64,
        noise_floor: f64,
    ) -> Self {
        let mut spectrum = FrequencySpectrum {
            data,
            scan_number,
            retention_time,
            calibration,
            observation_duration,
            noise_floor,
            shift: 0.0,
            scale: Complex64::new(1.0, 0.0),
            max_index: None,
            mean: 0.0,
            mean_square: 0.0,
            sum_squares: 0.0,
            variance: 0.0,
        };
        spectrum.analyze();
        spectrum
    }

    /// Copies the samples in `[begin, end)` into a new spectrum carrying the
    /// same metadata. The range is clamped to the data, and an inverted
    /// range yields an empty spectrum.
    pub fn window(&self, begin: usize, end: usize) -> FrequencySpectrum {
        let begin = begin.min(self.data.len());
        let end = end.clamp(begin, self.data.len());
        Self::with_metadata(
            self.data[begin..end].to_vec(),
            self.scan_number,
            self.retention_time,
            self.calibration,
            self.observation_duration,
            self.noise_floor,
        )
    }

    /// Copies up to `2*radius + 1` samples around `center` into a new
    /// spectrum, clamping at the data boundaries.
    pub fn window_around(&self, center: usize, radius: usize) -> FrequencySpectrum {
        let begin = center.saturating_sub(radius);
        let end = (center + radius + 1).min(self.data.len());
        self.window(begin, end)
    }

    /// Recomputes the maximum-magnitude sample, `mean(|y|)`, `mean(|y|^2)`
    /// and the variance in a single pass. When the noise floor is unset
    /// (zero) it is estimated as `sqrt(median(|y|^2) * ln 2)`, a
    /// Rayleigh-consistent robust estimate.
    pub fn analyze(&mut self) {
        self.max_index = None;
        let mut sum = 0.0;
        self.sum_squares = 0.0;

        for (index, datum) in self.data.iter().enumerate() {
            let better = match self.max_index {
                Some(current) => datum.intensity.norm_sqr() > self.data[current].intensity.norm_sqr(),
                None => true,
            };
            if better {
                self.max_index = Some(index);
            }
            let value = datum.intensity.norm();
            sum += value;
            self.sum_squares += value * value;
        }

        if self.data.is_empty() {
            self.mean = 0.0;
            self.mean_square = 0.0;
            self.variance = 0.0;
            return;
        }

        let count = self.data.len() as f64;
        self.mean = sum / count;
        self.mean_square = self.sum_squares / count;
        self.variance = self.mean_square - self.mean * self.mean;

        if self.noise_floor == 0.0 {
            self.calculate_noise_floor();
        }
    }

    fn calculate_noise_floor(&mut self) {
        if self.data.is_empty() {
            return;
        }
        // f32 precision is enough for a median rank
        let mut square_intensities: Vec<f32> =
            self.data.iter().map(|d| d.intensity.norm_sqr() as f32).collect();
        square_intensities.sort_by_key(|v| OrderedFloat(*v));
        let median = square_intensities[square_intensities.len() / 2];
        self.noise_floor = (median as f64 * std::f64::consts::LN_2).sqrt();
    }

    /// Stricter noise estimate for data with zeroed regions: restrict the
    /// mean/variance to samples below `(mean + sqrt(variance))^2` and return
    /// `mean + sqrt(variance)` of the restricted set. `None` when no sample
    /// falls below the cutoff.
    pub fn cutoff_noise_floor(&self) -> Option<f64> {
        let cutoff = (self.mean + self.variance.sqrt()).powi(2);

        let mut count = 0usize;
        let mut sum = 0.0;
        let mut sum_squares = 0.0;
        for datum in &self.data {
            if datum.intensity.norm_sqr() < cutoff {
                let value = datum.intensity.norm();
                sum += value;
                sum_squares += value * value;
                count += 1;
            }
        }

        if count == 0 {
            return None;
        }

        let mean = sum / count as f64;
        let mean_square = sum_squares / count as f64;
        let variance = mean_square - mean * mean;
        Some(mean + variance.sqrt())
    }

    /// Estimates the observation duration as `1/averageFrequencyStep`,
    /// averaging only over adjacent pairs where both samples have nonzero
    /// magnitude (zero-signal gaps would bias the step). Falls back to all
    /// pairs, and returns 0 for empty or singleton data.
    pub fn observation_duration_estimated_from_data(&self) -> f64 {
        if self.data.len() < 2 {
            return 0.0;
        }

        let mut sum = 0.0;
        let mut count = 0.0;
        let mut sum_all = 0.0;
        let mut count_all = 0.0;

        for (previous, current) in self.data.iter().tuple_windows() {
            let difference = current.frequency - previous.frequency;
            if current.intensity.norm_sqr() > 0.0 && previous.intensity.norm_sqr() > 0.0 {
                count += 1.0;
                sum += difference;
            }
            count_all += 1.0;
            sum_all += difference;
        }

        if sum > 0.0 {
            count / sum
        } else if sum_all > 0.0 {
            count_all / sum_all
        } else {
            0.0
        }
    }

    /// Applies `(x, y) -> (x + shift, y * scale)` to every sample and
    /// accumulates the transform relative to the original data.
    pub fn transform(&mut self, shift: f64, scale: Complex64) {
        self.shift += shift;
        self.scale *= scale;
        for datum in &mut self.data {
            datum.frequency += shift;
            datum.intensity *= scale;
        }
    }

    /// Shifts the maximum-magnitude sample to frequency 0 and scales it to
    /// unit magnitude. No-op when the spectrum has no usable maximum.
    pub fn normalize(&mut self) {
        if let Some(index) = self.max_index {
            let max = self.data[index];
            let magnitude = max.intensity.norm();
            if magnitude > 0.0 {
                self.transform(-max.frequency, Complex64::new(1.0 / magnitude, 0.0));
            }
        }
    }

    /// Accumulated frequency shift relative to the original data.
    pub fn shift(&self) -> f64 {
        self.shift
    }

    /// Accumulated intensity scale relative to the original data.
    pub fn scale(&self) -> Complex64 {
        self.scale
    }

    /// Element-wise addition of another spectrum over the same frequency
    /// axis. Fails when the sample counts differ or any pair of frequencies
    /// disagrees by more than 1e-6.
    pub fn add_spectrum(&mut self, other: &FrequencySpectrum) -> Result<()> {
        if self.data.len() != other.data.len() {
            return Err(FtmError::SizeMismatch { left: self.data.len(), right: other.data.len() });
        }
        for (index, (left, right)) in self.data.iter().zip(other.data.iter()).enumerate() {
            if (left.frequency - right.frequency).abs() > DOMAIN_EPSILON {
                return Err(FtmError::DomainMismatch {
                    index,
                    left: left.frequency,
                    right: right.frequency,
                });
            }
        }
        for (left, right) in self.data.iter_mut().zip(other.data.iter()) {
            left.intensity += right.intensity;
        }
        Ok(())
    }

    /// Index of the sample closest to `frequency`; the data is
    /// frequency-sorted, so this is a binary search with a nearest-neighbor
    /// tie-break toward the earlier sample. Targets outside the domain clamp
    /// to the first or last sample. `None` for an empty spectrum.
    pub fn find_nearest_index(&self, frequency: f64) -> Option<usize> {
        if self.data.is_empty() {
            return None;
        }
        let above = self.data.partition_point(|d| d.frequency < frequency);
        if above == 0 {
            return Some(0);
        }
        if above == self.data.len() {
            return Some(self.data.len() - 1);
        }
        let below = above - 1;
        if (self.data[above].frequency - frequency).abs()
            < (self.data[below].frequency - frequency).abs()
        {
            Some(above)
        } else {
            Some(below)
        }
    }

    /// The sample closest to `frequency`; see
    /// [`find_nearest_index`](FrequencySpectrum::find_nearest_index).
    pub fn find_nearest(&self, frequency: f64) -> Option<&FrequencyDatum> {
        self.find_nearest_index(frequency).map(|index| &self.data[index])
    }

    /// Sample with the largest magnitude, as of the last `analyze` pass.
    pub fn max(&self) -> Option<&FrequencyDatum> {
        self.max_index.map(|index| &self.data[index])
    }

    pub fn max_index(&self) -> Option<usize> {
        self.max_index
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn mean_square(&self) -> f64 {
        self.mean_square
    }

    pub fn sum_squares(&self) -> f64 {
        self.sum_squares
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }
}

impl Display for FrequencySpectrum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FrequencySpectrum(scan: {}, data points: {}, noise floor: {:.4})",
            self.scan_number,
            self.data.len(),
            self.noise_floor
        )
    }
}
