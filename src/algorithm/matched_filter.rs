//! Matched-filter correlation of a frequency spectrum against a bank of
//! phase-shifted kernels.
//!
//! The spectrum is first resampled onto a uniform frequency grid (instrument
//! scans can contain zero-filled holes). A bank of `filter_match_rate`
//! energy-normalized filters is then sampled from a caller-supplied kernel,
//! one per sub-bin phase shift, and each filter is correlated against every
//! window of the grid. Candidate peaks are above-threshold, low-angle local
//! maxima of the resulting correlation table.

use itertools::Itertools;
use tracing::warn;

use crate::data::spectrum::{Complex64, FrequencySpectrum};
use crate::error::{FtmError, Result};

/// First and mean frequency steps may differ by at most this much before the
/// data is rejected as irregularly spaced.
const STEP_TOLERANCE: f64 = 0.03;

/// Uniformly spaced complex samples over a closed frequency domain.
#[derive(Clone, Debug)]
pub struct SampledSpectrum {
    pub domain: (f64, f64),
    pub samples: Vec<Complex64>,
}

impl SampledSpectrum {
    pub fn domain_width(&self) -> f64 {
        self.domain.1 - self.domain.0
    }

    /// Spacing between adjacent samples; 0 for fewer than two samples.
    pub fn dx(&self) -> f64 {
        if self.samples.len() < 2 {
            0.0
        } else {
            self.domain_width() / (self.samples.len() - 1) as f64
        }
    }

    pub fn frequency(&self, index: usize) -> f64 {
        self.domain.0 + self.dx() * index as f64
    }

    /// Resamples a spectrum onto a uniform grid, filling holes with zeros.
    ///
    /// The grid step comes from the average step over pairs that end in a
    /// nonzero sample (steps into holes would inflate it). A real sample is
    /// assigned to the grid slot within slightly more than half a step of
    /// its nominal frequency, which lets real and ideal frequencies fall
    /// back into sync after a hole.
    pub fn from_spectrum(spectrum: &FrequencySpectrum) -> Result<SampledSpectrum> {
        if spectrum.data.is_empty() {
            return Err(FtmError::EmptySpectrum);
        }

        let step = frequency_step(spectrum)?;
        let domain = (
            spectrum.data.first().map(|d| d.frequency).unwrap_or(0.0),
            spectrum.data.last().map(|d| d.frequency).unwrap_or(0.0),
        );
        let sample_count = ((domain.1 - domain.0) / step).round() as usize + 1;

        let mut samples = vec![Complex64::new(0.0, 0.0); sample_count];
        let mut source = spectrum.data.iter();
        let mut current = source.next();
        for (index, slot) in samples.iter_mut().enumerate() {
            let frequency = domain.0 + step * index as f64;
            if let Some(datum) = current {
                if (frequency - datum.frequency).abs() < step * 0.55 {
                    *slot = datum.intensity;
                    current = source.next();
                }
            }
        }

        Ok(SampledSpectrum { domain, samples })
    }
}

/// Average frequency step over adjacent pairs that end in a nonzero sample.
/// Fails when no such pair exists or when the first step disagrees with the
/// mean step, which would make hole detection unreliable.
fn frequency_step(spectrum: &FrequencySpectrum) -> Result<f64> {
    let mut first = 0.0;
    let mut sum = 0.0;
    let mut count = 0usize;

    for (previous, current) in spectrum.data.iter().tuple_windows() {
        if current.intensity == Complex64::new(0.0, 0.0) {
            continue; // don't step into the holes
        }
        let step = current.frequency - previous.frequency;
        if first == 0.0 {
            first = step;
        }
        sum += step;
        count += 1;
    }

    if count == 0 {
        return Err(FtmError::UnknownFrequencyStep);
    }

    let mean = sum / count as f64;
    if (first - mean).abs() >= STEP_TOLERANCE {
        return Err(FtmError::IrregularSpacing { first, mean });
    }
    Ok(mean)
}

/// One energy-normalized, phase-shifted sampling of the kernel.
#[derive(Clone, Debug)]
pub struct Filter {
    pub samples: Vec<Complex64>,
}

impl Filter {
    pub fn energy(&self) -> f64 {
        self.samples.iter().map(|s| s.norm_sqr()).sum()
    }
}

/// Samples the kernel into `match_rate` filters of `2*sample_radius + 1`
/// points, filter `p` shifted by `p/match_rate` of a grid step. Each filter
/// is normalized to unit energy; an all-zero sampling (degenerate kernel) is
/// left inert and logged.
pub fn create_filters<K>(
    kernel: &K,
    sample_radius: usize,
    match_rate: usize,
    dx: f64,
) -> Vec<Filter>
where
    K: Fn(f64) -> Complex64,
{
    let mut filters = Vec::with_capacity(match_rate);
    let radius = sample_radius as isize;

    for shift in 0..match_rate {
        let offset = dx * shift as f64 / match_rate as f64;
        let samples: Vec<Complex64> =
            (-radius..=radius).map(|j| kernel(j as f64 * dx - offset)).collect();
        let energy: f64 = samples.iter().map(|s| s.norm_sqr()).sum();
        let samples = if energy > 0.0 {
            let norm = energy.sqrt();
            samples.into_iter().map(|s| s / norm).collect()
        } else {
            warn!(shift, "filter kernel sampled to zero energy, filter left inert");
            samples
        };
        filters.push(Filter { samples });
    }
    filters
}

/// One correlation record: the complex dot product of a signal window
/// against a filter, the residual window energy `e2` not explained by the
/// correlation, and the squared tangent of the angle between signal and
/// filter direction (infinite when the correlation vanishes).
#[derive(Clone, Copy, Debug)]
pub struct Correlation {
    pub dot: Complex64,
    pub e2: f64,
    pub tan2angle: f64,
}

impl Correlation {
    /// Record for a window that runs off the data: zero correlation at the
    /// nominal frequency.
    pub fn zero() -> Self {
        Correlation { dot: Complex64::new(0.0, 0.0), e2: 0.0, tan2angle: f64::INFINITY }
    }

    /// Angle between signal and filter direction, in degrees.
    pub fn angle(&self) -> f64 {
        self.tan2angle.sqrt().atan().to_degrees()
    }
}

/// Dense correlation table: `(n-1)*match_rate + 1` records over the same
/// domain as the input grid, spaced `dx/match_rate` apart.
#[derive(Clone, Debug)]
pub struct CorrelationData {
    pub domain: (f64, f64),
    pub samples: Vec<Correlation>,
}

impl CorrelationData {
    pub fn dx(&self) -> f64 {
        if self.samples.len() < 2 {
            0.0
        } else {
            (self.domain.1 - self.domain.0) / (self.samples.len() - 1) as f64
        }
    }

    pub fn frequency(&self, index: usize) -> f64 {
        self.domain.0 + self.dx() * index as f64
    }

    /// Record nearest to a target frequency, clamped to the table bounds.
    /// Fails when the table has not been populated.
    pub fn sample(&self, frequency: f64) -> Result<&Correlation> {
        if self.samples.is_empty() {
            return Err(FtmError::EmptyCorrelationTable);
        }
        let dx = self.dx();
        let index = if dx == 0.0 {
            0
        } else {
            let nominal = ((frequency - self.domain.0) / dx).round();
            nominal.clamp(0.0, (self.samples.len() - 1) as f64) as usize
        };
        Ok(&self.samples[index])
    }
}

/// Correlates every phase-shifted filter against every window of the grid.
///
/// Windows that would run off either end of the data are recorded with zero
/// correlation at their nominal frequency. The cost is
/// `O(N * match_rate * (2*sample_radius + 1))` and the call has no side
/// effects beyond the returned table.
pub fn compute_correlation_data<K>(
    data: &SampledSpectrum,
    kernel: &K,
    sample_radius: usize,
    match_rate: usize,
) -> CorrelationData
where
    K: Fn(f64) -> Complex64,
{
    let n = data.samples.len();
    let dx = data.dx();
    let filters = create_filters(kernel, sample_radius, match_rate, dx);

    let record_count = if n == 0 { 0 } else { (n - 1) * match_rate + 1 };
    let mut samples = Vec::with_capacity(record_count);
    let radius = sample_radius as isize;

    for index in 0..record_count {
        let i = (index / match_rate) as isize;
        let p = index % match_rate;

        if i - radius < 0 || i + radius >= n as isize {
            samples.push(Correlation::zero());
            continue;
        }

        let filter = &filters[p];
        let mut dot = Complex64::new(0.0, 0.0);
        let mut window_energy = 0.0;
        for (j, weight) in filter.samples.iter().enumerate() {
            let signal = data.samples[(i - radius) as usize + j];
            dot += signal * weight.conj();
            window_energy += signal.norm_sqr();
        }

        let e2 = (window_energy - dot.norm_sqr()).max(0.0);
        let tan2angle =
            if dot.norm_sqr() > 0.0 { e2 / dot.norm_sqr() } else { f64::INFINITY };
        samples.push(Correlation { dot, e2, tan2angle });
    }

    CorrelationData { domain: data.domain, samples }
}

/// A correlation local maximum that passed the magnitude and angle gates.
#[derive(Clone, Copy, Debug)]
pub struct CandidatePeak {
    pub frequency: f64,
    pub correlation: Correlation,
}

/// Scans the correlation table for candidate peaks: records whose magnitude
/// meets `min_magnitude`, whose distortion angle is within
/// `max_angle_degrees` (an infinite tangent always fails), and whose
/// `|dot|^2` is a local maximum relative to its immediate neighbors, ties
/// resolving to the earlier record. The first and last records can never be
/// local maxima.
pub fn find_candidates(
    correlation_data: &CorrelationData,
    min_magnitude: f64,
    max_angle_degrees: f64,
) -> Result<Vec<CandidatePeak>> {
    if correlation_data.samples.is_empty() {
        return Err(FtmError::EmptyCorrelationTable);
    }

    let min_norm = min_magnitude * min_magnitude;
    let max_tan2 = max_angle_degrees.to_radians().tan().powi(2);
    let mut result = Vec::new();

    for index in 1..correlation_data.samples.len().saturating_sub(1) {
        let previous = correlation_data.samples[index - 1].dot.norm_sqr();
        let current = correlation_data.samples[index].dot.norm_sqr();
        let next = correlation_data.samples[index + 1].dot.norm_sqr();

        if current >= min_norm
            && correlation_data.samples[index].tan2angle <= max_tan2
            && current > previous
            && current >= next
        {
            result.push(CandidatePeak {
                frequency: correlation_data.frequency(index),
                correlation: correlation_data.samples[index],
            });
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::spectrum::FrequencyDatum;

    fn triangle(frequency: f64) -> Complex64 {
        Complex64::new((1.5 - frequency.abs()).max(0.0), 0.0)
    }

    /// 11 samples at integer frequencies, unit intensity at 5 and 6.
    fn two_sample_peak() -> FrequencySpectrum {
        let data: Vec<FrequencyDatum> = (0..=10)
            .map(|i| {
                let intensity = if i == 5 || i == 6 { 1.0 } else { 0.0 };
                FrequencyDatum::real(i as f64, intensity)
            })
            .collect();
        FrequencySpectrum::new(data)
    }

    #[test]
    fn test_filters_are_energy_normalized() {
        let filters = create_filters(&triangle, 2, 4, 1.0);
        assert_eq!(filters.len(), 4);
        for filter in &filters {
            assert_eq!(filter.samples.len(), 5);
            assert!((filter.energy() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_degenerate_kernel_left_inert() {
        let zero = |_: f64| Complex64::new(0.0, 0.0);
        let filters = create_filters(&zero, 2, 4, 1.0);
        for filter in &filters {
            assert_eq!(filter.energy(), 0.0);
        }
    }

    #[test]
    fn test_resampling_fills_holes() {
        let frequencies = [0.0, 1.0, 2.0, 6.0, 7.0, 8.0];
        let magnitudes = [1.0, 1.0, 0.0, 0.0, 1.0, 1.0];
        let data: Vec<FrequencyDatum> = frequencies
            .iter()
            .zip(magnitudes.iter())
            .map(|(&f, &m)| FrequencyDatum::real(f, m))
            .collect();
        let spectrum = FrequencySpectrum::new(data);

        let sampled = SampledSpectrum::from_spectrum(&spectrum).unwrap();
        assert_eq!(sampled.samples.len(), 9);
        assert!((sampled.dx() - 1.0).abs() < 1e-12);
        assert_eq!(sampled.samples[4], Complex64::new(0.0, 0.0));
        assert_eq!(sampled.samples[7], Complex64::new(1.0, 0.0));
    }

    #[test]
    fn test_resampling_rejects_irregular_spacing() {
        let data = vec![
            FrequencyDatum::real(0.0, 1.0),
            FrequencyDatum::real(1.0, 1.0),
            FrequencyDatum::real(3.0, 1.0),
        ];
        let spectrum = FrequencySpectrum::new(data);
        assert!(matches!(
            SampledSpectrum::from_spectrum(&spectrum),
            Err(FtmError::IrregularSpacing { .. })
        ));
    }

    #[test]
    fn test_resampling_empty_spectrum() {
        let spectrum = FrequencySpectrum::new(vec![]);
        assert!(matches!(
            SampledSpectrum::from_spectrum(&spectrum),
            Err(FtmError::EmptySpectrum)
        ));
    }

    #[test]
    fn test_matched_filter_basic_detection() {
        // two adjacent unit samples and a triangular kernel: the correlation
        // maximum sits exactly between them, at frequency 5.5, with all of
        // the window energy explained
        let spectrum = two_sample_peak();
        let sampled = SampledSpectrum::from_spectrum(&spectrum).unwrap();
        let table = compute_correlation_data(&sampled, &triangle, 2, 4);
        assert_eq!(table.samples.len(), 41);

        let candidates = find_candidates(&table, 0.5, 10.0).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].frequency - 5.5).abs() < 1e-12);

        let correlation = table.sample(5.5).unwrap();
        assert!((correlation.dot.norm_sqr() - 2.0).abs() < 1e-15);
        assert!(correlation.tan2angle < 1e-12);
    }

    #[test]
    fn test_candidates_are_local_maxima() {
        let spectrum = two_sample_peak();
        let sampled = SampledSpectrum::from_spectrum(&spectrum).unwrap();
        let table = compute_correlation_data(&sampled, &triangle, 2, 4);

        for candidate in find_candidates(&table, 0.0, 90.0).unwrap() {
            let index =
                ((candidate.frequency - table.domain.0) / table.dx()).round() as usize;
            let norm = table.samples[index].dot.norm_sqr();
            assert!(norm > table.samples[index - 1].dot.norm_sqr());
            assert!(norm >= table.samples[index + 1].dot.norm_sqr());
        }
    }

    #[test]
    fn test_edge_windows_are_zero() {
        let spectrum = two_sample_peak();
        let sampled = SampledSpectrum::from_spectrum(&spectrum).unwrap();
        let table = compute_correlation_data(&sampled, &triangle, 2, 4);

        // radius 2: the first two and last two grid positions have no full window
        assert_eq!(table.samples[0].dot, Complex64::new(0.0, 0.0));
        assert_eq!(table.samples[4].dot, Complex64::new(0.0, 0.0));
        assert!(table.samples[0].tan2angle.is_infinite());
        let last = table.samples.len() - 1;
        assert_eq!(table.samples[last].dot, Complex64::new(0.0, 0.0));
    }

    #[test]
    fn test_sample_lookup_clamps_to_domain() {
        let spectrum = two_sample_peak();
        let sampled = SampledSpectrum::from_spectrum(&spectrum).unwrap();
        let table = compute_correlation_data(&sampled, &triangle, 2, 4);

        let below = table.sample(-100.0).unwrap();
        assert_eq!(below.dot, table.samples[0].dot);
        let above = table.sample(100.0).unwrap();
        assert_eq!(above.dot, table.samples[table.samples.len() - 1].dot);
    }

    #[test]
    fn test_sample_lookup_fails_on_empty_table() {
        let table = CorrelationData { domain: (0.0, 0.0), samples: vec![] };
        assert!(matches!(table.sample(1.0), Err(FtmError::EmptyCorrelationTable)));
        assert!(matches!(
            find_candidates(&table, 0.0, 90.0),
            Err(FtmError::EmptyCorrelationTable)
        ));
    }
}
