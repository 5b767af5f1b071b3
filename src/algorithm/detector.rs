//! Peak detection on frequency-domain spectra.
//!
//! [`MatchedFilterPeakDetector`] is the full pipeline: resample, correlate
//! against a truncated-Lorentzian filter bank, locate candidates, and score
//! charge/neutron hypotheses against a theoretical isotope envelope to
//! assemble peak families. [`NaivePeakDetector`] is a simple local-maximum
//! picker useful as a baseline and for quick sanity checks.

use std::f64::consts::PI;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use ordered_float::OrderedFloat;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::algorithm::isotope::IsotopeEnvelopeEstimator;
use crate::algorithm::matched_filter::{
    compute_correlation_data, find_candidates, CorrelationData, SampledSpectrum,
};
use crate::chemistry::constants::MASS_NEUTRON;
use crate::chemistry::ion;
use crate::data::peak::{Peak, PeakFamily, Scan};
use crate::data::spectrum::{Complex64, FrequencySpectrum};
use crate::error::{FtmError, Result};

/// Hypotheses above this m/z are not worth scoring.
const MAX_MZ: f64 = 10000.0;

/// Minimum correlation-times-abundance contribution for an isotope line to
/// count toward the consecutive peak count.
const CONTRIBUTION_THRESHOLD: f64 = 1.0;

/// A hypothesis within this fraction of the best score can still win if it
/// has a higher charge and more consecutive peaks; low-abundance one-neutron
/// peaks otherwise lose to their own monoisotopic line.
const SECONDARY_ACCEPTANCE: f64 = 0.9;

/// Tuning parameters for [`MatchedFilterPeakDetector`].
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct MatchedFilterConfig {
    /// Filters per sample spacing in the correlation table.
    pub filter_match_rate: usize,
    /// Correlation window half-width in samples.
    pub filter_sample_radius: usize,
    /// Candidate magnitude threshold, as a multiple of the noise floor.
    pub peak_threshold_factor: f64,
    /// Maximum angle between signal window and filter direction, in degrees.
    pub peak_max_correlation_angle: f64,
    /// Family score threshold, as a multiple of the noise floor.
    pub isotope_threshold_factor: f64,
    /// Monoisotopic intensity threshold, as a multiple of the noise floor.
    pub monoisotopic_peak_threshold_factor: f64,
    pub isotope_max_charge_state: i32,
    pub isotope_max_neutron_count: i32,
    /// Scores whose monoisotopic frequencies lie within this radius collapse
    /// into one.
    pub collapse_radius: f64,
    /// Use a magnitude-valued filter kernel; the data stays complex, so its
    /// phase still enters the correlation.
    pub use_magnitude_filter: bool,
}

impl Default for MatchedFilterConfig {
    fn default() -> Self {
        MatchedFilterConfig {
            filter_match_rate: 4,
            filter_sample_radius: 2,
            peak_threshold_factor: 2.0,
            peak_max_correlation_angle: 30.0,
            isotope_threshold_factor: 2.0,
            monoisotopic_peak_threshold_factor: 2.0,
            isotope_max_charge_state: 6,
            isotope_max_neutron_count: 4,
            collapse_radius: 15.0,
            use_magnitude_filter: false,
        }
    }
}

/// Evaluation of one (frequency, charge, neutron count) hypothesis.
#[derive(Clone, Debug, Default)]
pub struct Score {
    pub frequency: f64,
    pub charge: i32,
    pub neutron_count: i32,
    /// Sum of abundance-weighted correlations over the isotope envelope;
    /// normalized to the noise floor in the final result.
    pub value: f64,
    pub monoisotopic_frequency: f64,
    pub monoisotopic_intensity: Complex64,
    /// Number of consecutive isotope lines, starting from the monoisotopic
    /// line, with an above-threshold contribution.
    pub peak_count: usize,
    pub peaks: Vec<Peak>,
}

impl Score {
    fn new(frequency: f64, charge: i32, neutron_count: i32) -> Self {
        Score { frequency, charge, neutron_count, ..Score::default() }
    }
}

impl Display for Score {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Score({:.2} ({}, {}) value: {:.2}, mono: {:.2}, peaks: {})",
            self.frequency,
            self.charge,
            self.neutron_count,
            self.value,
            self.monoisotopic_frequency,
            self.peak_count
        )
    }
}

/// A peak picker over frequency-domain spectra. Implementations must be
/// shareable across worker threads.
pub trait PeakDetector: Send + Sync {
    fn find_peaks(&self, spectrum: &FrequencySpectrum) -> Result<Scan>;
}

/// Truncated Lorentzian line shape in the frequency domain: the Fourier
/// transform of a decaying complex exponential observed for a finite
/// duration `t`. A non-positive duration yields the zero kernel.
#[derive(Clone, Copy, Debug)]
pub struct TruncatedLorentzianKernel {
    t: f64,
    magnitude_only: bool,
}

impl TruncatedLorentzianKernel {
    pub fn new(t: f64, magnitude_only: bool) -> Self {
        TruncatedLorentzianKernel { t, magnitude_only }
    }

    pub fn value(&self, frequency: f64) -> Complex64 {
        if self.t <= 0.0 {
            return Complex64::new(0.0, 0.0);
        }
        let s = Complex64::new(1.0 / self.t, 2.0 * PI * frequency);
        let value = (Complex64::new(1.0, 0.0) - (-s * self.t).exp()) / s;
        if self.magnitude_only {
            Complex64::new(value.norm(), 0.0)
        } else {
            value
        }
    }
}

/// Matched-filter peak detector with isotope family assembly.
pub struct MatchedFilterPeakDetector {
    pub config: MatchedFilterConfig,
    estimator: Arc<dyn IsotopeEnvelopeEstimator>,
}

impl MatchedFilterPeakDetector {
    pub fn new(
        config: MatchedFilterConfig,
        estimator: Arc<dyn IsotopeEnvelopeEstimator>,
    ) -> Self {
        MatchedFilterPeakDetector { config, estimator }
    }

    /// Full pipeline, also returning the collapsed scores behind the peak
    /// families. A zero noise floor makes thresholds meaningless, so the
    /// scan comes back empty with a warning.
    pub fn find_peaks_with_scores(
        &self,
        spectrum: &FrequencySpectrum,
    ) -> Result<(Scan, Vec<Score>)> {
        let mut scan = Scan {
            scan_number: spectrum.scan_number,
            retention_time: spectrum.retention_time,
            observation_duration: spectrum.observation_duration,
            calibration: spectrum.calibration,
            peak_families: Vec::new(),
        };

        let sampled = SampledSpectrum::from_spectrum(spectrum)?;

        if spectrum.noise_floor == 0.0 {
            warn!(scan_number = spectrum.scan_number, "noise floor is zero, skipping scan");
            return Ok((scan, Vec::new()));
        }

        let kernel = TruncatedLorentzianKernel::new(
            spectrum.observation_duration,
            self.config.use_magnitude_filter,
        );
        let correlation_data = compute_correlation_data(
            &sampled,
            &|frequency| kernel.value(frequency),
            self.config.filter_sample_radius,
            self.config.filter_match_rate,
        );

        let min_magnitude = spectrum.noise_floor * self.config.peak_threshold_factor;
        let candidates = find_candidates(
            &correlation_data,
            min_magnitude,
            self.config.peak_max_correlation_angle,
        )?;

        let mut good_scores = Vec::new();
        for candidate in &candidates {
            if let Some(score) =
                self.analyze_candidate(candidate.frequency, spectrum, &correlation_data)?
            {
                good_scores.push(score);
            }
        }

        good_scores.sort_by_key(|score| OrderedFloat(score.monoisotopic_frequency));
        let mut scores = self.collapse_scores(good_scores);

        for score in &mut scores {
            score.value /= spectrum.noise_floor;
        }

        scan.peak_families = scores.iter().map(score_to_peak_family).collect();
        Ok((scan, scores))
    }

    /// Scores every charge/neutron hypothesis for one candidate and keeps
    /// the best. A strictly better value wins; a near-best value
    /// (within [`SECONDARY_ACCEPTANCE`]) also wins when it carries a higher
    /// charge and more consecutive peaks. The winner must still clear the
    /// family and monoisotopic intensity thresholds; with a single peak the
    /// charge state is unknowable and reported as 0.
    fn analyze_candidate(
        &self,
        frequency: f64,
        spectrum: &FrequencySpectrum,
        correlation_data: &CorrelationData,
    ) -> Result<Option<Score>> {
        let mut best = Score::default();

        for charge in 1..=self.config.isotope_max_charge_state {
            for neutron_count in 0..=self.config.isotope_max_neutron_count {
                let current = self.calculate_score(
                    frequency,
                    charge,
                    neutron_count,
                    spectrum,
                    correlation_data,
                )?;

                if current.value > best.value {
                    best = current;
                } else if current.value > best.value * SECONDARY_ACCEPTANCE
                    && current.charge > best.charge
                    && current.peak_count > best.peak_count
                {
                    best = current;
                }
            }
        }

        let score_threshold = spectrum.noise_floor * self.config.isotope_threshold_factor;
        let monoisotopic_threshold =
            spectrum.noise_floor * self.config.monoisotopic_peak_threshold_factor;

        if best.value >= score_threshold
            && best.monoisotopic_intensity.norm() >= monoisotopic_threshold
        {
            if best.peak_count == 1 {
                best.charge = 0;
            }
            Ok(Some(best))
        } else {
            Ok(None)
        }
    }

    /// Scores one hypothesis: place the candidate frequency at isotope line
    /// `neutron_count` of a theoretical envelope, then sum the
    /// abundance-weighted correlation magnitude over every envelope line.
    fn calculate_score(
        &self,
        frequency: f64,
        charge: i32,
        neutron_count: i32,
        spectrum: &FrequencySpectrum,
        correlation_data: &CorrelationData,
    ) -> Result<Score> {
        let mut score = Score::new(frequency, charge, neutron_count);

        let observed_mz = spectrum.calibration.mz(frequency);
        if observed_mz > MAX_MZ {
            return Ok(score);
        }
        let neutral_mass = ion::neutral_mass(observed_mz, charge);

        // envelope from a rough monoisotopic mass estimate, then a better
        // mass delta once the envelope spacing is known
        let mass_estimate = neutral_mass - neutron_count as f64 * MASS_NEUTRON;
        let envelope = self.estimator.isotope_envelope(mass_estimate);

        let base_mass = envelope.first().map_or(mass_estimate, |entry| entry.mass);
        let delta = if (neutron_count as usize) < envelope.len() {
            envelope[neutron_count as usize].mass - base_mass
        } else if envelope.len() >= 2 {
            (envelope[1].mass - envelope[0].mass) * neutron_count as f64
        } else {
            neutron_count as f64 * MASS_NEUTRON
        };
        let monoisotopic_mass = neutral_mass - delta;

        for (n, entry) in envelope.iter().enumerate() {
            let isotope_mass = monoisotopic_mass + (entry.mass - base_mass);
            let isotope_mz = ion::mz(isotope_mass, charge);
            let isotope_frequency = spectrum.calibration.frequency(isotope_mz);

            let correlation = correlation_data.sample(isotope_frequency)?.dot.norm();
            let contribution = correlation * entry.abundance;
            score.value += contribution;

            if contribution >= CONTRIBUTION_THRESHOLD && score.peak_count == n {
                score.peak_count += 1;
            }

            // closest intensity sample, no interpolation
            let intensity = spectrum
                .find_nearest(isotope_frequency)
                .map_or(Complex64::new(0.0, 0.0), |datum| datum.intensity);

            score.peaks.push(Peak {
                mz: isotope_mz,
                frequency: isotope_frequency,
                intensity: intensity.norm(),
                phase: intensity.arg(),
            });

            if n == 0 {
                score.monoisotopic_frequency = isotope_frequency;
                score.monoisotopic_intensity = intensity;
            }
        }

        Ok(score)
    }

    /// Collapses runs of scores with close monoisotopic frequencies into the
    /// highest-valued one. Assumes the input is sorted by monoisotopic
    /// frequency.
    fn collapse_scores(&self, scores: Vec<Score>) -> Vec<Score> {
        let mut result: Vec<Score> = Vec::new();
        for score in scores {
            match result.last_mut() {
                Some(last)
                    if (score.monoisotopic_frequency - last.monoisotopic_frequency).abs()
                        < self.config.collapse_radius =>
                {
                    if score.value > last.value {
                        *last = score;
                    }
                }
                _ => result.push(score),
            }
        }
        result
    }
}

impl PeakDetector for MatchedFilterPeakDetector {
    fn find_peaks(&self, spectrum: &FrequencySpectrum) -> Result<Scan> {
        let (scan, _) = self.find_peaks_with_scores(spectrum)?;
        Ok(scan)
    }
}

fn score_to_peak_family(score: &Score) -> PeakFamily {
    PeakFamily {
        mz_monoisotopic: score.peaks.first().map_or(0.0, |peak| peak.mz),
        charge: score.charge,
        score: score.value,
        peaks: score.peaks.clone(),
    }
}

/// Baseline picker: a peak is a sample above the noise threshold with a
/// strict monotonic rise over `detection_radius` samples before it and a
/// strict monotonic fall after it. Every peak becomes a single-member family
/// with charge 0.
#[derive(Clone, Copy, Debug)]
pub struct NaivePeakDetector {
    pub noise_factor: f64,
    pub detection_radius: usize,
}

impl Default for NaivePeakDetector {
    fn default() -> Self {
        NaivePeakDetector { noise_factor: 1.0, detection_radius: 2 }
    }
}

impl NaivePeakDetector {
    fn is_summit(&self, spectrum: &FrequencySpectrum, index: usize) -> bool {
        let data = &spectrum.data;
        if index < self.detection_radius || index + self.detection_radius >= data.len() {
            return false;
        }
        for k in 0..self.detection_radius {
            if data[index - k - 1].magnitude() >= data[index - k].magnitude() {
                return false;
            }
            if data[index + k + 1].magnitude() >= data[index + k].magnitude() {
                return false;
            }
        }
        true
    }
}

impl PeakDetector for NaivePeakDetector {
    fn find_peaks(&self, spectrum: &FrequencySpectrum) -> Result<Scan> {
        if spectrum.data.is_empty() {
            return Err(FtmError::EmptySpectrum);
        }

        let threshold = self.noise_factor * spectrum.noise_floor;
        let mut peak_families = Vec::new();

        for (index, datum) in spectrum.data.iter().enumerate() {
            if datum.magnitude() >= threshold && self.is_summit(spectrum, index) {
                let peak = Peak {
                    mz: spectrum.calibration.mz(datum.frequency),
                    frequency: datum.frequency,
                    intensity: datum.magnitude(),
                    phase: datum.intensity.arg(),
                };
                let score = if spectrum.noise_floor > 0.0 {
                    datum.magnitude() / spectrum.noise_floor
                } else {
                    datum.magnitude()
                };
                peak_families.push(PeakFamily {
                    mz_monoisotopic: peak.mz,
                    charge: 0,
                    score,
                    peaks: vec![peak],
                });
            }
        }

        Ok(Scan {
            scan_number: spectrum.scan_number,
            retention_time: spectrum.retention_time,
            observation_duration: spectrum.observation_duration,
            calibration: spectrum.calibration,
            peak_families,
        })
    }
}

/// Runs a detector over many spectra on a dedicated thread pool.
pub fn find_peaks_parallel<D: PeakDetector>(
    detector: &D,
    spectra: &[FrequencySpectrum],
    num_threads: usize,
) -> Result<Vec<Scan>> {
    let pool = ThreadPoolBuilder::new().num_threads(num_threads).build().unwrap();
    pool.install(|| {
        spectra.par_iter().map(|spectrum| detector.find_peaks(spectrum)).collect()
    })
}
