//! Isotope envelope estimation for peptide-like molecules.

use crate::chemistry::constants::MASS_NEUTRON;

/// One line of an isotope envelope: a neutral mass and its relative
/// abundance.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct MassAbundance {
    pub mass: f64,
    pub abundance: f64,
}

/// Source of theoretical isotope envelopes, keyed by monoisotopic mass.
/// Implementations must be shareable across worker threads.
pub trait IsotopeEnvelopeEstimator: Send + Sync {
    /// Envelope for a neutral molecule of the given monoisotopic mass,
    /// ordered by increasing mass, with abundances normalized to sum 1.
    fn isotope_envelope(&self, monoisotopic_mass: f64) -> Vec<MassAbundance>;
}

pub fn factorial(n: u32) -> f64 {
    (1..=n).fold(1.0, |acc, k| acc * k as f64)
}

/// Poisson parameter of the averagine isotope distribution as a function of
/// monoisotopic mass, clamped to be non-negative for very small masses.
pub fn averagine_lambda(monoisotopic_mass: f64) -> f64 {
    (0.000594 * monoisotopic_mass - 0.03091).max(0.0)
}

/// Averagine-based envelope estimator: isotope abundances follow a Poisson
/// distribution with a mass-dependent parameter, isotope spacing is one
/// neutron mass.
#[derive(Clone, Copy, Debug)]
pub struct AveragineEnvelopeEstimator {
    pub max_isotopes: usize,
    pub abundance_cutoff: f64,
}

impl Default for AveragineEnvelopeEstimator {
    fn default() -> Self {
        AveragineEnvelopeEstimator { max_isotopes: 10, abundance_cutoff: 1e-4 }
    }
}

impl IsotopeEnvelopeEstimator for AveragineEnvelopeEstimator {
    fn isotope_envelope(&self, monoisotopic_mass: f64) -> Vec<MassAbundance> {
        let lambda = averagine_lambda(monoisotopic_mass);

        let mut weights: Vec<f64> = (0..self.max_isotopes as u32)
            .map(|k| (-lambda).exp() * lambda.powi(k as i32) / factorial(k))
            .collect();

        // trim the negligible tail, keeping at least the monoisotopic line
        while weights.len() > 1
            && weights.last().map_or(false, |&w| w < self.abundance_cutoff)
        {
            weights.pop();
        }

        let total: f64 = weights.iter().sum();
        weights
            .into_iter()
            .enumerate()
            .map(|(k, weight)| MassAbundance {
                mass: monoisotopic_mass + k as f64 * MASS_NEUTRON,
                abundance: if total > 0.0 { weight / total } else { 0.0 },
            })
            .collect()
    }
}
