use crate::chemistry::constants::MASS_PROTON;

/// Neutral mass of an ion observed at `mz` with `charge` protons attached.
pub fn neutral_mass(mz: f64, charge: i32) -> f64 {
    (mz - MASS_PROTON) * charge as f64
}

/// m/z at which a neutral mass is observed at the given charge state.
pub fn mz(neutral_mass: f64, charge: i32) -> f64 {
    neutral_mass / charge as f64 + MASS_PROTON
}
