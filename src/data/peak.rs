use std::fmt;
use std::fmt::{Display, Formatter};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::chemistry::calibration::CalibrationParameters;

/// A single detected spectral peak.
#[derive(Clone, Copy, PartialEq, Debug, Default, Serialize, Deserialize, Encode, Decode)]
pub struct Peak {
    pub mz: f64,
    pub frequency: f64,
    pub intensity: f64,
    pub phase: f64,
}

/// Peaks attributed to one ion species at one charge state. Charge 0 marks a
/// detection with too little evidence to assign a charge.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize, Encode, Decode)]
pub struct PeakFamily {
    pub mz_monoisotopic: f64,
    pub charge: i32,
    pub score: f64,
    pub peaks: Vec<Peak>,
}

impl Display for PeakFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PeakFamily(mz: {:.4}, charge: {}, peaks: {}, score: {:.2})",
            self.mz_monoisotopic,
            self.charge,
            self.peaks.len(),
            self.score
        )
    }
}

/// Peak-picking result for one scan: metadata plus the ordered peak families.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize, Encode, Decode)]
pub struct Scan {
    pub scan_number: i32,
    pub retention_time: f64,
    pub observation_duration: f64,
    pub calibration: CalibrationParameters,
    pub peak_families: Vec<PeakFamily>,
}
