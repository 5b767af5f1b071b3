//! Core operations for Fourier-transform mass spectrometry peak picking:
//! frequency-domain spectrum statistics, phase-shifted matched-filter
//! correlation, and isotope-aware assembly of peak families.

pub mod error;

// chemistry module
pub mod chemistry {
    pub mod calibration;
    pub mod constants;
    pub mod ion;
}

// data module
pub mod data {
    pub mod io;
    pub mod peak;
    pub mod spectrum;
}

// algorithm module
pub mod algorithm {
    pub mod detector;
    pub mod isotope;
    pub mod matched_filter;
}
