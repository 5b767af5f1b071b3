use thiserror::Error;

pub type Result<T> = std::result::Result<T, FtmError>;

/// Errors surfaced by the peak-picking core. Input errors fail fast;
/// degenerate configurations (zero observation duration, zero noise floor)
/// degrade gracefully instead and are not represented here.
#[derive(Debug, Error)]
pub enum FtmError {
    #[error("spectrum contains no data")]
    EmptySpectrum,

    #[error("size mismatch: {left} vs {right} samples")]
    SizeMismatch { left: usize, right: usize },

    #[error("frequency domain mismatch at index {index}: {left} vs {right}")]
    DomainMismatch { index: usize, left: f64, right: f64 },

    #[error("cannot estimate frequency step from data")]
    UnknownFrequencyStep,

    #[error("irregular sample spacing: first step {first}, mean step {mean}")]
    IrregularSpacing { first: f64, mean: f64 },

    #[error("invalid spectrum file header")]
    InvalidHeader,

    #[error("malformed text record: {line:?}")]
    MalformedTextRecord { line: String },

    #[error("correlation table is empty")]
    EmptyCorrelationTable,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
