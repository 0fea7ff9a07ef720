//! Error types for livefeed-probe

/// Errors raised while reading a bitstream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BitstreamError {
    /// The read would run past the end of the buffer
    #[error("Out of data: requested {requested} bits, {available} available")]
    OutOfData { requested: u32, available: u64 },

    /// Fixed-width reads must be between 1 and 32 bits
    #[error("Invalid bit count: {0}")]
    InvalidBitCount(u8),

    /// An Exp-Golomb prefix longer than 31 zero bits
    #[error("Exp-Golomb code exceeds 32 bits")]
    ExpGolombOverflow,
}

/// Errors raised while rewriting an SPS with VUI timing information
#[derive(Debug, thiserror::Error)]
pub enum VuiError {
    /// The input is not a decodable SPS
    #[error("Cannot rewrite SPS: {0}")]
    InvalidSps(String),

    /// The frame rate cannot be expressed as VUI timing
    #[error("Invalid frame rate: {0}")]
    InvalidFrameRate(f64),

    /// Bitstream failure while copying the original fields
    #[error("Bitstream error: {0}")]
    Bitstream(#[from] BitstreamError),

    /// Bit writer failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
