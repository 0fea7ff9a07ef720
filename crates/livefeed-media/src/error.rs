//! Error types for livefeed-media.

use thiserror::Error;

/// Result type for livefeed-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for livefeed-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No track has been added to the muxer.
    #[error("No tracks configured")]
    NoTracks,

    /// A track with this id already exists.
    #[error("Track {0} already exists")]
    DuplicateTrack(u32),

    /// A sample or request references a track that is not configured.
    #[error("Unknown track {0}")]
    UnknownTrack(u32),

    /// A media segment needs at least one sample.
    #[error("Sample batch is empty")]
    EmptyBatch,

    /// Sample payloads and keyframe flags differ in length.
    #[error("Got {samples} samples but {flags} keyframe flags")]
    SampleMismatch { samples: usize, flags: usize },

    /// The video track has no usable SPS/PPS.
    #[error("Track {0} is missing SPS/PPS")]
    MissingParameterSets(u32),

    /// Malformed box structure.
    #[error("Invalid box: {0}")]
    InvalidBox(String),

    /// Buffer too small for operation.
    #[error("Buffer underflow: need {need} bytes, have {have}")]
    BufferUnderflow { need: usize, have: usize },
}

impl Error {
    /// Create an invalid box error.
    pub fn invalid_box(msg: impl Into<String>) -> Self {
        Self::InvalidBox(msg.into())
    }
}
