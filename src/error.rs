//! Playback error types.

/// Errors that terminate a playback attempt.
///
/// None of these are fatal to the host process: the caller receives the error,
/// and whatever audio already reached the sink stays played.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// The transport made no progress within the stall window, or the total
    /// session deadline passed.
    #[error("Transport timed out waiting for body bytes")]
    TransportTimeout,

    /// Chunk framing was malformed or the connection closed mid-body.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Bad signature, missing `data` sub-chunk, missing base64 field, etc.
    #[error("Format error: {0}")]
    Format(String),

    /// Too many consecutive base64 block failures.
    #[error("Decode error: {0}")]
    Decode(String),

    /// MP3 resync gave up.
    #[error(
        "MP3 decoding aborted ({reason}): {frames_decoded} frames, {samples} samples, {bytes_remaining} bytes remaining"
    )]
    Mp3Frame {
        reason: &'static str,
        frames_decoded: u32,
        samples: u64,
        bytes_remaining: usize,
    },

    /// The output device only accepts 16-bit PCM.
    #[error("Unsupported format: {bits_per_sample} bits per sample")]
    UnsupportedFormat { bits_per_sample: u16 },

    /// The audio device rejected an operation.
    #[error("Audio device error: {0}")]
    Device(#[from] anyhow::Error),

    /// The caller stopped playback between two pipeline stages.
    #[error("Playback cancelled")]
    Cancelled,

    /// IO error (stored audio files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
