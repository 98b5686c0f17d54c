//! Frame-level decoder interface for compressed elementary streams.

/// Largest number of interleaved samples one MP3 frame can produce
/// (1152 samples per channel, stereo).
pub const MAX_SAMPLES_PER_FRAME: usize = 2304;

/// Result of decoding one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples written to the output buffer.
    pub samples: usize,
    /// Input bytes the frame occupied.
    pub consumed: usize,
}

/// Why a frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The input ends before the frame does.
    Underflow,
    /// Corrupt or unsupported frame; `consumed` bytes were used up by the attempt.
    Invalid { consumed: usize, reason: String },
}

/// A decoder that turns one compressed frame at a time into i16 PCM.
///
/// Implementations only know how to find and decode single frames; the
/// resync policy around them lives in [`super::mp3::Mp3FrameDecoder`].
pub trait StreamDecoder: Send {
    /// Offset of the next plausible frame start in `data`.
    fn find_sync(&self, data: &[u8]) -> Option<usize>;

    /// Decode the frame starting at `data[0]` into `out`, which holds at
    /// least [`MAX_SAMPLES_PER_FRAME`] samples.
    fn decode_frame(&mut self, data: &[u8], out: &mut [i16]) -> Result<FrameInfo, FrameError>;
}

impl<D: StreamDecoder + ?Sized> StreamDecoder for Box<D> {
    fn find_sync(&self, data: &[u8]) -> Option<usize> {
        (**self).find_sync(data)
    }

    fn decode_frame(&mut self, data: &[u8], out: &mut [i16]) -> Result<FrameInfo, FrameError> {
        (**self).decode_frame(data, out)
    }
}
