//! Incremental TTS audio playback.
//!
//! Turns a chunked HTTP body carrying a base64 WAV in a JSON field, a stored
//! WAV file or a stored MP3 file into PCM written to an [`audio::AudioSink`],
//! without buffering the decoded payload and without getting stuck on
//! malformed input.

pub mod audio;
pub mod config;
pub mod error;
pub mod payload;
pub mod session;
pub mod speaker;
pub mod transport;

pub use error::{PlaybackError, Result};
pub use session::{
    AudioStreamSession, PlaybackReport, StreamMode, StreamSettings, play_mp3_file, play_stream,
    play_wav_bytes, play_wav_file,
};
pub use speaker::{Speaker, SpeakerState, SpeakerStatus};
