//! audio - container parsing, MP3 decoding and PCM output
//!
//! Everything here is synchronous and meant to run on a dedicated playback
//! thread. The device side goes through [`AudioSink`] so the pipelines can be
//! driven against ALSA or an in-memory recorder.

pub mod alsa_device;
pub mod mp3;
pub mod mpeg_frame;
pub mod pcm_block;
pub mod sink;
pub mod stream_decoder;
pub mod volume;
pub mod wav;

pub use alsa_device::AlsaSink;
pub use mp3::{Mp3Report, Mp3Settings, play_mp3};
pub use mpeg_frame::SymphoniaFrameDecoder;
pub use sink::{AudioSink, MemorySink, PcmFormat, SinkEvent, SinkSettings};
pub use stream_decoder::StreamDecoder;
pub use wav::{WavHeaderInfo, WavStreamParser};
