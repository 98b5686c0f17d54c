//! Resynchronising MP3 playback over an in-memory buffer.
//!
//! The frame decoder only ever sees the bytes from the cursor onwards. Each
//! step either decodes a frame, skips past something it cannot decode, or
//! reports the end of the stream; every step that is not the end moves the
//! cursor forward by at least one byte, so a pass over `n` bytes takes at most
//! `n` steps whatever the input looks like.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::sink::{AudioSink, PcmFormat, write_all};
use super::stream_decoder::{FrameError, MAX_SAMPLES_PER_FRAME, StreamDecoder};
use super::volume;
use crate::error::{PlaybackError, Result};

/// Smallest frame header the decoder can look at.
const MIN_FRAME_BYTES: usize = 4;

/// Silence appended after the last frame so the device drains cleanly.
pub const TAIL_SILENCE_BYTES: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct Mp3Settings {
    /// An underflow with fewer bytes than this left is the normal end.
    pub min_tail_bytes: usize,
    pub max_underflow_errors: u32,
    pub max_decode_errors: u32,
    pub volume_percent: u16,
}

impl Default for Mp3Settings {
    fn default() -> Self {
        Self {
            min_tail_bytes: 1024,
            max_underflow_errors: 10,
            max_decode_errors: 50,
            volume_percent: volume::UNITY_PERCENT,
        }
    }
}

/// Outcome of a completed MP3 pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Mp3Report {
    pub format: Option<PcmFormat>,
    pub frames_decoded: u32,
    pub samples: u64,
    pub bytes_remaining: usize,
}

/// What one call to [`Mp3FrameDecoder::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A frame is available from [`Mp3FrameDecoder::frame_mut`]. `first` is set
    /// for the frame that established the output format.
    Frame { first: bool },
    /// Undecodable bytes were stepped over.
    Skipped,
    End,
}

pub struct Mp3FrameDecoder<'a, D> {
    data: &'a [u8],
    cursor: usize,
    decoder: D,
    settings: Mp3Settings,
    pcm: Vec<i16>,
    pcm_len: usize,
    format: Option<PcmFormat>,
    frames_decoded: u32,
    samples: u64,
    underflow_errors: u32,
    decode_errors: u32,
}

impl<'a, D: StreamDecoder> Mp3FrameDecoder<'a, D> {
    pub fn new(data: &'a [u8], decoder: D, settings: Mp3Settings) -> Self {
        Self {
            data,
            cursor: 0,
            decoder,
            settings,
            pcm: vec![0; MAX_SAMPLES_PER_FRAME],
            pcm_len: 0,
            format: None,
            frames_decoded: 0,
            samples: 0,
            underflow_errors: 0,
            decode_errors: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn bytes_left(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// Output format, fixed by the first decoded frame.
    pub fn format(&self) -> Option<PcmFormat> {
        self.format
    }

    /// Samples of the most recently decoded frame.
    pub fn frame_mut(&mut self) -> &mut [i16] {
        &mut self.pcm[..self.pcm_len]
    }

    pub fn report(&self) -> Mp3Report {
        Mp3Report {
            format: self.format,
            frames_decoded: self.frames_decoded,
            samples: self.samples,
            bytes_remaining: self.bytes_left(),
        }
    }

    fn abort(&self, reason: &'static str) -> PlaybackError {
        log::error!(
            "MP3 decode aborted: {} after {} frames, {} bytes left",
            reason,
            self.frames_decoded,
            self.bytes_left()
        );
        PlaybackError::Mp3Frame {
            reason,
            frames_decoded: self.frames_decoded,
            samples: self.samples,
            bytes_remaining: self.bytes_left(),
        }
    }

    pub fn step(&mut self) -> Result<Step> {
        let data = self.data;

        let Some(offset) = self.decoder.find_sync(&data[self.cursor..]) else {
            log::debug!("No further frame sync, {} bytes left", self.bytes_left());
            return Ok(Step::End);
        };
        self.cursor = (self.cursor + offset).min(data.len());

        let rest = &data[self.cursor..];
        if rest.len() < MIN_FRAME_BYTES {
            return Ok(Step::End);
        }

        match self.decoder.decode_frame(rest, &mut self.pcm) {
            Ok(info) => {
                self.cursor += info.consumed.clamp(1, rest.len());
                self.underflow_errors = 0;
                self.decode_errors = 0;
                self.frames_decoded += 1;
                self.pcm_len = info.samples.min(self.pcm.len());
                self.samples += self.pcm_len as u64;

                let format = PcmFormat::s16(info.sample_rate, info.channels);
                match self.format {
                    None => {
                        log::info!(
                            "MP3: {} Hz, {}",
                            info.sample_rate,
                            if info.channels == 1 { "Mono" } else { "Stereo" }
                        );
                        self.format = Some(format);
                        Ok(Step::Frame { first: true })
                    }
                    Some(current) => {
                        if current != format {
                            log::warn!(
                                "MP3 frame {} changes format to {} Hz/{} ch, keeping {} Hz/{} ch",
                                self.frames_decoded,
                                format.sample_rate,
                                format.channels,
                                current.sample_rate,
                                current.channels
                            );
                        }
                        Ok(Step::Frame { first: false })
                    }
                }
            }
            Err(FrameError::Underflow) => {
                if rest.len() < self.settings.min_tail_bytes {
                    log::debug!("Ignoring {} trailing bytes after last frame", rest.len());
                    return Ok(Step::End);
                }
                self.underflow_errors += 1;
                if self.underflow_errors > self.settings.max_underflow_errors {
                    return Err(self.abort("too many underflow errors"));
                }
                log::warn!("MP3 underflow with {} bytes left, resyncing", rest.len());
                self.cursor += 1;
                Ok(Step::Skipped)
            }
            Err(FrameError::Invalid { consumed, reason }) => {
                self.decode_errors += 1;
                if self.decode_errors > self.settings.max_decode_errors {
                    return Err(self.abort("too many decode errors"));
                }
                log::warn!("MP3 frame error at byte {}: {}", self.cursor, reason);
                self.cursor += consumed.clamp(1, rest.len());
                Ok(Step::Skipped)
            }
        }
    }
}

/// Decode `data` frame by frame and play it.
///
/// The sink is reconfigured once, from the first good frame. Does not flush
/// the sink; the caller owns that. Clearing `running` stops playback before
/// the next frame.
pub fn play_mp3<D, S>(
    data: &[u8],
    decoder: D,
    sink: &mut S,
    settings: Mp3Settings,
    write_timeout: Duration,
    running: &AtomicBool,
) -> Result<Mp3Report>
where
    D: StreamDecoder,
    S: AudioSink + ?Sized,
{
    let mut frames = Mp3FrameDecoder::new(data, decoder, settings);
    let mut bytes = Vec::with_capacity(MAX_SAMPLES_PER_FRAME * 2);

    loop {
        if !running.load(Ordering::Relaxed) {
            log::info!("MP3 playback cancelled after {} frames", frames.report().frames_decoded);
            return Err(PlaybackError::Cancelled);
        }
        match frames.step()? {
            Step::End => break,
            Step::Skipped => continue,
            Step::Frame { first } => {
                if first {
                    if let Some(format) = frames.format() {
                        sink.reconfigure(format)?;
                    }
                }
                let pcm = frames.frame_mut();
                volume::scale_samples(pcm, settings.volume_percent);
                bytes.clear();
                for s in pcm.iter() {
                    bytes.extend_from_slice(&s.to_le_bytes());
                }
                write_all(sink, &bytes, write_timeout)?;
            }
        }
    }

    if frames.format().is_some() {
        write_all(sink, &[0u8; TAIL_SILENCE_BYTES], write_timeout)?;
    }

    let report = frames.report();
    log::info!(
        "MP3 playback done: {} frames, {} samples, {} bytes left over",
        report.frames_decoded,
        report.samples,
        report.bytes_remaining
    );
    Ok(report)
}
