//! Output device abstraction.
//!
//! A sink accepts interleaved little-endian 16-bit PCM at whatever rate and
//! channel count it was last reconfigured to. Only one session may write to a
//! sink at a time; [`crate::speaker::Speaker`] hands out exclusive access.

use serde::Serialize;
use std::time::Duration;

use crate::error::{PlaybackError, Result};

/// Highest sample rate accepted from a container header.
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Zero-progress writes tolerated before giving up on the device.
const MAX_STALLED_WRITES: u32 = 3;

/// PCM layout the sink is programmed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    pub fn s16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
        }
    }

    /// Bytes per interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bits_per_sample / 8)
    }

    /// Reject anything the output path cannot render.
    pub fn ensure_supported(&self) -> Result<()> {
        if self.bits_per_sample != 16 {
            return Err(PlaybackError::UnsupportedFormat {
                bits_per_sample: self.bits_per_sample,
            });
        }
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(PlaybackError::Format(format!(
                "sample rate {} Hz out of range",
                self.sample_rate
            )));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(PlaybackError::Format(format!(
                "{} channels not supported",
                self.channels
            )));
        }
        Ok(())
    }
}

/// Timing and silence parameters shared by sink implementations.
#[derive(Debug, Clone, Copy)]
pub struct SinkSettings {
    /// Upper bound for one blocking write.
    pub write_timeout: Duration,
    /// Silence buffers written by `flush`.
    pub flush_buffers: usize,
    /// Size of each silence buffer.
    pub flush_buffer_bytes: usize,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(2),
            flush_buffers: 8,
            flush_buffer_bytes: 1024,
        }
    }
}

pub trait AudioSink {
    /// Reprogram the device clock and layout. Fails with
    /// [`PlaybackError::UnsupportedFormat`] for anything but 16-bit samples.
    fn reconfigure(&mut self, format: PcmFormat) -> Result<()>;

    /// Blocking write; returns how many bytes the device accepted, which may
    /// be fewer than offered (or zero if `timeout` expired).
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize>;

    /// Push silence through the device, clear its buffer and restart it.
    fn flush(&mut self) -> Result<()>;
}

impl<S: AudioSink + ?Sized> AudioSink for &mut S {
    fn reconfigure(&mut self, format: PcmFormat) -> Result<()> {
        (**self).reconfigure(format)
    }

    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize> {
        (**self).write(bytes, timeout)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn reconfigure(&mut self, format: PcmFormat) -> Result<()> {
        (**self).reconfigure(format)
    }

    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize> {
        (**self).write(bytes, timeout)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Write every byte, retrying short writes.
///
/// Gives up once the device accepts nothing several times in a row.
pub fn write_all<S: AudioSink + ?Sized>(
    sink: &mut S,
    bytes: &[u8],
    timeout: Duration,
) -> Result<usize> {
    let mut written = 0;
    let mut stalled = 0u32;
    while written < bytes.len() {
        let n = sink.write(&bytes[written..], timeout)?;
        if n == 0 {
            stalled += 1;
            if stalled >= MAX_STALLED_WRITES {
                log::error!(
                    "Audio device accepted nothing for {} writes, dropping {} bytes",
                    stalled,
                    bytes.len() - written
                );
                return Err(PlaybackError::Device(anyhow::anyhow!(
                    "audio device stalled after {} of {} bytes",
                    written,
                    bytes.len()
                )));
            }
        } else {
            stalled = 0;
            written += n;
        }
    }
    Ok(written)
}

/// Write `count` buffers of silence, ignoring how much the device takes.
pub fn write_silence<S: AudioSink + ?Sized>(
    sink: &mut S,
    count: usize,
    buffer_bytes: usize,
    timeout: Duration,
) -> Result<()> {
    let silence = vec![0u8; buffer_bytes];
    for _ in 0..count {
        sink.write(&silence, timeout)?;
    }
    Ok(())
}

/// What a [`MemorySink`] observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Reconfigure(PcmFormat),
    /// Consecutive writes are merged into one event.
    Write(Vec<u8>),
    Flush,
}

/// Sink that records everything instead of playing it.
///
/// Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Vec<SinkEvent>,
    format: Option<PcmFormat>,
    write_limit: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept at most `limit` bytes per write call.
    pub fn with_write_limit(limit: usize) -> Self {
        Self {
            write_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }

    pub fn format(&self) -> Option<PcmFormat> {
        self.format
    }

    /// Every reconfiguration, in order.
    pub fn reconfigurations(&self) -> Vec<PcmFormat> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Reconfigure(f) => Some(*f),
                _ => None,
            })
            .collect()
    }

    /// All bytes written, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Write(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.events.iter().filter(|e| **e == SinkEvent::Flush).count()
    }
}

impl AudioSink for MemorySink {
    fn reconfigure(&mut self, format: PcmFormat) -> Result<()> {
        format.ensure_supported()?;
        self.format = Some(format);
        self.events.push(SinkEvent::Reconfigure(format));
        Ok(())
    }

    fn write(&mut self, bytes: &[u8], _timeout: Duration) -> Result<usize> {
        let n = self.write_limit.map_or(bytes.len(), |limit| limit.min(bytes.len()));
        if n == 0 {
            return Ok(0);
        }
        match self.events.last_mut() {
            Some(SinkEvent::Write(buf)) => buf.extend_from_slice(&bytes[..n]),
            _ => self.events.push(SinkEvent::Write(bytes[..n].to_vec())),
        }
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        self.events.push(SinkEvent::Flush);
        Ok(())
    }
}
