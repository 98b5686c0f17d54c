//! RIFF/WAVE header discovery for PCM streams.
//!
//! Only the `fmt ` and `data` sub-chunks are interpreted. Everything else
//! between them is skipped by its declared length (plus the pad byte after
//! odd-length chunks). The first `data` chunk ends the scan, and only a
//! `fmt ` chunk that precedes it counts.

use serde::Serialize;

use super::sink::PcmFormat;
use crate::error::{PlaybackError, Result};

/// Size of the canonical header written by [`write_header`].
pub const CANONICAL_HEADER_LEN: usize = 44;

/// Declared data length used by streaming writers that do not know the size up front.
const UNBOUNDED_DATA_LEN: u32 = u32::MAX;

/// Container parameters recovered from a WAV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WavHeaderInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Offset of the first PCM byte from the start of the container.
    pub data_offset: usize,
    /// Length declared by the `data` sub-chunk.
    pub data_len: u32,
}

impl WavHeaderInfo {
    pub fn format(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
        }
    }
}

enum Scan {
    NeedMore,
    Found(WavHeaderInfo),
}

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn check_tag(buf: &[u8], at: usize, tag: &[u8; 4], what: &str) -> Result<()> {
    let end = buf.len().min(at + 4);
    if end > at && buf[at..end] != tag[..end - at] {
        return Err(PlaybackError::Format(format!("missing {} signature", what)));
    }
    Ok(())
}

/// Scan whatever prefix of the container is available.
fn scan_header(buf: &[u8], window: usize, defaults: PcmFormat) -> Result<Scan> {
    check_tag(buf, 0, b"RIFF", "RIFF")?;
    check_tag(buf, 8, b"WAVE", "WAVE")?;
    if buf.len() < 12 {
        return Ok(Scan::NeedMore);
    }

    let mut format = defaults;
    let mut pos = 12usize;
    loop {
        if pos + 8 > window {
            return Err(PlaybackError::Format(format!(
                "no data sub-chunk within the first {} bytes",
                window
            )));
        }
        if pos + 8 > buf.len() {
            return Ok(Scan::NeedMore);
        }
        let tag = &buf[pos..pos + 4];
        let len = le_u32(buf, pos + 4);

        if tag == b"fmt " {
            if len < 16 {
                return Err(PlaybackError::Format(format!(
                    "fmt sub-chunk too short ({} bytes)",
                    len
                )));
            }
            if pos + 24 > buf.len() {
                return Ok(Scan::NeedMore);
            }
            format = PcmFormat {
                channels: le_u16(buf, pos + 10),
                sample_rate: le_u32(buf, pos + 12),
                bits_per_sample: le_u16(buf, pos + 22),
            };
        } else if tag == b"data" {
            if len == 0 {
                return Err(PlaybackError::Format("empty data sub-chunk".to_string()));
            }
            if format.bits_per_sample != 16 {
                return Err(PlaybackError::Format(format!(
                    "unsupported {} bits per sample",
                    format.bits_per_sample
                )));
            }
            format.ensure_supported()?;
            return Ok(Scan::Found(WavHeaderInfo {
                sample_rate: format.sample_rate,
                channels: format.channels,
                bits_per_sample: format.bits_per_sample,
                data_offset: pos + 8,
                data_len: len,
            }));
        }

        let skip = 8usize.saturating_add(len as usize).saturating_add((len & 1) as usize);
        pos = pos.saturating_add(skip);
    }
}

/// Parse a fully buffered container.
pub fn parse_header(bytes: &[u8], window: usize, defaults: PcmFormat) -> Result<WavHeaderInfo> {
    match scan_header(bytes, window.min(bytes.len()), defaults)? {
        Scan::Found(info) => Ok(info),
        Scan::NeedMore => Err(PlaybackError::Format(format!(
            "WAV header incomplete ({} bytes)",
            bytes.len()
        ))),
    }
}

/// The PCM payload of a fully buffered container, clipped to what is present.
pub fn pcm_payload<'a>(bytes: &'a [u8], info: &WavHeaderInfo) -> &'a [u8] {
    let start = info.data_offset.min(bytes.len());
    let end = if info.data_len == UNBOUNDED_DATA_LEN {
        bytes.len()
    } else {
        start.saturating_add(info.data_len as usize).min(bytes.len())
    };
    &bytes[start..end]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Pending,
    Streaming { remaining: Option<u64> },
}

/// Incremental parser for a WAV container arriving in arbitrary pieces.
///
/// Header bytes are buffered (up to `window`) until the `data` sub-chunk is
/// located. Payload bytes that arrived together with the header are passed
/// on, not dropped.
pub struct WavStreamParser {
    header: Vec<u8>,
    window: usize,
    defaults: PcmFormat,
    state: ParseState,
    info: Option<WavHeaderInfo>,
    forwarded: u64,
}

impl WavStreamParser {
    pub fn new(window: usize, defaults: PcmFormat) -> Self {
        let window = window.max(CANONICAL_HEADER_LEN);
        Self {
            header: Vec::with_capacity(window),
            window,
            defaults,
            state: ParseState::Pending,
            info: None,
            forwarded: 0,
        }
    }

    pub fn info(&self) -> Option<WavHeaderInfo> {
        self.info
    }

    /// PCM bytes passed on so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Feed container bytes. PCM payload is appended to `pcm`.
    ///
    /// Returns the header exactly once, on the call that completes it.
    pub fn push(&mut self, mut input: &[u8], pcm: &mut Vec<u8>) -> Result<Option<WavHeaderInfo>> {
        let mut completed = None;
        if self.state == ParseState::Pending {
            let take = (self.window - self.header.len()).min(input.len());
            self.header.extend_from_slice(&input[..take]);
            input = &input[take..];

            match scan_header(&self.header, self.window, self.defaults)? {
                Scan::NeedMore if self.header.len() >= self.window => {
                    return Err(PlaybackError::Format(format!(
                        "no data sub-chunk within the first {} bytes",
                        self.window
                    )));
                }
                Scan::NeedMore => return Ok(None),
                Scan::Found(info) => {
                    log::info!(
                        "WAV: {} Hz, {}, {} bytes PCM at offset {}",
                        info.sample_rate,
                        if info.channels == 2 { "Stereo" } else { "Mono" },
                        info.data_len,
                        info.data_offset
                    );
                    let remaining =
                        (info.data_len != UNBOUNDED_DATA_LEN).then_some(u64::from(info.data_len));
                    self.state = ParseState::Streaming { remaining };
                    self.info = Some(info);
                    completed = Some(info);

                    let buffered = std::mem::take(&mut self.header);
                    self.forward(&buffered[info.data_offset.min(buffered.len())..], pcm);
                }
            }
        }
        self.forward(input, pcm);
        Ok(completed)
    }

    /// Check the stream ended in a sensible place.
    pub fn finish(&self) -> Result<()> {
        match self.state {
            ParseState::Pending => Err(PlaybackError::Format(format!(
                "stream ended inside WAV header after {} bytes",
                self.header.len()
            ))),
            ParseState::Streaming { remaining: Some(left) } if left > 0 => {
                log::warn!("WAV data truncated: {} of declared bytes missing", left);
                Ok(())
            }
            ParseState::Streaming { .. } => Ok(()),
        }
    }

    fn forward(&mut self, bytes: &[u8], pcm: &mut Vec<u8>) {
        let ParseState::Streaming { remaining } = &mut self.state else {
            return;
        };
        let n = match remaining {
            Some(left) => {
                let n = (*left).min(bytes.len() as u64) as usize;
                *left -= n as u64;
                n
            }
            None => bytes.len(),
        };
        pcm.extend_from_slice(&bytes[..n]);
        self.forwarded += n as u64;
    }
}

/// Canonical 44-byte PCM header for `data_len` bytes of samples.
pub fn write_header(format: PcmFormat, data_len: u32) -> [u8; CANONICAL_HEADER_LEN] {
    let block_align = format.channels * (format.bits_per_sample / 8);
    let byte_rate = format.sample_rate * u32::from(block_align);

    let mut h = [0u8; CANONICAL_HEADER_LEN];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&(data_len.wrapping_add(CANONICAL_HEADER_LEN as u32 - 8)).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes());
    h[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    h[22..24].copy_from_slice(&format.channels.to_le_bytes());
    h[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    h[32..34].copy_from_slice(&block_align.to_le_bytes());
    h[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_len.to_le_bytes());
    h
}
