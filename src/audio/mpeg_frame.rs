//! MPEG audio Layer III frame headers and a symphonia-backed frame decoder.

use symphonia::core::audio::{Channels, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::formats::Packet;

use super::stream_decoder::{FrameError, FrameInfo, StreamDecoder};

/// Size of a frame header.
pub const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

// kbit/s, index 0 (free format) and 15 (bad) are rejected
const BITRATES_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2_L3: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// A parsed Layer III frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub channels: u16,
}

impl FrameHeader {
    /// Parse four header bytes. Returns `None` unless they form a valid
    /// Layer III header with a fixed bitrate.
    pub fn parse(h: &[u8]) -> Option<Self> {
        if h.len() < HEADER_LEN || h[0] != 0xFF || h[1] & 0xE0 != 0xE0 {
            return None;
        }
        let version = match (h[1] >> 3) & 0b11 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return None,
        };
        // Layer III only
        if (h[1] >> 1) & 0b11 != 0b01 {
            return None;
        }
        let bitrate_index = usize::from(h[2] >> 4);
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let bitrate_kbps = match version {
            MpegVersion::Mpeg1 => BITRATES_V1_L3[bitrate_index],
            _ => BITRATES_V2_L3[bitrate_index],
        };
        let base_rate = match (h[2] >> 2) & 0b11 {
            0 => 44_100,
            1 => 48_000,
            2 => 32_000,
            _ => return None,
        };
        let sample_rate = match version {
            MpegVersion::Mpeg1 => base_rate,
            MpegVersion::Mpeg2 => base_rate / 2,
            MpegVersion::Mpeg25 => base_rate / 4,
        };
        Some(Self {
            version,
            bitrate_kbps,
            sample_rate,
            padding: (h[2] >> 1) & 1 == 1,
            channels: if h[3] >> 6 == 0b11 { 1 } else { 2 },
        })
    }

    /// Total frame length in bytes, header included.
    pub fn frame_len(&self) -> usize {
        let coefficient = match self.version {
            MpegVersion::Mpeg1 => 144,
            _ => 72,
        };
        (coefficient * self.bitrate_kbps * 1000 / self.sample_rate) as usize + usize::from(self.padding)
    }

    /// Samples per channel.
    pub fn samples_per_frame(&self) -> usize {
        match self.version {
            MpegVersion::Mpeg1 => 1152,
            _ => 576,
        }
    }
}

/// Offset of the first valid Layer III header in `data`.
///
/// ID3 tags and other junk are stepped over byte by byte.
pub fn find_sync_word(data: &[u8]) -> Option<usize> {
    data.windows(HEADER_LEN)
        .position(|w| FrameHeader::parse(w).is_some())
}

/// Frame decoder built on symphonia's MP3 codec.
///
/// The codec instance is created from the first frame header and rebuilt if
/// the stream changes rate or channel layout.
#[derive(Default)]
pub struct SymphoniaFrameDecoder {
    codec: Option<(u32, u16, Box<dyn Decoder>)>,
    samples: Option<(SignalSpec, u64, SampleBuffer<i16>)>,
}

impl SymphoniaFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_codec(&mut self, header: &FrameHeader) -> Result<(), FrameError> {
        let current = matches!(
            &self.codec,
            Some((rate, channels, _)) if *rate == header.sample_rate && *channels == header.channels
        );
        if !current {
            let layout = if header.channels == 2 {
                Channels::FRONT_LEFT | Channels::FRONT_RIGHT
            } else {
                Channels::FRONT_CENTRE
            };
            let mut params = CodecParameters::new();
            params
                .for_codec(CODEC_TYPE_MP3)
                .with_sample_rate(header.sample_rate)
                .with_channels(layout);
            let decoder = symphonia::default::get_codecs()
                .make(&params, &DecoderOptions::default())
                .map_err(|e| FrameError::Invalid {
                    consumed: 0,
                    reason: format!("MP3 decoder init failed: {}", e),
                })?;
            log::debug!(
                "MP3 codec (re)created: {} Hz, {} ch",
                header.sample_rate,
                header.channels
            );
            self.codec = Some((header.sample_rate, header.channels, decoder));
        }
        Ok(())
    }
}

impl StreamDecoder for SymphoniaFrameDecoder {
    fn find_sync(&self, data: &[u8]) -> Option<usize> {
        find_sync_word(data)
    }

    fn decode_frame(&mut self, data: &[u8], out: &mut [i16]) -> Result<FrameInfo, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::Underflow);
        }
        let Some(header) = FrameHeader::parse(&data[..HEADER_LEN]) else {
            return Err(FrameError::Invalid {
                consumed: 0,
                reason: "no frame header at cursor".to_string(),
            });
        };
        let len = header.frame_len();
        if data.len() < len {
            return Err(FrameError::Underflow);
        }

        self.ensure_codec(&header)?;
        let Some((_, _, codec)) = self.codec.as_mut() else {
            return Err(FrameError::Invalid {
                consumed: 0,
                reason: "MP3 decoder unavailable".to_string(),
            });
        };

        let packet = Packet::new_from_slice(0, 0, header.samples_per_frame() as u64, &data[..len]);
        let decoded = match codec.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                return Err(FrameError::Invalid {
                    consumed: len,
                    reason: e.to_string(),
                });
            }
        };

        let spec = *decoded.spec();
        let capacity = decoded.capacity() as u64;
        if !matches!(&self.samples, Some((s, c, _)) if *s == spec && *c == capacity) {
            self.samples = None;
        }
        let (_, _, buf) = self
            .samples
            .get_or_insert_with(|| (spec, capacity, SampleBuffer::<i16>::new(capacity, spec)));
        buf.copy_interleaved_ref(decoded);

        let samples = buf.samples();
        let n = samples.len().min(out.len());
        out[..n].copy_from_slice(&samples[..n]);

        Ok(FrameInfo {
            sample_rate: spec.rate,
            channels: spec.channels.count() as u16,
            samples: n,
            consumed: len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // MPEG-1 Layer III, 128 kbit/s, 44.1 kHz, no padding, joint stereo
    const HEADER_128K: [u8; 4] = [0xFF, 0xFB, 0x90, 0x44];

    #[test]
    fn parses_common_header() {
        let header = FrameHeader::parse(&HEADER_128K).unwrap();
        assert_eq!(header.version, MpegVersion::Mpeg1);
        assert_eq!(header.bitrate_kbps, 128);
        assert_eq!(header.sample_rate, 44_100);
        assert_eq!(header.channels, 2);
        assert!(!header.padding);
        assert_eq!(header.frame_len(), 417);
        assert_eq!(header.samples_per_frame(), 1152);
    }

    #[test]
    fn parses_mpeg2_mono_with_padding() {
        // MPEG-2 Layer III, 64 kbit/s, 24 kHz, padded, mono
        let header = FrameHeader::parse(&[0xFF, 0xF3, 0x86, 0xC0]).unwrap();
        assert_eq!(header.version, MpegVersion::Mpeg2);
        assert_eq!(header.bitrate_kbps, 64);
        assert_eq!(header.sample_rate, 24_000);
        assert_eq!(header.channels, 1);
        assert_eq!(header.frame_len(), 72 * 64_000 / 24_000 + 1);
        assert_eq!(header.samples_per_frame(), 576);
    }

    #[test]
    fn rejects_invalid_headers() {
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0x00, 0x44]).is_none()); // free format
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0xF0, 0x44]).is_none()); // bad bitrate
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0x9C, 0x44]).is_none()); // reserved rate
        assert!(FrameHeader::parse(&[0xFF, 0xFD, 0x90, 0x44]).is_none()); // layer II
        assert!(FrameHeader::parse(&[0xFF, 0xEB, 0x90, 0x44]).is_none()); // reserved version
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0x90]).is_none());
    }

    #[test]
    fn sync_search_skips_junk() {
        let mut data = b"ID3\x03\x00\xFF\xFF\x00junk".to_vec();
        let at = data.len();
        data.extend_from_slice(&HEADER_128K);
        assert_eq!(find_sync_word(&data), Some(at));
        assert_eq!(find_sync_word(&[0u8; 4096]), None);
        assert_eq!(find_sync_word(&HEADER_128K[..3]), None);
    }

    #[test]
    fn short_input_underflows() {
        let mut decoder = SymphoniaFrameDecoder::new();
        let mut out = vec![0i16; crate::audio::stream_decoder::MAX_SAMPLES_PER_FRAME];
        let mut data = HEADER_128K.to_vec();
        data.resize(100, 0);
        assert_eq!(decoder.decode_frame(&data, &mut out), Err(FrameError::Underflow));
        assert_eq!(decoder.decode_frame(&data[..2], &mut out), Err(FrameError::Underflow));
    }

    #[test]
    fn garbage_at_cursor_consumes_nothing() {
        let mut decoder = SymphoniaFrameDecoder::new();
        let mut out = vec![0i16; crate::audio::stream_decoder::MAX_SAMPLES_PER_FRAME];
        match decoder.decode_frame(&[0u8; 64], &mut out) {
            Err(FrameError::Invalid { consumed, .. }) => assert_eq!(consumed, 0),
            other => panic!("unexpected {:?}", other),
        }
    }

    fn silent_frames(count: usize) -> Vec<u8> {
        let mut frame = HEADER_128K.to_vec();
        frame.resize(417, 0);
        frame.repeat(count)
    }

    #[test]
    fn silent_frame_decodes_to_stereo_pcm() {
        let mut decoder = SymphoniaFrameDecoder::new();
        let mut out = vec![1i16; crate::audio::stream_decoder::MAX_SAMPLES_PER_FRAME];
        let info = decoder.decode_frame(&silent_frames(1), &mut out).unwrap();
        assert_eq!(info.sample_rate, 44_100);
        assert_eq!(info.channels, 2);
        assert_eq!(info.consumed, 417);
        assert!(info.samples > 0);
        assert!(out[..info.samples].iter().all(|&s| s == 0));
    }

    #[test]
    fn silent_stream_plays_through_sink() {
        use crate::audio::mp3::{Mp3Settings, play_mp3};
        use crate::audio::sink::{MemorySink, PcmFormat};
        use std::sync::atomic::AtomicBool;
        use std::time::Duration;

        let running = AtomicBool::new(true);
        let mut sink = MemorySink::new();
        let report = play_mp3(
            &silent_frames(20),
            SymphoniaFrameDecoder::new(),
            &mut sink,
            Mp3Settings::default(),
            Duration::from_millis(100),
            &running,
        )
        .unwrap();

        assert_eq!(report.frames_decoded, 20);
        assert_eq!(report.format, Some(PcmFormat::s16(44_100, 2)));
        assert_eq!(sink.reconfigurations(), vec![PcmFormat::s16(44_100, 2)]);
        assert!(sink.written().iter().all(|&b| b == 0));
    }
}
