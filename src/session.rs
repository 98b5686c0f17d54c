//! Playback sessions: one canonical pipeline per input kind.
//!
//! Streaming path:
//! chunked body → field scanner → base64 → WAV container → volume → sink.
//! File path: stored WAV or MP3 bytes → volume → sink.
//!
//! Every public entry point flushes the sink when it is done, whether the
//! session succeeded or not.

use serde::Serialize;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::audio::mp3::{self, Mp3Report, Mp3Settings, TAIL_SILENCE_BYTES};
use crate::audio::mpeg_frame::SymphoniaFrameDecoder;
use crate::audio::pcm_block::PcmBlock;
use crate::audio::sink::{AudioSink, PcmFormat, write_all};
use crate::audio::volume;
use crate::audio::wav::{self, WavStreamParser};
use crate::error::{PlaybackError, Result};
use crate::payload::{Base64StreamDecoder, FieldScanner};
use crate::transport::chunked::{ChunkedBodyReader, TransportTimeouts};

/// Body bytes pulled from the transport per read.
const BODY_READ_BYTES: usize = 1024;
/// Stored WAV files are streamed in reads of this size.
const FILE_READ_BYTES: usize = 1024;

/// How the HTTP body is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Decode and play while the body is still arriving.
    Stream,
    /// Collect the whole body first (bounded by `max_body_bytes`).
    Buffered,
}

impl FromStr for StreamMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stream" => Ok(Self::Stream),
            "buffered" => Ok(Self::Buffered),
            other => Err(format!("unknown stream mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// JSON field carrying the base64 audio.
    pub field_name: String,
    pub mode: StreamMode,
    pub max_body_bytes: usize,
    pub base64_block_chars: usize,
    pub max_base64_failures: u32,
    pub wav_header_window: usize,
    pub pcm_block_bytes: usize,
    pub volume_percent: u16,
    /// Format assumed when a WAV header has no `fmt ` chunk before `data`.
    pub default_format: PcmFormat,
    pub write_timeout: Duration,
    pub timeouts: TransportTimeouts,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            field_name: "audioContent".to_string(),
            mode: StreamMode::Stream,
            max_body_bytes: 512 * 1024,
            base64_block_chars: 4096,
            max_base64_failures: 3,
            wav_header_window: 200,
            pcm_block_bytes: 8192,
            volume_percent: volume::UNITY_PERCENT,
            default_format: PcmFormat::s16(24_000, 1),
            write_timeout: Duration::from_secs(2),
            timeouts: TransportTimeouts::default(),
        }
    }
}

/// Outcome of a WAV session, streamed or stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackReport {
    pub format: Option<PcmFormat>,
    /// PCM bytes accepted by the sink, tail silence excluded.
    pub pcm_bytes: u64,
    pub body_bytes: u64,
    pub base64_chars: u64,
    /// Bytes produced by base64 decoding, WAV header included.
    pub decoded_bytes: u64,
    /// WAV payload bytes found after the header.
    pub payload_bytes: u64,
    pub blocks_skipped: u32,
}

/// WAV container → volume → sink.
///
/// Reconfigures the sink exactly once, when the header completes.
struct PcmStage {
    wav: WavStreamParser,
    block: PcmBlock,
    pcm: Vec<u8>,
    format: Option<PcmFormat>,
    volume_percent: u16,
    write_timeout: Duration,
    written: u64,
}

impl PcmStage {
    fn new(settings: &StreamSettings) -> Self {
        Self {
            wav: WavStreamParser::new(settings.wav_header_window, settings.default_format),
            block: PcmBlock::new(settings.pcm_block_bytes),
            pcm: Vec::with_capacity(settings.pcm_block_bytes),
            format: None,
            volume_percent: settings.volume_percent,
            write_timeout: settings.write_timeout,
            written: 0,
        }
    }

    fn push<S: AudioSink + ?Sized>(&mut self, container: &[u8], sink: &mut S) -> Result<()> {
        self.pcm.clear();
        if let Some(info) = self.wav.push(container, &mut self.pcm)? {
            let format = info.format();
            sink.reconfigure(format)?;
            self.format = Some(format);
        }

        let Self {
            block,
            pcm,
            volume_percent,
            write_timeout,
            written,
            ..
        } = self;
        block.push(pcm.as_slice(), |b| {
            emit(sink, b, *volume_percent, *write_timeout, written)
        })
    }

    fn finish<S: AudioSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        self.wav.finish()?;
        let Self {
            block,
            volume_percent,
            write_timeout,
            written,
            ..
        } = self;
        block.finish(|b| emit(sink, b, *volume_percent, *write_timeout, written))
    }
}

fn emit<S: AudioSink + ?Sized>(
    sink: &mut S,
    block: &mut [u8],
    volume_percent: u16,
    write_timeout: Duration,
    written: &mut u64,
) -> Result<()> {
    volume::scale_le_bytes(block, volume_percent);
    *written += write_all(sink, block, write_timeout)? as u64;
    Ok(())
}

/// State of one streamed playback request.
pub struct AudioStreamSession<R> {
    body: ChunkedBodyReader<R>,
    mode: StreamMode,
    max_body_bytes: usize,
    field_name: String,
    scanner: FieldScanner,
    base64: Base64StreamDecoder,
    stage: PcmStage,
    chars: Vec<u8>,
    decoded: Vec<u8>,
}

impl<R: Read> AudioStreamSession<R> {
    pub fn new(source: R, settings: &StreamSettings) -> Self {
        Self {
            body: ChunkedBodyReader::new(source, settings.timeouts),
            mode: settings.mode,
            max_body_bytes: settings.max_body_bytes,
            field_name: settings.field_name.clone(),
            scanner: FieldScanner::new(&settings.field_name),
            base64: Base64StreamDecoder::new(
                settings.base64_block_chars,
                settings.max_base64_failures,
            ),
            stage: PcmStage::new(settings),
            chars: Vec::with_capacity(BODY_READ_BYTES),
            decoded: Vec::with_capacity(settings.base64_block_chars),
        }
    }

    /// Push decoded body bytes through the pipeline.
    pub fn feed<S: AudioSink + ?Sized>(&mut self, body: &[u8], sink: &mut S) -> Result<()> {
        if self.scanner.is_done() {
            return Ok(());
        }
        self.chars.clear();
        self.scanner.scan(body, &mut self.chars);
        self.decoded.clear();
        self.base64.push(&self.chars, &mut self.decoded)?;
        self.stage.push(&self.decoded, sink)
    }

    /// Drive the transport to the end of the audio field and drain the
    /// pipeline. Does not flush the sink.
    pub fn run<S: AudioSink + ?Sized>(
        mut self,
        sink: &mut S,
        running: &AtomicBool,
    ) -> Result<PlaybackReport> {
        match self.mode {
            StreamMode::Buffered => {
                let body = self.body.read_to_end(self.max_body_bytes)?;
                log::info!("Buffered {} body bytes in {} chunks", body.len(), self.body.chunks());
                ensure_running(running)?;
                self.feed(&body, sink)?;
            }
            StreamMode::Stream => {
                let mut buf = vec![0u8; BODY_READ_BYTES];
                loop {
                    ensure_running(running)?;
                    let n = self.body.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    self.feed(&buf[..n], sink)?;
                    if self.scanner.is_done() {
                        log::debug!("Audio field complete after {} body bytes", self.body.body_bytes());
                        break;
                    }
                }
            }
        }
        self.finish(sink)
    }

    fn finish<S: AudioSink + ?Sized>(mut self, sink: &mut S) -> Result<PlaybackReport> {
        if !self.scanner.found() {
            return Err(PlaybackError::Format(format!(
                "field '{}' not found in {} body bytes",
                self.field_name,
                self.body.body_bytes()
            )));
        }
        if self.scanner.emitted() == 0 {
            return Err(PlaybackError::Format(format!(
                "field '{}' is empty",
                self.field_name
            )));
        }
        if !self.scanner.is_done() {
            log::warn!("Body ended inside the '{}' value", self.field_name);
        }

        self.decoded.clear();
        self.base64.finish(&mut self.decoded)?;
        self.stage.push(&self.decoded, sink)?;
        self.stage.finish(sink)?;

        let report = PlaybackReport {
            format: self.stage.format,
            pcm_bytes: self.stage.written,
            body_bytes: self.body.body_bytes(),
            base64_chars: self.base64.chars_in(),
            decoded_bytes: self.base64.bytes_out(),
            payload_bytes: self.stage.wav.forwarded(),
            blocks_skipped: self.base64.blocks_skipped(),
        };
        log::info!(
            "Stream playback done: {} PCM bytes from {} base64 chars ({} blocks skipped)",
            report.pcm_bytes,
            report.base64_chars,
            report.blocks_skipped
        );
        Ok(report)
    }
}

fn ensure_running(running: &AtomicBool) -> Result<()> {
    if running.load(Ordering::Relaxed) {
        Ok(())
    } else {
        log::info!("Playback cancelled");
        Err(PlaybackError::Cancelled)
    }
}

/// Flush the sink, keeping the session's own error if there was one.
fn flush_after<T, S: AudioSink + ?Sized>(sink: &mut S, result: Result<T>) -> Result<T> {
    let flushed = sink.flush();
    match (result, flushed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(flush_err)) => {
            log::warn!("Sink flush after failed session also failed: {}", flush_err);
            Err(e)
        }
    }
}

/// Play a chunked HTTP body carrying a base64 WAV in a JSON field.
pub fn play_stream<R, S>(
    source: R,
    sink: &mut S,
    settings: &StreamSettings,
    running: &AtomicBool,
) -> Result<PlaybackReport>
where
    R: Read,
    S: AudioSink + ?Sized,
{
    let result = AudioStreamSession::new(source, settings).run(sink, running);
    if let Err(e) = &result {
        log::error!("Stream playback failed: {}", e);
    }
    flush_after(sink, result)
}

/// Play a WAV container that is already in memory.
pub fn play_wav_bytes<S: AudioSink + ?Sized>(
    bytes: &[u8],
    sink: &mut S,
    settings: &StreamSettings,
    running: &AtomicBool,
) -> Result<PlaybackReport> {
    let result = wav_bytes(bytes, sink, settings, running);
    flush_after(sink, result)
}

fn wav_bytes<S: AudioSink + ?Sized>(
    bytes: &[u8],
    sink: &mut S,
    settings: &StreamSettings,
    running: &AtomicBool,
) -> Result<PlaybackReport> {
    let info = wav::parse_header(bytes, settings.wav_header_window, settings.default_format)?;
    let format = info.format();
    sink.reconfigure(format)?;

    let payload = wav::pcm_payload(bytes, &info);
    let payload_len = payload.len();
    let payload = &payload[..payload_len & !1];
    let mut buf = Vec::with_capacity(FILE_READ_BYTES);
    let mut written = 0u64;
    for piece in payload.chunks(FILE_READ_BYTES) {
        ensure_running(running)?;
        buf.clear();
        buf.extend_from_slice(piece);
        emit(sink, &mut buf, settings.volume_percent, settings.write_timeout, &mut written)?;
    }
    write_all(sink, &[0u8; TAIL_SILENCE_BYTES], settings.write_timeout)?;

    log::info!("WAV playback done: {} PCM bytes", written);
    Ok(PlaybackReport {
        format: Some(format),
        pcm_bytes: written,
        payload_bytes: payload_len as u64,
        ..PlaybackReport::default()
    })
}

/// Stream a stored WAV file from disk.
pub fn play_wav_file<S: AudioSink + ?Sized>(
    path: &Path,
    sink: &mut S,
    settings: &StreamSettings,
    running: &AtomicBool,
) -> Result<PlaybackReport> {
    let result = wav_file(path, sink, settings, running);
    if let Err(e) = &result {
        log::error!("WAV file {} failed: {}", path.display(), e);
    }
    flush_after(sink, result)
}

fn wav_file<S: AudioSink + ?Sized>(
    path: &Path,
    sink: &mut S,
    settings: &StreamSettings,
    running: &AtomicBool,
) -> Result<PlaybackReport> {
    let mut file = File::open(path)?;
    log::info!("Playing WAV file {}", path.display());

    let mut stage = PcmStage::new(settings);
    let mut buf = vec![0u8; FILE_READ_BYTES];
    let mut file_bytes = 0u64;
    loop {
        ensure_running(running)?;
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        file_bytes += n as u64;
        stage.push(&buf[..n], sink)?;
    }
    stage.finish(sink)?;
    write_all(sink, &[0u8; TAIL_SILENCE_BYTES], settings.write_timeout)?;

    Ok(PlaybackReport {
        format: stage.format,
        pcm_bytes: stage.written,
        body_bytes: file_bytes,
        payload_bytes: stage.wav.forwarded(),
        ..PlaybackReport::default()
    })
}

/// Decode and play a stored MP3 file.
pub fn play_mp3_file<S: AudioSink + ?Sized>(
    path: &Path,
    sink: &mut S,
    settings: Mp3Settings,
    write_timeout: Duration,
    running: &AtomicBool,
) -> Result<Mp3Report> {
    let result = std::fs::read(path).map_err(PlaybackError::from).and_then(|data| {
        log::info!("Playing MP3 file {} ({} bytes)", path.display(), data.len());
        mp3::play_mp3(
            &data,
            SymphoniaFrameDecoder::new(),
            &mut *sink,
            settings,
            write_timeout,
            running,
        )
    });
    flush_after(sink, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::{MemorySink, SinkEvent};
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use std::io::Cursor;

    static RUN: AtomicBool = AtomicBool::new(true);

    fn wav_file_bytes(rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut out = wav::write_header(PcmFormat::s16(rate, channels), (samples.len() * 2) as u32).to_vec();
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    fn chunked(body: &[u8], size: usize) -> Vec<u8> {
        let mut wire = Vec::new();
        for chunk in body.chunks(size) {
            wire.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            wire.extend_from_slice(chunk);
            wire.extend_from_slice(b"\r\n");
        }
        wire.extend_from_slice(b"0\r\n\r\n");
        wire
    }

    fn json_body(wav: &[u8]) -> Vec<u8> {
        format!(r#"{{"audioContent":"{}"}}"#, STANDARD.encode(wav)).into_bytes()
    }

    #[test]
    fn stream_mode_parses() {
        assert_eq!("stream".parse::<StreamMode>(), Ok(StreamMode::Stream));
        assert_eq!("buffered".parse::<StreamMode>(), Ok(StreamMode::Buffered));
        assert!("eager".parse::<StreamMode>().is_err());
    }

    #[test]
    fn streams_wav_into_sink() {
        let samples: Vec<i16> = (0..500).map(|i| (i * 10) as i16).collect();
        let wire = chunked(&json_body(&wav_file_bytes(16000, 1, &samples)), 37);
        let mut sink = MemorySink::new();
        let settings = StreamSettings {
            pcm_block_bytes: 64,
            base64_block_chars: 16,
            ..StreamSettings::default()
        };

        let report = play_stream(Cursor::new(wire), &mut sink, &settings, &RUN).unwrap();

        let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(sink.written(), expected);
        assert_eq!(sink.reconfigurations(), vec![PcmFormat::s16(16000, 1)]);
        assert_eq!(sink.events().last(), Some(&SinkEvent::Flush));
        assert_eq!(report.pcm_bytes, 1000);
        assert_eq!(report.decoded_bytes, 44 + 1000);
        assert_eq!(report.payload_bytes, 1000);
        assert_eq!(report.blocks_skipped, 0);
    }

    #[test]
    fn json_escapes_inside_the_value_are_skipped() {
        let samples = [100i16, 200, 300, 400];
        let encoded = STANDARD.encode(wav_file_bytes(8000, 1, &samples));
        assert!(!encoded.contains('/'));
        // break the value up with escaped line breaks every 10 characters
        let wrapped = encoded
            .as_bytes()
            .chunks(10)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\\r\\n");
        let body = format!(r#"{{"meta":{{"a":1}},"audioContent":"{}","x":"y"}}"#, wrapped);
        let mut sink = MemorySink::new();
        play_stream(
            Cursor::new(chunked(body.as_bytes(), 5)),
            &mut sink,
            &StreamSettings::default(),
            &RUN,
        )
        .unwrap();
        let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(sink.written(), expected);
    }

    #[test]
    fn missing_field_is_a_format_error_and_still_flushes() {
        let wire = chunked(br#"{"error":"quota"}"#, 4);
        let mut sink = MemorySink::new();
        let err = play_stream(Cursor::new(wire), &mut sink, &StreamSettings::default(), &RUN).unwrap_err();
        assert!(matches!(err, PlaybackError::Format(_)));
        assert_eq!(sink.events(), &[SinkEvent::Flush]);
    }

    #[test]
    fn empty_field_is_a_format_error() {
        let wire = chunked(br#"{"audioContent":""}"#, 64);
        let mut sink = MemorySink::new();
        assert!(matches!(
            play_stream(Cursor::new(wire), &mut sink, &StreamSettings::default(), &RUN),
            Err(PlaybackError::Format(_))
        ));
    }

    #[test]
    fn non_wav_payload_is_rejected() {
        let body = format!(r#"{{"audioContent":"{}"}}"#, STANDARD.encode([7u8; 300]));
        let mut sink = MemorySink::new();
        assert!(matches!(
            play_stream(Cursor::new(chunked(body.as_bytes(), 100)), &mut sink, &StreamSettings::default(), &RUN),
            Err(PlaybackError::Format(_))
        ));
        assert!(sink.reconfigurations().is_empty());
    }

    #[test]
    fn buffered_mode_respects_body_cap() {
        let wire = chunked(&json_body(&wav_file_bytes(8000, 1, &[0; 400])), 128);
        let settings = StreamSettings {
            mode: StreamMode::Buffered,
            max_body_bytes: 256,
            ..StreamSettings::default()
        };
        let mut sink = MemorySink::new();
        assert!(matches!(
            play_stream(Cursor::new(wire), &mut sink, &settings, &RUN),
            Err(PlaybackError::Transport(_))
        ));
        assert_eq!(sink.flushes(), 1);
    }

    #[test]
    fn cancelled_session_writes_nothing() {
        let stopped = AtomicBool::new(false);
        let wire = chunked(&json_body(&wav_file_bytes(8000, 1, &[1; 10])), 16);
        let mut sink = MemorySink::new();
        assert!(matches!(
            play_stream(Cursor::new(wire), &mut sink, &StreamSettings::default(), &stopped),
            Err(PlaybackError::Cancelled)
        ));
        assert_eq!(sink.events(), &[SinkEvent::Flush]);
    }

    #[test]
    fn stored_wav_bytes_play_with_tail_and_flush() {
        let wav = wav_file_bytes(22050, 2, &[100, -100, 200, -200]);
        let mut sink = MemorySink::new();
        let settings = StreamSettings {
            volume_percent: 50,
            ..StreamSettings::default()
        };
        let report = play_wav_bytes(&wav, &mut sink, &settings, &RUN).unwrap();

        assert_eq!(report.format, Some(PcmFormat::s16(22050, 2)));
        assert_eq!(report.pcm_bytes, 8);
        let written = sink.written();
        let expected: Vec<u8> = [50i16, -50, 100, -100].iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(&written[..8], expected.as_slice());
        assert_eq!(written.len(), 8 + TAIL_SILENCE_BYTES);
        assert_eq!(sink.flushes(), 1);
    }

    #[test]
    fn stored_wav_with_bad_rate_never_touches_the_device() {
        let mut wav = wav_file_bytes(8000, 1, &[1, 2, 3]);
        wav[24..28].copy_from_slice(&0u32.to_le_bytes());
        let mut sink = MemorySink::new();
        assert!(play_wav_bytes(&wav, &mut sink, &StreamSettings::default(), &RUN).is_err());
        assert_eq!(sink.events(), &[SinkEvent::Flush]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let mut sink = MemorySink::new();
        let err = play_mp3_file(
            Path::new("/nonexistent/voice.mp3"),
            &mut sink,
            Mp3Settings::default(),
            Duration::from_millis(10),
            &RUN,
        )
        .unwrap_err();
        assert!(matches!(err, PlaybackError::Io(_)));
        assert_eq!(sink.flushes(), 1);
    }
}
