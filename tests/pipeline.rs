use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use tts_playback::audio::wav;
use tts_playback::audio::{MemorySink, PcmFormat, SinkEvent};
use tts_playback::transport::{ChannelSource, TransportTimeouts};
use tts_playback::{
    PlaybackError, PlaybackReport, Speaker, StreamMode, StreamSettings, play_stream,
    play_wav_file,
};

static RUN: AtomicBool = AtomicBool::new(true);

/// Hands out one piece per read, with a "nothing yet" between pieces.
struct Pieces {
    pieces: VecDeque<Vec<u8>>,
    idle: bool,
}

impl Pieces {
    fn split(wire: &[u8], sizes: &[usize]) -> Self {
        let mut pieces = VecDeque::new();
        let mut offset = 0;
        for size in sizes.iter().cycle() {
            if offset >= wire.len() {
                break;
            }
            let end = (offset + size).min(wire.len());
            pieces.push_back(wire[offset..end].to_vec());
            offset = end;
        }
        Self { pieces, idle: false }
    }
}

impl Read for Pieces {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.idle = !self.idle;
        if self.idle {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let Some(front) = self.pieces.front_mut() else {
            return Ok(0);
        };
        let n = buf.len().min(front.len());
        buf[..n].copy_from_slice(&front[..n]);
        front.drain(..n);
        if front.is_empty() {
            self.pieces.pop_front();
        }
        Ok(n)
    }
}

fn wav_bytes(rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let mut out = wav::write_header(PcmFormat::s16(rate, channels), (samples.len() * 2) as u32).to_vec();
    out.extend(samples.iter().flat_map(|s| s.to_le_bytes()));
    out
}

fn json_body(wav: &[u8]) -> Vec<u8> {
    serde_json::json!({
        "audioContent": STANDARD.encode(wav),
        "audioConfig": { "audioEncoding": "LINEAR16", "sampleRateHertz": 8000 },
    })
    .to_string()
    .into_bytes()
}

fn chunked(body: &[u8], sizes: &[usize]) -> Vec<u8> {
    let mut wire = Vec::new();
    let mut offset = 0;
    for size in sizes.iter().cycle() {
        if offset >= body.len() {
            break;
        }
        let end = (offset + size).min(body.len());
        wire.extend_from_slice(format!("{:X}\r\n", end - offset).as_bytes());
        wire.extend_from_slice(&body[offset..end]);
        wire.extend_from_slice(b"\r\n");
        offset = end;
    }
    wire.extend_from_slice(b"0\r\n\r\n");
    wire
}

fn fast_settings() -> StreamSettings {
    StreamSettings {
        timeouts: TransportTimeouts {
            stall: Duration::from_secs(2),
            total: Duration::from_secs(10),
            poll_interval: Duration::from_micros(50),
        },
        ..StreamSettings::default()
    }
}

fn ramp(n: usize) -> Vec<i16> {
    (0..n).map(|i| ((i % 200) as i16 - 100) * 300).collect()
}

fn scaled(samples: &[i16], percent: i32) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| (i32::from(s) * percent / 100).clamp(-32768, 32767) as i16)
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

#[test]
fn end_to_end_8khz_mono_wav() {
    let samples = ramp(100);
    let wire = chunked(&json_body(&wav_bytes(8000, 1, &samples)), &[17, 64, 3]);
    let settings = StreamSettings {
        volume_percent: 80,
        ..fast_settings()
    };

    let mut sink = MemorySink::new();
    let report = play_stream(Pieces::split(&wire, &[5, 11, 200]), &mut sink, &settings, &RUN).unwrap();

    assert_eq!(sink.reconfigurations(), vec![PcmFormat::s16(8000, 1)]);
    assert_eq!(sink.written(), scaled(&samples, 80));
    assert_eq!(report.pcm_bytes, 200);
    assert_eq!(
        sink.events().first(),
        Some(&SinkEvent::Reconfigure(PcmFormat::s16(8000, 1)))
    );
    assert_eq!(sink.events().last(), Some(&SinkEvent::Flush));
    assert_eq!(sink.flushes(), 1);
}

#[test]
fn output_does_not_depend_on_how_the_wire_is_split() {
    let samples = ramp(300);
    let wire = chunked(&json_body(&wav_bytes(16000, 2, &samples)), &[100]);
    let expected = scaled(&samples, 100);

    for split in (0..=wire.len()).step_by(7) {
        let mut sink = MemorySink::new();
        let source = Pieces::split(&wire, &[split.max(1), wire.len()]);
        play_stream(source, &mut sink, &fast_settings(), &RUN).unwrap();
        assert_eq!(sink.written(), expected, "split at {}", split);
        assert_eq!(sink.reconfigurations().len(), 1, "split at {}", split);
    }
}

#[test]
fn small_blocks_everywhere_give_the_same_pcm() {
    let samples = ramp(1000);
    let wire = chunked(&json_body(&wav_bytes(24000, 1, &samples)), &[1, 2, 3, 500]);
    let settings = StreamSettings {
        base64_block_chars: 4,
        pcm_block_bytes: 2,
        wav_header_window: 64,
        ..fast_settings()
    };
    let mut sink = MemorySink::new();
    play_stream(Pieces::split(&wire, &[1, 9, 40]), &mut sink, &settings, &RUN).unwrap();
    assert_eq!(sink.written(), scaled(&samples, 100));
}

#[test]
fn buffered_and_streamed_modes_agree() {
    let samples = ramp(2000);
    let wire = chunked(&json_body(&wav_bytes(22050, 1, &samples)), &[333, 1024]);

    let run = |mode| {
        let settings = StreamSettings {
            mode,
            volume_percent: 150,
            ..fast_settings()
        };
        let mut sink = MemorySink::new();
        let report = play_stream(Cursor::new(wire.clone()), &mut sink, &settings, &RUN).unwrap();
        (report, sink.events().to_vec())
    };

    let (streamed, streamed_events) = run(StreamMode::Stream);
    let (buffered, buffered_events) = run(StreamMode::Buffered);
    assert_eq!(streamed.pcm_bytes, 4000);
    assert_eq!(streamed.format, buffered.format);
    assert_eq!(streamed.pcm_bytes, buffered.pcm_bytes);
    assert_eq!(streamed.base64_chars, buffered.base64_chars);

    let pcm = |events: &[SinkEvent]| -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Write(b) => Some(b.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    };
    assert_eq!(pcm(&streamed_events), pcm(&buffered_events));
}

#[test]
fn field_not_found_aborts_as_format_error() {
    let body = serde_json::json!({ "error": { "code": 429, "message": "quota" } }).to_string();
    let wire = chunked(body.as_bytes(), &[8]);
    let mut sink = MemorySink::new();
    let err = play_stream(Cursor::new(wire), &mut sink, &fast_settings(), &RUN).unwrap_err();
    assert!(matches!(err, PlaybackError::Format(_)));
    assert!(sink.written().is_empty());
}

#[test]
fn corrupt_base64_block_is_skipped() {
    let samples = ramp(200);
    let mut encoded = STANDARD.encode(wav_bytes(8000, 1, &samples)).into_bytes();
    // damage a block well inside the PCM payload
    encoded[200..204].copy_from_slice(b"====");
    let body = format!(
        r#"{{"audioContent":"{}"}}"#,
        String::from_utf8(encoded).unwrap()
    );
    let settings = StreamSettings {
        base64_block_chars: 40,
        ..fast_settings()
    };
    let mut sink = MemorySink::new();
    let report = play_stream(
        Cursor::new(chunked(body.as_bytes(), &[64])),
        &mut sink,
        &settings,
        &RUN,
    )
    .unwrap();
    assert_eq!(report.blocks_skipped, 1);
    assert_eq!(report.pcm_bytes, 400 - 30);
}

#[test]
fn truncated_transport_is_reported() {
    let wire = chunked(&json_body(&wav_bytes(8000, 1, &ramp(100))), &[50]);
    let cut = &wire[..wire.len() / 2];
    let mut sink = MemorySink::new();
    let err = play_stream(Cursor::new(cut.to_vec()), &mut sink, &fast_settings(), &RUN).unwrap_err();
    assert!(matches!(err, PlaybackError::Transport(_)));
    assert_eq!(sink.flushes(), 1);
}

#[test]
fn stalled_transport_times_out() {
    let (tx, source) = ChannelSource::channel(4);
    let settings = StreamSettings {
        timeouts: TransportTimeouts {
            stall: Duration::from_millis(50),
            total: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1),
        },
        ..StreamSettings::default()
    };
    tx.blocking_send(bytes::Bytes::from_static(b"10\r\n{\"audioConte"))
        .unwrap();
    let mut sink = MemorySink::new();
    let err = play_stream(source, &mut sink, &settings, &RUN).unwrap_err();
    assert!(matches!(err, PlaybackError::TransportTimeout));
    drop(tx);
}

#[test]
fn channel_fed_session_plays_through_a_speaker() {
    let samples = ramp(500);
    let wire = chunked(&json_body(&wav_bytes(8000, 1, &samples)), &[128]);
    let (tx, source) = ChannelSource::channel(8);

    let feeder = thread::spawn(move || {
        for piece in wire.chunks(37) {
            // the session hangs up once the audio field is complete
            if tx.blocking_send(bytes::Bytes::copy_from_slice(piece)).is_err() {
                break;
            }
            thread::sleep(Duration::from_micros(200));
        }
    });

    let mut speaker = Speaker::new(MemorySink::new(), Duration::from_secs(60));
    let status = speaker.status();
    let report: PlaybackReport = {
        let mut sink = speaker.acquire();
        assert!(status.is_speaking());
        play_stream(source, &mut *sink, &fast_settings(), &RUN).unwrap()
    };
    feeder.join().unwrap();

    assert_eq!(report.pcm_bytes, 1000);
    assert!(status.is_speaking(), "cooldown keeps capture gated");
    let sink = speaker.into_inner();
    assert_eq!(sink.written(), scaled(&samples, 100));
    assert_eq!(sink.flushes(), 1);
}

#[test]
fn stored_wav_file_plays_from_disk() {
    let samples = ramp(3000);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&wav_bytes(44100, 2, &samples)).unwrap();
    file.flush().unwrap();

    let settings = StreamSettings {
        volume_percent: 50,
        ..StreamSettings::default()
    };
    let mut sink = MemorySink::new();
    let report = play_wav_file(file.path(), &mut sink, &settings, &RUN).unwrap();

    assert_eq!(report.format, Some(PcmFormat::s16(44100, 2)));
    assert_eq!(report.pcm_bytes, 6000);
    assert_eq!(report.payload_bytes, 6000);
    assert_eq!(report.body_bytes, 44 + 6000);
    let written = sink.written();
    assert_eq!(&written[..6000], scaled(&samples, 50).as_slice());
    assert!(written[6000..].iter().all(|&b| b == 0));
    assert_eq!(sink.reconfigurations().len(), 1);
    assert_eq!(sink.flushes(), 1);
}

#[test]
fn stored_file_with_foreign_container_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"ID3\x04\x00\x00\x00\x00\x00\x00").unwrap();
    file.write_all(&[0u8; 400]).unwrap();
    let mut sink = MemorySink::new();
    let err = play_wav_file(file.path(), &mut sink, &StreamSettings::default(), &RUN).unwrap_err();
    assert!(matches!(err, PlaybackError::Format(_)));
    assert!(sink.reconfigurations().is_empty());
}
