use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    playback: Playback,
    stream: Stream,
    mp3: Mp3,
    sink: Sink,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Playback {
    device: String,
    volume_percent: u16,
    default_sample_rate: u32,
    default_channels: u16,
    period_size: usize,
}

#[derive(Deserialize)]
struct Stream {
    field_name: String,
    mode: String,
    max_body_bytes: usize,
    base64_block_chars: usize,
    max_base64_failures: u32,
    wav_header_window: usize,
    pcm_block_bytes: usize,
    stall_timeout_ms: u64,
    total_timeout_ms: u64,
    poll_interval_ms: u64,
}

#[derive(Deserialize)]
struct Mp3 {
    min_tail_bytes: usize,
    max_underflow_errors: u32,
    max_decode_errors: u32,
}

#[derive(Deserialize)]
struct Sink {
    write_timeout_ms: u64,
    flush_buffers: usize,
    flush_buffer_bytes: usize,
    cooldown_ms: u64,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 播放设备
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.playback.device);
    println!("cargo:rustc-env=PLAYBACK_VOLUME_PERCENT={}", config.playback.volume_percent);
    println!("cargo:rustc-env=PLAYBACK_DEFAULT_SAMPLE_RATE={}", config.playback.default_sample_rate);
    println!("cargo:rustc-env=PLAYBACK_DEFAULT_CHANNELS={}", config.playback.default_channels);
    println!("cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}", config.playback.period_size);

    // 流式解码
    println!("cargo:rustc-env=STREAM_FIELD_NAME={}", config.stream.field_name);
    println!("cargo:rustc-env=STREAM_MODE={}", config.stream.mode);
    println!("cargo:rustc-env=STREAM_MAX_BODY_BYTES={}", config.stream.max_body_bytes);
    println!("cargo:rustc-env=STREAM_BASE64_BLOCK_CHARS={}", config.stream.base64_block_chars);
    println!("cargo:rustc-env=STREAM_MAX_BASE64_FAILURES={}", config.stream.max_base64_failures);
    println!("cargo:rustc-env=STREAM_WAV_HEADER_WINDOW={}", config.stream.wav_header_window);
    println!("cargo:rustc-env=STREAM_PCM_BLOCK_BYTES={}", config.stream.pcm_block_bytes);
    println!("cargo:rustc-env=STREAM_STALL_TIMEOUT_MS={}", config.stream.stall_timeout_ms);
    println!("cargo:rustc-env=STREAM_TOTAL_TIMEOUT_MS={}", config.stream.total_timeout_ms);
    println!("cargo:rustc-env=STREAM_POLL_INTERVAL_MS={}", config.stream.poll_interval_ms);

    // MP3
    println!("cargo:rustc-env=MP3_MIN_TAIL_BYTES={}", config.mp3.min_tail_bytes);
    println!("cargo:rustc-env=MP3_MAX_UNDERFLOW_ERRORS={}", config.mp3.max_underflow_errors);
    println!("cargo:rustc-env=MP3_MAX_DECODE_ERRORS={}", config.mp3.max_decode_errors);

    // 输出设备
    println!("cargo:rustc-env=SINK_WRITE_TIMEOUT_MS={}", config.sink.write_timeout_ms);
    println!("cargo:rustc-env=SINK_FLUSH_BUFFERS={}", config.sink.flush_buffers);
    println!("cargo:rustc-env=SINK_FLUSH_BUFFER_BYTES={}", config.sink.flush_buffer_bytes);
    println!("cargo:rustc-env=SINK_COOLDOWN_MS={}", config.sink.cooldown_ms);
}
