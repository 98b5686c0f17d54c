use serde::Serialize;
use std::time::Duration;

use crate::audio::mp3::Mp3Settings;
use crate::audio::sink::{PcmFormat, SinkSettings};
use crate::session::{StreamMode, StreamSettings};
use crate::transport::chunked::TransportTimeouts;

#[derive(Debug, Serialize, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 播放设备
    pub playback_device: &'static str,
    pub volume_percent: u16,
    pub default_sample_rate: u32,
    pub default_channels: u16,
    pub period_size: usize,

    // 流式解码
    pub field_name: &'static str,
    pub stream_mode: StreamMode,
    pub max_body_bytes: usize,
    pub base64_block_chars: usize,
    pub max_base64_failures: u32,
    pub wav_header_window: usize,
    pub pcm_block_bytes: usize,
    pub stall_timeout_ms: u64,
    pub total_timeout_ms: u64,
    pub poll_interval_ms: u64,

    // MP3
    pub mp3_min_tail_bytes: usize,
    pub mp3_max_underflow_errors: u32,
    pub mp3_max_decode_errors: u32,

    // 输出设备
    pub sink_write_timeout_ms: u64,
    pub sink_flush_buffers: usize,
    pub sink_flush_buffer_bytes: usize,
    pub cooldown_ms: u64,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            playback_device: env!("PLAYBACK_DEVICE"),
            volume_percent: env!("PLAYBACK_VOLUME_PERCENT").parse()
                .map_err(|_| "Failed to parse PLAYBACK_VOLUME_PERCENT")?,
            default_sample_rate: env!("PLAYBACK_DEFAULT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_DEFAULT_SAMPLE_RATE")?,
            default_channels: env!("PLAYBACK_DEFAULT_CHANNELS").parse()
                .map_err(|_| "Failed to parse PLAYBACK_DEFAULT_CHANNELS")?,
            period_size: env!("PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,

            field_name: env!("STREAM_FIELD_NAME"),
            stream_mode: env!("STREAM_MODE").parse()
                .map_err(|_| "Failed to parse STREAM_MODE")?,
            max_body_bytes: env!("STREAM_MAX_BODY_BYTES").parse()
                .map_err(|_| "Failed to parse STREAM_MAX_BODY_BYTES")?,
            base64_block_chars: env!("STREAM_BASE64_BLOCK_CHARS").parse()
                .map_err(|_| "Failed to parse STREAM_BASE64_BLOCK_CHARS")?,
            max_base64_failures: env!("STREAM_MAX_BASE64_FAILURES").parse()
                .map_err(|_| "Failed to parse STREAM_MAX_BASE64_FAILURES")?,
            wav_header_window: env!("STREAM_WAV_HEADER_WINDOW").parse()
                .map_err(|_| "Failed to parse STREAM_WAV_HEADER_WINDOW")?,
            pcm_block_bytes: env!("STREAM_PCM_BLOCK_BYTES").parse()
                .map_err(|_| "Failed to parse STREAM_PCM_BLOCK_BYTES")?,
            stall_timeout_ms: env!("STREAM_STALL_TIMEOUT_MS").parse()
                .map_err(|_| "Failed to parse STREAM_STALL_TIMEOUT_MS")?,
            total_timeout_ms: env!("STREAM_TOTAL_TIMEOUT_MS").parse()
                .map_err(|_| "Failed to parse STREAM_TOTAL_TIMEOUT_MS")?,
            poll_interval_ms: env!("STREAM_POLL_INTERVAL_MS").parse()
                .map_err(|_| "Failed to parse STREAM_POLL_INTERVAL_MS")?,

            mp3_min_tail_bytes: env!("MP3_MIN_TAIL_BYTES").parse()
                .map_err(|_| "Failed to parse MP3_MIN_TAIL_BYTES")?,
            mp3_max_underflow_errors: env!("MP3_MAX_UNDERFLOW_ERRORS").parse()
                .map_err(|_| "Failed to parse MP3_MAX_UNDERFLOW_ERRORS")?,
            mp3_max_decode_errors: env!("MP3_MAX_DECODE_ERRORS").parse()
                .map_err(|_| "Failed to parse MP3_MAX_DECODE_ERRORS")?,

            sink_write_timeout_ms: env!("SINK_WRITE_TIMEOUT_MS").parse()
                .map_err(|_| "Failed to parse SINK_WRITE_TIMEOUT_MS")?,
            sink_flush_buffers: env!("SINK_FLUSH_BUFFERS").parse()
                .map_err(|_| "Failed to parse SINK_FLUSH_BUFFERS")?,
            sink_flush_buffer_bytes: env!("SINK_FLUSH_BUFFER_BYTES").parse()
                .map_err(|_| "Failed to parse SINK_FLUSH_BUFFER_BYTES")?,
            cooldown_ms: env!("SINK_COOLDOWN_MS").parse()
                .map_err(|_| "Failed to parse SINK_COOLDOWN_MS")?,
        })
    }

    /// 没有 fmt 块时使用的默认格式
    pub fn default_format(&self) -> PcmFormat {
        PcmFormat::s16(self.default_sample_rate, self.default_channels)
    }

    pub fn transport_timeouts(&self) -> TransportTimeouts {
        TransportTimeouts {
            stall: Duration::from_millis(self.stall_timeout_ms),
            total: Duration::from_millis(self.total_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            field_name: self.field_name.to_string(),
            mode: self.stream_mode,
            max_body_bytes: self.max_body_bytes,
            base64_block_chars: self.base64_block_chars,
            max_base64_failures: self.max_base64_failures,
            wav_header_window: self.wav_header_window,
            pcm_block_bytes: self.pcm_block_bytes,
            volume_percent: self.volume_percent,
            default_format: self.default_format(),
            write_timeout: Duration::from_millis(self.sink_write_timeout_ms),
            timeouts: self.transport_timeouts(),
        }
    }

    pub fn mp3_settings(&self) -> Mp3Settings {
        Mp3Settings {
            min_tail_bytes: self.mp3_min_tail_bytes,
            max_underflow_errors: self.mp3_max_underflow_errors,
            max_decode_errors: self.mp3_max_decode_errors,
            volume_percent: self.volume_percent,
        }
    }

    pub fn sink_settings(&self) -> SinkSettings {
        SinkSettings {
            write_timeout: Duration::from_millis(self.sink_write_timeout_ms),
            flush_buffers: self.sink_flush_buffers,
            flush_buffer_bytes: self.sink_flush_buffer_bytes,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_config_parses() {
        let config = Config::new().unwrap();
        assert!(!config.field_name.is_empty());
        assert_eq!(config.base64_block_chars % 4, 0);
        assert!(config.wav_header_window >= 64);
        assert_eq!(config.stream_settings().field_name, config.field_name);
    }
}
