//! ALSA playback sink.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, anyhow};
use std::thread;
use std::time::Duration;

use super::sink::{AudioSink, PcmFormat, SinkSettings, write_silence};
use crate::error::{PlaybackError, Result};

/// Per-write timeout while pushing flush silence.
const FLUSH_WRITE_TIMEOUT: Duration = Duration::from_millis(50);
/// Let the silence reach the DAC before the buffer is dropped.
const FLUSH_SETTLE: Duration = Duration::from_millis(30);
const RESTART_DELAY: Duration = Duration::from_millis(10);

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// Open a PCM device for S16LE interleaved playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> anyhow::Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, Direction::Playback, false)
        .with_context(|| format!("Failed to open PCM device '{}' for Playback", device))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)
            .with_context(|| format!("Device '{}' rejects {} channels", device, channels))?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    log::info!(
        "ALSA Playback: device={}, rate={}, channels={}, period_size={}",
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}

/// [`AudioSink`] backed by an ALSA PCM.
///
/// The device is reopened on every format change.
pub struct AlsaSink {
    device: String,
    period_size: Option<usize>,
    settings: SinkSettings,
    pcm: Option<PCM>,
    format: PcmFormat,
}

impl AlsaSink {
    /// Open `device` at `format`. A `period_size` of 0 lets ALSA decide.
    pub fn open(
        device: &str,
        period_size: usize,
        settings: SinkSettings,
        format: PcmFormat,
    ) -> Result<Self> {
        let mut sink = Self {
            device: device.to_string(),
            period_size: (period_size > 0).then_some(period_size),
            settings,
            pcm: None,
            format,
        };
        sink.reopen(format)?;
        Ok(sink)
    }

    fn reopen(&mut self, format: PcmFormat) -> Result<()> {
        // the old handle must be closed before the device can be opened again
        self.pcm = None;
        let (pcm, params) = open_playback(
            &self.device,
            format.sample_rate,
            u32::from(format.channels),
            self.period_size,
        )?;
        if params.sample_rate != format.sample_rate {
            log::warn!(
                "ALSA negotiated {} Hz instead of {} Hz, playback pitch will be off",
                params.sample_rate,
                format.sample_rate
            );
        }
        self.pcm = Some(pcm);
        self.format = format;
        Ok(())
    }

    fn pcm(&self) -> Result<&PCM> {
        self.pcm
            .as_ref()
            .ok_or_else(|| PlaybackError::Device(anyhow!("playback device '{}' is not open", self.device)))
    }
}

impl AudioSink for AlsaSink {
    fn reconfigure(&mut self, format: PcmFormat) -> Result<()> {
        format.ensure_supported()?;
        if self.pcm.is_some() && self.format == format {
            return Ok(());
        }
        self.reopen(format)
    }

    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize> {
        let frame_bytes = self.format.frame_bytes();
        let whole = bytes.len() / frame_bytes * frame_bytes;
        if whole == 0 {
            log::debug!("Dropping {} bytes short of a frame", bytes.len());
            return Ok(bytes.len());
        }

        let pcm = self.pcm()?;
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        match pcm.wait(Some(timeout_ms)) {
            Ok(true) => {}
            Ok(false) => return Ok(0),
            Err(e) => {
                log::warn!("ALSA wait failed: {}, recovering...", e);
                pcm.prepare()
                    .map_err(|e2| anyhow!("Failed to recover PCM playback: {}", e2))?;
                return Ok(0);
            }
        }

        let io = pcm.io_bytes();
        match io.writei(&bytes[..whole]) {
            Ok(frames) => Ok(frames * frame_bytes),
            Err(e) => {
                log::warn!("ALSA XRUN or error: {}, recovering...", e);
                // 触发 ALSA 硬件恢复状态机
                pcm.prepare()
                    .map_err(|e2| anyhow!("Failed to recover PCM playback: {}", e2))?;
                Ok(0)
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        let SinkSettings {
            flush_buffers,
            flush_buffer_bytes,
            ..
        } = self.settings;
        write_silence(self, flush_buffers, flush_buffer_bytes, FLUSH_WRITE_TIMEOUT)?;
        thread::sleep(FLUSH_SETTLE);

        let pcm = self.pcm()?;
        pcm.drop().context("Failed to stop PCM playback")?;
        thread::sleep(RESTART_DELAY);
        pcm.prepare().context("Failed to restart PCM playback")?;
        log::debug!("ALSA playback flushed");
        Ok(())
    }
}
