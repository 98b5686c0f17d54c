use anyhow::{Context, anyhow, bail};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;

use tts_playback::audio::{AlsaSink, AudioSink, MemorySink};
use tts_playback::config::Config;
use tts_playback::transport::ChannelSource;
use tts_playback::{
    Speaker, StreamMode, StreamSettings, play_mp3_file, play_stream, play_wav_file,
};

const USAGE: &str = "usage: tts_playback [--dry-run] <wav|mp3|body|body-buffered> <file>";

// 模拟网络下发的不规则分片
const FEED_PATTERN: [usize; 6] = [1, 7, 64, 333, 1024, 4096];
const FEED_INTERVAL: Duration = Duration::from_millis(2);

enum Command {
    Wav(PathBuf),
    Mp3(PathBuf),
    /// 录制下来的 chunked HTTP 响应体
    Body { path: PathBuf, mode: StreamMode },
}

struct Args {
    command: Command,
    dry_run: bool,
}

fn parse_args(args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut dry_run = false;
    let mut positional = Vec::new();
    for arg in args {
        if arg == "--dry-run" {
            dry_run = true;
        } else {
            positional.push(arg);
        }
    }

    let [cmd, path] = positional.as_slice() else {
        bail!("{}", USAGE);
    };
    let path = PathBuf::from(path);
    let command = match cmd.as_str() {
        "wav" => Command::Wav(path),
        "mp3" => Command::Mp3(path),
        "body" => Command::Body {
            path,
            mode: StreamMode::Stream,
        },
        "body-buffered" => Command::Body {
            path,
            mode: StreamMode::Buffered,
        },
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    };
    Ok(Args { command, dry_run })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().map_err(|e| anyhow!(e))?;
    log::info!("{} v{}", config.app_name, config.app_version);

    let args = parse_args(std::env::args().skip(1))?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                log::info!("Received Ctrl+C, stopping playback...");
                running.store(false, Ordering::Relaxed);
            }
        });
    }

    // 网络侧（这里用文件回放代替）通过通道把数据交给播放线程
    let source = match &args.command {
        Command::Body { path, .. } => {
            let (tx, source) = ChannelSource::channel(64);
            let path = path.clone();
            tokio::spawn(async move {
                if let Err(e) = feed_body(&path, tx).await {
                    log::error!("Body feeder failed: {:#}", e);
                }
            });
            Some(source)
        }
        _ => None,
    };

    // 播放在独立线程里进行，不占用 tokio 的工作线程
    let thread_running = running.clone();
    let handle = thread::Builder::new()
        .name("audio-play".into())
        .spawn(move || play(&config, args.command, source, args.dry_run, &thread_running))?;

    match tokio::task::spawn_blocking(move || handle.join()).await? {
        Ok(Ok(report)) => println!("{}", report),
        Ok(Err(e)) => return Err(e),
        Err(_) => bail!("audio-play thread panicked"),
    }
    Ok(())
}

/// Replay a captured response body in irregular increments.
async fn feed_body(path: &Path, tx: mpsc::Sender<Bytes>) -> anyhow::Result<()> {
    let wire = Bytes::from(
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
    );
    log::info!("Feeding {} body bytes from {}", wire.len(), path.display());

    let mut offset = 0;
    for size in FEED_PATTERN.iter().cycle() {
        if offset >= wire.len() {
            break;
        }
        let end = (offset + size).min(wire.len());
        if tx.send(wire.slice(offset..end)).await.is_err() {
            log::debug!("Playback side hung up after {} bytes", offset);
            break;
        }
        offset = end;
        tokio::time::sleep(FEED_INTERVAL).await;
    }
    Ok(())
}

fn open_sink(config: &Config, dry_run: bool) -> anyhow::Result<Box<dyn AudioSink>> {
    if dry_run {
        log::info!("Dry run: PCM is recorded in memory");
        return Ok(Box::new(MemorySink::new()));
    }
    let sink = AlsaSink::open(
        config.playback_device,
        config.period_size,
        config.sink_settings(),
        config.default_format(),
    )?;
    Ok(Box::new(sink))
}

/// Runs on the "audio-play" thread. Returns the session report as JSON.
fn play(
    config: &Config,
    command: Command,
    source: Option<ChannelSource>,
    dry_run: bool,
    running: &AtomicBool,
) -> anyhow::Result<String> {
    let mut speaker = Speaker::new(open_sink(config, dry_run)?, config.cooldown());
    let mut sink = speaker.acquire();

    let report = match command {
        Command::Wav(path) => {
            let report = play_wav_file(&path, &mut *sink, &config.stream_settings(), running)?;
            serde_json::to_string_pretty(&report)?
        }
        Command::Mp3(path) => {
            let report = play_mp3_file(
                &path,
                &mut *sink,
                config.mp3_settings(),
                config.sink_settings().write_timeout,
                running,
            )?;
            serde_json::to_string_pretty(&report)?
        }
        Command::Body { mode, .. } => {
            let source = source.context("no body source for stream playback")?;
            let settings = StreamSettings {
                mode,
                ..config.stream_settings()
            };
            let report = play_stream(source, &mut *sink, &settings, running)?;
            serde_json::to_string_pretty(&report)?
        }
    };
    Ok(report)
}
