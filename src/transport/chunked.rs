//! HTTP chunked transfer-encoding decoder over a live byte source.
//!
//! Framing handled here:
//!
//! ```text
//! <hex-size>[;ext]\r\n
//! <size bytes of body>\r\n
//! ...
//! 0\r\n
//! ```
//!
//! The size line tolerates a bare `\n`, drops any `;` extension and stops
//! parsing at the first non-hex character. Blank lines before a size line are
//! skipped. After each chunk's data exactly two trailer bytes are discarded.

use bytes::{Buf, BytesMut};
use std::io::{self, Read};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{PlaybackError, Result};

/// Size lines longer than this are truncated; the remainder is consumed and ignored.
const MAX_SIZE_LINE: usize = 16;

/// Bytes requested from the source per read.
const READ_CHUNK: usize = 1024;

/// Wall-clock bounds for waiting on the transport.
#[derive(Debug, Clone, Copy)]
pub struct TransportTimeouts {
    /// Abort if no framing or body byte advances for this long.
    pub stall: Duration,
    /// Abort if the whole body has not arrived within this long.
    pub total: Duration,
    /// Sleep between polls while the source has nothing available.
    pub poll_interval: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            stall: Duration::from_secs(30),
            total: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    SizeLine,
    Data { remaining: u64 },
    Trailer { remaining: u8 },
    Done,
}

/// Yields the decoded body bytes of a chunked HTTP response.
pub struct ChunkedBodyReader<R> {
    source: R,
    framing: Framing,
    line: Vec<u8>,
    input: BytesMut,
    timeouts: TransportTimeouts,
    started: Instant,
    last_progress: Instant,
    body_bytes: u64,
    chunks: u32,
}

impl<R: Read> ChunkedBodyReader<R> {
    pub fn new(source: R, timeouts: TransportTimeouts) -> Self {
        let now = Instant::now();
        Self {
            source,
            framing: Framing::SizeLine,
            line: Vec::with_capacity(MAX_SIZE_LINE),
            input: BytesMut::with_capacity(READ_CHUNK),
            timeouts,
            started: now,
            last_progress: now,
            body_bytes: 0,
            chunks: 0,
        }
    }

    /// True once the zero-length terminating chunk has been read.
    pub fn is_done(&self) -> bool {
        self.framing == Framing::Done
    }

    /// Body bytes produced so far.
    pub fn body_bytes(&self) -> u64 {
        self.body_bytes
    }

    /// Non-empty chunks seen so far.
    pub fn chunks(&self) -> u32 {
        self.chunks
    }

    /// Read decoded body bytes into `out`.
    ///
    /// Returns `Ok(0)` only when the body is complete (or `out` is empty).
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.framing == Framing::Done {
                return Ok(0);
            }
            if self.input.is_empty() {
                self.fill()?;
                continue;
            }
            match self.framing {
                Framing::SizeLine => self.advance_size_line(),
                Framing::Data { remaining } => {
                    let n = (remaining.min(self.input.len() as u64) as usize).min(out.len());
                    out[..n].copy_from_slice(&self.input[..n]);
                    self.input.advance(n);
                    let remaining = remaining - n as u64;
                    self.framing = if remaining == 0 {
                        Framing::Trailer { remaining: 2 }
                    } else {
                        Framing::Data { remaining }
                    };
                    self.body_bytes += n as u64;
                    self.mark_progress();
                    return Ok(n);
                }
                Framing::Trailer { remaining } => {
                    let n = (remaining as usize).min(self.input.len());
                    self.input.advance(n);
                    let remaining = remaining - n as u8;
                    self.framing = if remaining == 0 {
                        Framing::SizeLine
                    } else {
                        Framing::Trailer { remaining }
                    };
                    self.mark_progress();
                }
                Framing::Done => unreachable!("handled above"),
            }
        }
    }

    /// Collect the whole body, failing if it grows past `max_bytes`.
    pub fn read_to_end(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                return Ok(body);
            }
            if body.len() + n > max_bytes {
                return Err(PlaybackError::Transport(format!(
                    "response body exceeds {} bytes",
                    max_bytes
                )));
            }
            body.extend_from_slice(&buf[..n]);
        }
    }

    fn advance_size_line(&mut self) {
        let mut consumed = 0;
        let mut complete = false;
        for &b in self.input.iter() {
            consumed += 1;
            if b == b'\n' {
                complete = true;
                break;
            }
            if b != b'\r' && self.line.len() < MAX_SIZE_LINE {
                self.line.push(b);
            }
        }
        self.input.advance(consumed);
        self.mark_progress();
        if !complete {
            return;
        }

        let size = parse_chunk_size(&self.line);
        self.line.clear();
        match size {
            // Blank line, keep looking for the size
            None => {}
            Some(0) => {
                log::debug!(
                    "Chunked body complete: {} chunks, {} bytes",
                    self.chunks,
                    self.body_bytes
                );
                self.framing = Framing::Done;
            }
            Some(size) => {
                self.chunks += 1;
                self.framing = Framing::Data { remaining: size };
            }
        }
    }

    fn fill(&mut self) -> Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if self.started.elapsed() > self.timeouts.total {
                log::warn!(
                    "Chunked body exceeded total deadline of {:?} after {} bytes",
                    self.timeouts.total,
                    self.body_bytes
                );
                return Err(PlaybackError::TransportTimeout);
            }
            match self.source.read(&mut buf) {
                Ok(0) => {
                    return Err(PlaybackError::Transport(
                        "connection closed before terminating chunk".to_string(),
                    ));
                }
                Ok(n) => {
                    self.input.extend_from_slice(&buf[..n]);
                    return Ok(());
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    if self.last_progress.elapsed() > self.timeouts.stall {
                        log::warn!(
                            "No transport progress for {:?} ({} body bytes so far)",
                            self.timeouts.stall,
                            self.body_bytes
                        );
                        return Err(PlaybackError::TransportTimeout);
                    }
                    thread::sleep(self.timeouts.poll_interval);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(PlaybackError::Transport(e.to_string())),
            }
        }
    }

    fn mark_progress(&mut self) {
        self.last_progress = Instant::now();
    }
}

/// Parse a chunk-size line (without its line terminator).
///
/// Returns `None` for a blank line. Parsing stops at the first character that
/// is not a hex digit, so `"1a;name=x"` and `"1a zz"` both yield 26.
pub fn parse_chunk_size(line: &[u8]) -> Option<u64> {
    let line = match line.iter().position(|&b| b == b';') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    let mut size: u64 = 0;
    for &c in line {
        let nibble = match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            b'A'..=b'F' => c - b'A' + 10,
            _ => break,
        };
        size = size.wrapping_shl(4) | u64::from(nibble);
    }
    Some(size)
}
