//! Byte sources feeding the chunked body reader.
//!
//! The reader pulls through `std::io::Read`. A source signals "nothing
//! available yet" with `ErrorKind::WouldBlock` (or `TimedOut`, which is what a
//! socket with a read timeout returns) and end of stream with `Ok(0)`.

use bytes::{Buf, Bytes};
use std::io::{self, Read};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Bridges the async network side to the playback thread.
///
/// The network task pushes body increments into the channel; the playback
/// thread drains them without blocking, so the chunked reader keeps control of
/// its own stall and deadline accounting.
pub struct ChannelSource {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            pending: Bytes::new(),
        }
    }

    /// Create a bounded channel and the source draining it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

impl Read for ChannelSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            match self.rx.try_recv() {
                Ok(bytes) => self.pending = bytes,
                Err(TryRecvError::Empty) => return Err(io::ErrorKind::WouldBlock.into()),
                // Sender dropped: the body is over as far as the transport knows
                Err(TryRecvError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}
