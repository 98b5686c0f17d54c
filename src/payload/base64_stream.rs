//! Block-wise base64 decoding of a character stream that arrives in pieces.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::{PlaybackError, Result};

/// Decodes standard base64 in bounded blocks, carrying partial quads across calls.
///
/// Characters accumulate until a full block (a multiple of 4) is buffered,
/// which is then decoded in one go. At [`finish`] the whole quads still
/// buffered are decoded, then the last 2 or 3 characters are padded with `=`.
/// A single leftover character cannot encode a byte and is dropped.
///
/// A block that fails to decode is skipped and logged; the stream only aborts
/// once more than `max_failures` blocks in a row have failed.
///
/// [`finish`]: Base64StreamDecoder::finish
pub struct Base64StreamDecoder {
    pending: Vec<u8>,
    scratch: Vec<u8>,
    block_chars: usize,
    max_failures: u32,
    consecutive_failures: u32,
    blocks_skipped: u32,
    chars_in: u64,
    bytes_out: u64,
}

impl Base64StreamDecoder {
    pub fn new(block_chars: usize, max_failures: u32) -> Self {
        // Keep every block quad-aligned
        let block_chars = (block_chars / 4).max(1) * 4;
        Self {
            pending: Vec::with_capacity(block_chars),
            scratch: Vec::with_capacity(block_chars / 4 * 3),
            block_chars,
            max_failures,
            consecutive_failures: 0,
            blocks_skipped: 0,
            chars_in: 0,
            bytes_out: 0,
        }
    }

    /// Feed base64 characters, appending any decoded bytes to `out`.
    pub fn push(&mut self, mut chars: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.chars_in += chars.len() as u64;
        while !chars.is_empty() {
            let room = self.block_chars - self.pending.len();
            let take = room.min(chars.len());
            self.pending.extend_from_slice(&chars[..take]);
            chars = &chars[take..];
            if self.pending.len() == self.block_chars {
                self.decode_pending(out)?;
            }
        }
        Ok(())
    }

    /// Flush the carried remainder at end of stream.
    pub fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        self.decode_pending(out)?;
        match self.pending.len() {
            0 => Ok(()),
            1 => {
                log::warn!("Dropping a lone trailing base64 character");
                self.pending.clear();
                Ok(())
            }
            _ => {
                while self.pending.len() % 4 != 0 {
                    self.pending.push(b'=');
                }
                self.decode_pending(out)
            }
        }
    }

    /// Characters currently carried into the next block.
    pub fn carried(&self) -> usize {
        self.pending.len()
    }

    pub fn blocks_skipped(&self) -> u32 {
        self.blocks_skipped
    }

    pub fn chars_in(&self) -> u64 {
        self.chars_in
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    fn decode_pending(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let aligned = self.pending.len() / 4 * 4;
        if aligned == 0 {
            return Ok(());
        }
        self.scratch.clear();
        let result = STANDARD.decode_vec(&self.pending[..aligned], &mut self.scratch);
        self.pending.drain(..aligned);

        match result {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.bytes_out += self.scratch.len() as u64;
                out.extend_from_slice(&self.scratch);
                Ok(())
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.blocks_skipped += 1;
                log::warn!(
                    "Skipping undecodable base64 block of {} chars ({} in a row): {}",
                    aligned,
                    self.consecutive_failures,
                    e
                );
                if self.consecutive_failures > self.max_failures {
                    return Err(PlaybackError::Decode(format!(
                        "{} consecutive base64 blocks failed, last error: {}",
                        self.consecutive_failures, e
                    )));
                }
                Ok(())
            }
        }
    }
}
