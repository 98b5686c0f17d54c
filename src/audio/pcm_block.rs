//! Fixed-capacity staging buffer between the decoders and the sink.

use crate::error::Result;

/// Collects PCM bytes and hands them on one full block at a time.
///
/// Blocks are always an even number of bytes, so a sample split across two
/// input increments is reassembled before it reaches the volume stage.
pub struct PcmBlock {
    buf: Vec<u8>,
    capacity: usize,
}

impl PcmBlock {
    pub fn new(capacity: usize) -> Self {
        let capacity = (capacity & !1).max(2);
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `bytes`, calling `emit` with each block that fills up.
    pub fn push<F>(&mut self, mut bytes: &[u8], mut emit: F) -> Result<()>
    where
        F: FnMut(&mut [u8]) -> Result<()>,
    {
        while !bytes.is_empty() {
            let take = (self.capacity - self.buf.len()).min(bytes.len());
            self.buf.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.buf.len() == self.capacity {
                emit(self.buf.as_mut_slice())?;
                self.buf.clear();
            }
        }
        Ok(())
    }

    /// Emit whatever whole samples remain. A dangling odd byte is dropped.
    pub fn finish<F>(&mut self, mut emit: F) -> Result<()>
    where
        F: FnMut(&mut [u8]) -> Result<()>,
    {
        if self.buf.len() % 2 == 1 {
            log::debug!("Dropping dangling half sample at end of PCM stream");
            self.buf.pop();
        }
        if !self.buf.is_empty() {
            emit(self.buf.as_mut_slice())?;
            self.buf.clear();
        }
        Ok(())
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_full_blocks_then_remainder() {
        let mut block = PcmBlock::new(4);
        let mut seen: Vec<Vec<u8>> = Vec::new();
        for piece in [&[1u8, 2, 3][..], &[4, 5], &[6, 7, 8, 9]] {
            block
                .push(piece, |b| {
                    seen.push(b.to_vec());
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(block.buffered(), 1);
        block
            .finish(|b| {
                seen.push(b.to_vec());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
    }

    #[test]
    fn capacity_is_even() {
        let mut block = PcmBlock::new(5);
        let mut sizes = Vec::new();
        block
            .push(&[0; 9], |b| {
                sizes.push(b.len());
                Ok(())
            })
            .unwrap();
        assert_eq!(sizes, vec![4, 4]);
    }
}
