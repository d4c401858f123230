use std::io::{self, Read, Write};

use tracing::warn;

use super::rs::ReedSolomon;
use crate::stream::FinishWrite;

/// Read-side encoder: pulls up to `block_size - ecc` bytes per block from
/// the source and serves them with parity appended. The final block may be
/// short; it still carries full parity over the short data.
pub struct RsEncoder<R: Read> {
    inner: R,
    rs: ReedSolomon,
    data_size: usize,
    buf: Vec<u8>,
    pos: usize,
    source_done: bool,
}

impl<R: Read> RsEncoder<R> {
    #[must_use]
    pub fn new(inner: R, ecc: usize, block_size: usize) -> Self {
        debug_assert!(ecc < block_size);
        Self {
            inner,
            rs: ReedSolomon::new(ecc),
            data_size: block_size - ecc,
            buf: Vec::new(),
            pos: 0,
            source_done: false,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        let mut msg = vec![0u8; self.data_size];
        let mut filled = 0;
        while filled < self.data_size {
            let n = self.inner.read(&mut msg[filled..])?;
            if n == 0 {
                self.source_done = true;
                break;
            }
            filled += n;
        }
        msg.truncate(filled);
        self.buf = if msg.is_empty() {
            Vec::new()
        } else {
            self.rs.encode(&msg)
        };
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for RsEncoder<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.buf.len() {
            if self.source_done {
                return Ok(0);
            }
            self.refill()?;
            if self.buf.is_empty() {
                return Ok(0);
            }
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// What a decoder emits in place of a block it could not correct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    /// A zero payload, keeping downstream alignment (standalone decode).
    Zeros,
    /// Nothing; the fountain layer recovers from other chunks.
    Skip,
}

/// Write-side decoder: consumes exact `block_size` byte blocks, corrects
/// them, and forwards the message bytes. Failures are local and never stop
/// the stream.
pub struct RsDecoder<W: Write> {
    inner: W,
    rs: ReedSolomon,
    block_size: usize,
    buf: Vec<u8>,
    on_failure: FailurePolicy,
    blocks_seen: u64,
    blocks_failed: u64,
}

impl<W: Write> RsDecoder<W> {
    #[must_use]
    pub fn new(inner: W, ecc: usize, block_size: usize, on_failure: FailurePolicy) -> Self {
        debug_assert!(ecc < block_size);
        Self {
            inner,
            rs: ReedSolomon::new(ecc),
            block_size,
            buf: Vec::new(),
            on_failure,
            blocks_seen: 0,
            blocks_failed: 0,
        }
    }

    fn emit_block(&mut self, mut block: Vec<u8>) -> io::Result<()> {
        self.blocks_seen += 1;
        if self.rs.ecc() == 0 {
            return self.inner.write_all(&block);
        }
        let payload_len = block.len() - self.rs.ecc();
        match self.rs.correct_in_place(&mut block) {
            Ok(()) => self.inner.write_all(&block[..payload_len]),
            Err(_) => {
                self.blocks_failed += 1;
                warn!(block = self.blocks_seen, "uncorrectable block");
                match self.on_failure {
                    FailurePolicy::Zeros => self.inner.write_all(&vec![0u8; payload_len]),
                    FailurePolicy::Skip => Ok(()),
                }
            }
        }
    }

    fn drain(&mut self) -> io::Result<()> {
        while self.buf.len() >= self.block_size {
            let rest = self.buf.split_off(self.block_size);
            let block = std::mem::replace(&mut self.buf, rest);
            self.emit_block(block)?;
        }
        Ok(())
    }

    /// Decode a trailing short block, if any bytes are waiting.
    fn drain_tail(&mut self) -> io::Result<()> {
        self.drain()?;
        if self.buf.is_empty() {
            return Ok(());
        }
        let tail = std::mem::take(&mut self.buf);
        if tail.len() > self.rs.ecc() {
            self.emit_block(tail)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn blocks_failed(&self) -> u64 {
        self.blocks_failed
    }
}

impl<W: Write> Write for RsDecoder<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        self.drain()?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: FinishWrite> FinishWrite for RsDecoder<W> {
    fn finish(&mut self) -> io::Result<()> {
        self.drain_tail()?;
        self.inner.finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::stream::FinishWrite;

    #[test]
    fn read_side_appends_parity_per_block() {
        let payload: Vec<u8> = (0..=255u8).chain(0..=43u8).collect(); // 300 bytes
        let mut enc = RsEncoder::new(&payload[..], 5, 20); // k = 15
        let mut wire = Vec::new();
        enc.read_to_end(&mut wire).unwrap();
        assert_eq!(wire.len(), 20 * 20);
        assert_eq!(&wire[..15], &payload[..15]);
        assert_eq!(&wire[20..35], &payload[15..30]);
    }

    #[test]
    fn wire_round_trip() {
        let payload: Vec<u8> = (0..200u8).collect();
        let mut enc = RsEncoder::new(&payload[..], 10, 50);
        let mut wire = Vec::new();
        enc.read_to_end(&mut wire).unwrap();

        // corrupt a few bytes in each block
        for block in 0..wire.len() / 50 {
            wire[block * 50 + 7] ^= 0xFF;
            wire[block * 50 + 31] ^= 0x42;
        }

        let mut dec = RsDecoder::new(Vec::new(), 10, 50, FailurePolicy::Zeros);
        dec.write_all(&wire).unwrap();
        dec.finish().unwrap();
        assert_eq!(dec.inner, payload);
    }

    #[test]
    fn short_final_block() {
        let payload: Vec<u8> = (0..52u8).collect(); // 40 + 12
        let mut enc = RsEncoder::new(&payload[..], 10, 50);
        let mut wire = Vec::new();
        enc.read_to_end(&mut wire).unwrap();
        assert_eq!(wire.len(), 50 + 22);

        let mut dec = RsDecoder::new(Vec::new(), 10, 50, FailurePolicy::Zeros);
        dec.write_all(&wire).unwrap();
        dec.finish().unwrap();
        assert_eq!(dec.inner, payload);
    }

    #[test]
    fn failed_block_becomes_zeros() {
        let payload: Vec<u8> = (0..80u8).collect();
        let mut enc = RsEncoder::new(&payload[..], 10, 50);
        let mut wire = Vec::new();
        enc.read_to_end(&mut wire).unwrap();

        // trash the first block beyond repair
        for b in wire[..50].iter_mut() {
            *b = b.wrapping_mul(7).wrapping_add(3);
        }

        let mut dec = RsDecoder::new(Vec::new(), 10, 50, FailurePolicy::Zeros);
        dec.write_all(&wire).unwrap();
        dec.finish().unwrap();
        assert_eq!(dec.blocks_failed(), 1);
        assert_eq!(&dec.inner[..40], &[0u8; 40]);
        assert_eq!(&dec.inner[40..], &payload[40..]);
    }

    #[test]
    fn skip_policy_drops_failed_blocks() {
        let payload: Vec<u8> = (100..180u8).collect();
        let mut enc = RsEncoder::new(&payload[..], 10, 50);
        let mut wire = Vec::new();
        enc.read_to_end(&mut wire).unwrap();

        for b in wire[..50].iter_mut() {
            *b = b.wrapping_mul(11).wrapping_add(5);
        }

        let mut dec = RsDecoder::new(Vec::new(), 10, 50, FailurePolicy::Skip);
        dec.write_all(&wire).unwrap();
        dec.finish().unwrap();
        assert_eq!(dec.inner, &payload[40..]);
    }
}
