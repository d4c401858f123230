use std::io::{self, Write};

use super::io::BitSink;

/// The interleaved emission order for `len` elements.
///
/// The list is split into `partitions` equal runs; within each run, element
/// indices are emitted with stride `num_chunks`, one stride-class at a time.
/// Consecutive stream symbols therefore land `num_chunks` cells apart on the
/// image, spreading spatial bursts across error-correction blocks.
#[must_use]
pub fn interleave_indices(len: usize, num_chunks: usize, partitions: usize) -> Vec<usize> {
    let part_len = len / partitions;
    let mut out = Vec::with_capacity(len);
    for p in 0..partitions {
        let base = part_len * p;
        for split in 0..num_chunks {
            let mut i = split;
            while i < part_len {
                out.push(base + i);
                i += num_chunks;
            }
        }
    }
    out
}

/// Inverse of [`interleave_indices`]: original index to interleaved index,
/// plus the (approximate) per-block element count.
pub struct InterleaveLookup {
    pub lookup: Vec<usize>,
    pub block_size: usize,
}

#[must_use]
pub fn interleave_reverse(len: usize, num_chunks: usize, partitions: usize) -> InterleaveLookup {
    let mut lookup = vec![0usize; len];
    for (interleaved, original) in interleave_indices(len, num_chunks, partitions)
        .into_iter()
        .enumerate()
    {
        lookup[original] = interleaved;
    }
    InterleaveLookup {
        lookup,
        block_size: len / num_chunks / partitions,
    }
}

/// A per-block buffered bit writer.
///
/// Tiles are decoded in flood order, so ops arrive for arbitrary cells; each
/// op is parked in its block buffer at its canonical slot. Closing flushes
/// block buffers in ascending block order, reassembling the original
/// sequential stream so each downstream ECC block sees its own bytes
/// contiguously. Slots never written flush as zero.
pub struct InterleavedWriter<W: Write> {
    sink: BitSink<W>,
    blocks: Vec<Vec<(usize, u16)>>,
    block_size: usize,
    lookup: Vec<usize>,
}

impl<W: Write> InterleavedWriter<W> {
    pub fn new(sink: W, lookup: InterleaveLookup, bits_per_op: u32) -> Self {
        let num_blocks = lookup.lookup.len().div_ceil(lookup.block_size.max(1));
        Self {
            sink: BitSink::new(sink, bits_per_op),
            blocks: vec![Vec::new(); num_blocks],
            block_size: lookup.block_size.max(1),
            lookup: lookup.lookup,
        }
    }

    /// Park the op decoded for the cell at `index` (original emission index).
    pub fn write(&mut self, bits: u16, index: usize) {
        let interleaved = self.lookup[index];
        let block = interleaved / self.block_size;
        self.blocks[block].push((interleaved, bits));
    }

    /// Flush blocks in ascending order and hand back the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        let total = self.lookup.len();
        for (b, mut block) in self.blocks.into_iter().enumerate() {
            block.sort_unstable_by_key(|&(slot, _)| slot);
            let start = b * self.block_size;
            let end = ((b + 1) * self.block_size).min(total);
            let mut entries = block.into_iter().peekable();
            for slot in start..end {
                let value = match entries.peek() {
                    Some(&(s, v)) if s == slot => {
                        entries.next();
                        v
                    }
                    _ => 0,
                };
                self.sink.write(value)?;
            }
        }
        self.sink.finish()
    }
}
