use std::io::{self, Read, Write};

use bitstream_io::{BigEndian, BitWrite, BitWriter};

/// Reads fixed-width unsigned integers off a byte stream, big-endian.
///
/// Once the underlying stream is exhausted the tail is padded with zero
/// bits: a partial final op comes back left-aligned, and every read after
/// that yields 0. Callers that need to stop at the real end of data check
/// [`BitPump::exhausted`].
pub struct BitPump<R: Read> {
    inner: R,
    acc: u64,
    acc_bits: u32,
    bits_per_op: u32,
    hit_eof: bool,
}

impl<R: Read> BitPump<R> {
    pub fn new(inner: R, bits_per_op: u32) -> Self {
        debug_assert!(bits_per_op >= 1 && bits_per_op <= 16);
        Self {
            inner,
            acc: 0,
            acc_bits: 0,
            bits_per_op,
            hit_eof: false,
        }
    }

    /// Read one op at the configured width.
    pub fn read(&mut self) -> io::Result<u16> {
        let width = self.bits_per_op;
        self.read_width(width)
    }

    /// Read one op at an override width (split-mode decode reads symbol and
    /// color planes at their own widths).
    pub fn read_width(&mut self, bits: u32) -> io::Result<u16> {
        while self.acc_bits < bits && !self.hit_eof {
            let mut byte = [0u8; 1];
            let n = self.inner.read(&mut byte)?;
            if n == 0 {
                self.hit_eof = true;
                break;
            }
            self.acc = (self.acc << 8) | u64::from(byte[0]);
            self.acc_bits += 8;
        }

        if self.acc_bits >= bits {
            let shift = self.acc_bits - bits;
            let value = (self.acc >> shift) as u16 & ((1u32 << bits) - 1) as u16;
            self.acc &= (1u64 << shift) - 1;
            self.acc_bits = shift;
            return Ok(value);
        }

        // zero-padded tail
        let value = (self.acc << (bits - self.acc_bits)) as u16;
        self.acc = 0;
        self.acc_bits = 0;
        Ok(value)
    }

    /// Discard bits up to the next byte boundary of the source stream.
    pub fn align(&mut self) {
        let partial = self.acc_bits % 8;
        if partial != 0 {
            let shift = self.acc_bits - partial;
            self.acc &= (1u64 << shift).wrapping_sub(1);
            self.acc_bits = shift;
        }
    }

    /// True once every real bit has been handed out. Probes the underlying
    /// stream when the buffer is empty, so a payload ending exactly on an op
    /// boundary reads as exhausted without a dummy op.
    pub fn exhausted(&mut self) -> bool {
        if !self.hit_eof && self.acc_bits == 0 {
            let mut byte = [0u8; 1];
            match self.inner.read(&mut byte) {
                Ok(0) => self.hit_eof = true,
                Ok(_) => {
                    self.acc = (self.acc << 8) | u64::from(byte[0]);
                    self.acc_bits = 8;
                }
                Err(_) => {} // surfaced by the next read
            }
        }
        self.hit_eof && self.acc_bits == 0
    }
}

/// Writes fixed-width unsigned integers onto a byte stream, big-endian.
/// Closing pads the tail with zeros to a byte boundary and flushes.
pub struct BitSink<W: Write> {
    inner: BitWriter<W, BigEndian>,
    bits_per_op: u32,
}

impl<W: Write> BitSink<W> {
    pub fn new(inner: W, bits_per_op: u32) -> Self {
        debug_assert!(bits_per_op >= 1 && bits_per_op <= 16);
        Self {
            inner: BitWriter::endian(inner, BigEndian),
            bits_per_op,
        }
    }

    pub fn write(&mut self, value: u16) -> io::Result<()> {
        let width = self.bits_per_op;
        self.write_width(value, width)
    }

    pub fn write_width(&mut self, value: u16, bits: u32) -> io::Result<()> {
        self.inner.write(bits, value)
    }

    /// Pad to a byte boundary and hand the underlying writer back.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.byte_align()?;
        Ok(self.inner.into_writer())
    }
}
