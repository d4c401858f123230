//! Write-side layering support.
//!
//! The decode pipeline is a stack of `Write` adapters (interleaved bits →
//! Reed-Solomon → fountain → decompression → sink). Several of those buffer
//! internally and need an explicit end-of-stream signal, which plain
//! [`Write::flush`] does not convey.

use std::io::{self, Write};

/// A writer with an end-of-stream step: process any buffered tail and tell
/// the layer below to do the same. Call once, after the last byte.
pub trait FinishWrite: Write {
    fn finish(&mut self) -> io::Result<()>;
}

impl<T: FinishWrite + ?Sized> FinishWrite for Box<T> {
    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}

impl FinishWrite for Vec<u8> {
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FinishWrite for std::fs::File {
    fn finish(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// Adapts any `Write` into the bottom of a finishable stack.
pub struct FlushOnly<W: Write>(pub W);

impl<W: Write> Write for FlushOnly<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write> FinishWrite for FlushOnly<W> {
    fn finish(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}
