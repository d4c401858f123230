use std::io::{self, Write};

use raptorq::{Decoder, EncodingPacket};
use tracing::{debug, warn};

use super::header::{FountainHeader, HEADER_SIZE};
use super::{PACKET_ID_SIZE, transmission_config};
use crate::stream::FinishWrite;

/// Write-side fountain layer.
///
/// Buffers incoming bytes into fixed-size records, peels the 6-byte header
/// off each, and feeds chunks to the rateless decoder. The first
/// non-degenerate header pins `total_size` and initializes the decoder;
/// once the payload is recovered it is flushed downstream exactly once and
/// further writes are no-ops.
pub struct FountainDecoder<W: Write> {
    inner: W,
    write_size: usize,
    buf: Vec<u8>,
    decoder: Option<Decoder>,
    total_size: u32,
    done: bool,
    chunks_seen: u64,
}

impl<W: Write> FountainDecoder<W> {
    /// `chunk_write_size` is the on-wire record size, header included.
    #[must_use]
    pub fn new(inner: W, chunk_write_size: usize) -> Self {
        Self {
            inner,
            write_size: chunk_write_size,
            buf: Vec::new(),
            decoder: None,
            total_size: 0,
            done: false,
            chunks_seen: 0,
        }
    }

    #[must_use]
    pub fn done(&self) -> bool {
        self.done
    }

    fn absorb_record(&mut self, record: &[u8]) -> io::Result<()> {
        let header = FountainHeader::from_bytes(record[..HEADER_SIZE].try_into().unwrap());
        if header.is_degenerate() || header.total_size == 0 {
            debug!("skipping degenerate fountain header");
            return Ok(());
        }
        self.chunks_seen += 1;

        let config = transmission_config(header.total_size, self.write_size);
        let symbol_size = config.symbol_size() as usize;
        let decoder = self
            .decoder
            .get_or_insert_with(|| Decoder::new(config));
        if self.total_size == 0 {
            self.total_size = header.total_size;
        } else if self.total_size != header.total_size {
            debug!(
                expected = self.total_size,
                got = header.total_size,
                chunk = header.chunk_id,
                "chunk from a different payload, skipping"
            );
            return Ok(());
        }

        // records are padded to the chunk slot; the live part is the packet
        // id plus one symbol
        let packet_len = (PACKET_ID_SIZE + symbol_size).min(record.len() - HEADER_SIZE);
        let packet = EncodingPacket::deserialize(&record[HEADER_SIZE..HEADER_SIZE + packet_len]);
        if let Some(payload) = decoder.decode(packet) {
            self.inner.write_all(&payload)?;
            self.done = true;
            debug!(chunks = self.chunks_seen, "fountain decode complete");
        }
        Ok(())
    }
}

impl<W: Write> Write for FountainDecoder<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.done {
            return Ok(data.len());
        }
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.write_size && !self.done {
            let rest = self.buf.split_off(self.write_size);
            let record = std::mem::replace(&mut self.buf, rest);
            self.absorb_record(&record)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: FinishWrite> FinishWrite for FountainDecoder<W> {
    fn finish(&mut self) -> io::Result<()> {
        if !self.done {
            warn!(
                chunks = self.chunks_seen,
                "input exhausted before the fountain decode completed"
            );
        }
        self.inner.finish()
    }
}
