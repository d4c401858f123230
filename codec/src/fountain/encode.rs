use std::io::{self, Read};

use raptorq::{Encoder, EncodingPacket};

use super::header::{FountainHeader, HEADER_SIZE, MAX_TOTAL_SIZE};
use super::{PACKET_ID_SIZE, transmission_config};

/// Read-side fountain layer.
///
/// The whole source is slurped up front; every `chunk_write_size` bytes
/// served is one record: a 6-byte header followed by one encoded chunk.
/// Source chunks come first, then repair chunks indefinitely, so a reader
/// that stops after any `source_chunks() + margin` records has an almost
/// surely decodable set.
pub struct FountainEncoder {
    encoder: Encoder,
    packets: Vec<EncodingPacket>,
    repair_generated: u32,
    chunk_id: u16,
    total_size: u32,
    encode_id: u8,
    chunk_write_size: usize,
    record: Vec<u8>,
    pos: usize,
}

impl FountainEncoder {
    /// `chunk_write_size` is the on-wire record size, header included.
    pub fn new<R: Read>(mut source: R, chunk_write_size: usize, encode_id: u8) -> io::Result<Self> {
        debug_assert!(chunk_write_size > HEADER_SIZE + PACKET_ID_SIZE);
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        if data.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "nothing to encode",
            ));
        }
        if data.len() > MAX_TOTAL_SIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("payload of {} bytes exceeds the 32MB address space", data.len()),
            ));
        }

        let total_size = data.len() as u32;
        let config = transmission_config(total_size, chunk_write_size);
        let encoder = Encoder::new(&data, config);
        let packets = encoder.get_encoded_packets(0);

        Ok(Self {
            encoder,
            packets,
            repair_generated: 0,
            chunk_id: 0,
            total_size,
            encode_id,
            chunk_write_size,
            record: Vec::new(),
            pos: 0,
        })
    }

    /// How many chunks carry original (non-repair) data.
    #[must_use]
    pub fn source_chunks(&self) -> u32 {
        self.packets.len() as u32 - self.repair_generated
    }

    /// The transfer configuration a decoder needs, derivable on its side
    /// from `total_size` and the chunk size alone.
    #[must_use]
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    fn next_record(&mut self) {
        let idx = usize::from(self.chunk_id);
        while idx >= self.packets.len() {
            // extend with another batch of repair packets
            self.repair_generated += 32;
            self.packets = self.encoder.get_encoded_packets(self.repair_generated);
        }
        let header = FountainHeader::new(self.encode_id, self.total_size, self.chunk_id);

        self.record.clear();
        self.record.extend_from_slice(&header.to_bytes());
        self.record.extend_from_slice(&self.packets[idx].serialize());
        debug_assert!(self.record.len() <= self.chunk_write_size);
        self.record.resize(self.chunk_write_size, 0);

        self.chunk_id = self.chunk_id.wrapping_add(1);
        self.pos = 0;
    }
}

impl Read for FountainEncoder {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.record.len() {
            self.next_record();
        }
        let n = out.len().min(self.record.len() - self.pos);
        out[..n].copy_from_slice(&self.record[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_have_headers_and_fixed_size() {
        let data = vec![7u8; 2000];
        let mut enc = FountainEncoder::new(&data[..], 750, 3).unwrap();
        assert_eq!(enc.total_size(), 2000);
        assert_eq!(enc.source_chunks(), 3); // ceil(2000 / symbol_size)

        let mut first = vec![0u8; 750];
        enc.read_exact(&mut first).unwrap();
        let header = FountainHeader::from_bytes(first[..6].try_into().unwrap());
        assert_eq!(header, FountainHeader::new(3, 2000, 0));

        let mut second = vec![0u8; 750];
        enc.read_exact(&mut second).unwrap();
        let header = FountainHeader::from_bytes(second[..6].try_into().unwrap());
        assert_eq!(header.chunk_id, 1);
    }

    #[test]
    fn repair_chunks_continue_past_the_source() {
        let data = vec![1u8; 1000];
        let mut enc = FountainEncoder::new(&data[..], 500, 0).unwrap();
        let source = enc.source_chunks();

        let mut record = vec![0u8; 500];
        for expected in 0..source as u16 + 5 {
            enc.read_exact(&mut record).unwrap();
            let header = FountainHeader::from_bytes(record[..6].try_into().unwrap());
            assert_eq!(header.chunk_id, expected);
        }
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(FountainEncoder::new(&[][..], 750, 0).is_err());
    }
}
