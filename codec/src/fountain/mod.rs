//! Rateless (fountain) stream layer.
//!
//! Each frame carries a handful of fountain chunks; any sufficiently large
//! subset of chunks from any mix of frames reconstructs the payload. The
//! rateless math itself is external (RaptorQ); this module owns the on-wire
//! chunk format and the stream adapters.

mod decode;
mod encode;
mod header;

use raptorq::ObjectTransmissionInformation;

/// Serialized rateless packets carry a 4-byte packet id before the symbol.
const PACKET_ID_SIZE: usize = 4;

/// Transfer parameters both ends derive from the header's `total_size` and
/// the profile's chunk size alone, so no side-channel negotiation exists.
/// The symbol size is rounded down to an 8-byte alignment; records are
/// padded up to the fixed chunk slot on the wire.
fn transmission_config(total_size: u32, chunk_write_size: usize) -> ObjectTransmissionInformation {
    let budget = chunk_write_size - header::HEADER_SIZE - PACKET_ID_SIZE;
    let symbol_size = (budget / 8 * 8) as u16;
    ObjectTransmissionInformation::with_defaults(u64::from(total_size), symbol_size)
}

pub use decode::FountainDecoder;
pub use encode::FountainEncoder;
pub use header::FountainHeader;
