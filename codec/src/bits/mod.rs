//! Bit-granular stream packing and block interleaving.

mod interleave;
mod io;

pub use interleave::{InterleaveLookup, InterleavedWriter, interleave_indices, interleave_reverse};
pub use io::{BitPump, BitSink};
