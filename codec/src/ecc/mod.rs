//! Reed-Solomon coding over GF(2^8).
//!
//! Parameters match the wire format: field polynomial `0x187`, first
//! consecutive root 1, generator element 2.

mod gf;
mod rs;
mod stream;

pub use rs::{ReedSolomon, UncorrectableBlock};
pub use stream::{FailurePolicy, RsDecoder, RsEncoder};
