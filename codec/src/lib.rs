//! color-icon-matrix barcode codec.
//!
//! Packs bytes into a grid of glyph-and-color tiles framed by finder
//! markers, and reads camera captures of such codes back into bytes. The
//! stream stack is compression, a rateless fountain layer, Reed-Solomon,
//! and interleaved bit packing; the image side is anchor scanning,
//! perspective deskew, and a flood-fill tile reader that tracks local
//! sampling drift.

pub mod bits;
pub mod config;
pub mod deskew;
pub mod ecc;
pub mod error;
pub mod fountain;
pub mod frame;
pub mod grade;
pub mod grid;
pub mod pipeline;
pub mod scan;
pub mod stream;
pub mod tile;

pub use config::Profile;
pub use error::{Error, Result};
pub use pipeline::{DecodeOptions, DecodeSummary, EncodeOptions, Preprocess, decode, encode};
