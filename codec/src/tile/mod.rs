//! Tile translation: bits to glyph-and-color tile images and back.

mod correct;
mod glyphs;
mod hash;
mod palette;
mod translator;

pub use correct::{ColorCorrector, ColorMatrix, fit_least_squares};
pub use glyphs::glyph_bank;
pub use hash::{average_hash, hamming};
pub use palette::palette;
pub use translator::{SymbolDecode, TileDecoder, TileEncoder};
