//! Tile-geometry profiles.
//!
//! A [`Profile`] is a named, immutable parameter set describing one code
//! layout: canvas size, cell geometry, symbol/color bit widths, Reed-Solomon
//! level, interleave shape, and fountain chunking. A profile is chosen once
//! per invocation; encode and decode must agree on it.

use crate::error::{Error, Result};

/// Header length prepended to every fountain chunk, in bytes.
pub const FOUNTAIN_HEADER_SIZE: u32 = 6;

/// Nominal side of the corner finder markers, in pixels.
const MARKER_PX: u32 = 54;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Profile {
    /// Pixel dimensions of the canonical (deskewed) frame.
    pub total_size: u32,
    pub bits_per_symbol: u32,
    pub bits_per_color: u32,
    /// Pixels per tile side.
    pub cell_size: u32,
    /// Center-to-center stride between tiles.
    pub cell_spacing_x: u32,
    pub cell_spacing_y: u32,
    /// Grid dimensions in tiles.
    pub cell_dim_x: u32,
    pub cell_dim_y: u32,
    /// Pixel offset of the first tile.
    pub cells_offset: u32,
    /// Redundancy bytes per Reed-Solomon block.
    pub ecc: u32,
    /// Reed-Solomon block size (n).
    pub ecc_block_size: u32,
    pub interleave_blocks: u32,
    pub interleave_partitions: u32,
    /// Fountain chunks per frame. Zero means "no fountain layer".
    pub fountain_blocks: u32,
}

impl Profile {
    /// The default profile: 1024px canvas, 8px tiles on a 9px stride,
    /// 112x112 grid, 16 glyphs x 4 colors.
    #[must_use]
    pub const fn sq_8x8() -> Self {
        Self {
            total_size: 1024,
            bits_per_symbol: 4,
            bits_per_color: 2,
            cell_size: 8,
            cell_spacing_x: 9,
            cell_spacing_y: 9,
            cell_dim_x: 112,
            cell_dim_y: 112,
            cells_offset: 8,
            ecc: 30,
            ecc_block_size: 155,
            interleave_blocks: 155,
            interleave_partitions: 2,
            fountain_blocks: 10,
        }
    }

    /// Denser variant: 5px tiles, 4 glyphs x 4 colors.
    #[must_use]
    pub const fn sq_5x5() -> Self {
        Self {
            total_size: 988,
            bits_per_symbol: 2,
            bits_per_color: 2,
            cell_size: 5,
            cell_spacing_x: 6,
            cell_spacing_y: 6,
            cell_dim_x: 162,
            cell_dim_y: 162,
            cells_offset: 9,
            ecc: 40,
            ecc_block_size: 216,
            interleave_blocks: 216,
            interleave_partitions: 2,
            fountain_blocks: 10,
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "8x8" | "sq8x8" => Ok(Self::sq_8x8()),
            "5x5" | "sq5x5" => Ok(Self::sq_5x5()),
            other => Err(Error::Config(format!("unknown profile preset {other:?}"))),
        }
    }

    #[must_use]
    pub const fn with_ecc(mut self, ecc: u32) -> Self {
        self.ecc = ecc;
        self
    }

    #[must_use]
    pub const fn with_color_bits(mut self, bits: u32) -> Self {
        self.bits_per_color = bits;
        self
    }

    #[must_use]
    pub const fn with_fountain_blocks(mut self, blocks: u32) -> Self {
        self.fountain_blocks = blocks;
        self
    }

    /// Marker width in tiles (the corner regions carved out of the grid).
    #[must_use]
    pub const fn marker_size_x(&self) -> u32 {
        (MARKER_PX + self.cell_spacing_x / 2) / self.cell_spacing_x
    }

    /// Marker height in tiles.
    #[must_use]
    pub const fn marker_size_y(&self) -> u32 {
        (MARKER_PX + self.cell_spacing_y / 2) / self.cell_spacing_y
    }

    /// Side of the painted corner markers, in pixels.
    #[must_use]
    pub const fn marker_px(&self) -> u32 {
        MARKER_PX
    }

    /// Canonical inset of an anchor center from the frame border.
    #[must_use]
    pub const fn anchor_inset(&self) -> u32 {
        MARKER_PX / 2
    }

    /// Bits carried by one tile.
    #[must_use]
    pub const fn bits_per_op(&self) -> u32 {
        self.bits_per_symbol + self.bits_per_color
    }

    /// Number of data tiles in a frame.
    #[must_use]
    pub const fn num_cells(&self) -> u32 {
        self.cell_dim_x * self.cell_dim_y - 4 * self.marker_size_x() * self.marker_size_y()
    }

    /// Raw (pre-ECC) byte capacity of one frame.
    #[must_use]
    pub const fn frame_bytes(&self) -> u32 {
        self.num_cells() * self.bits_per_op() / 8
    }

    /// Post-ECC payload bytes recovered from one frame.
    #[must_use]
    pub const fn rs_payload_bytes(&self) -> u32 {
        if self.ecc == 0 {
            return self.frame_bytes();
        }
        let whole = self.frame_bytes() / self.ecc_block_size;
        let tail = self.frame_bytes() % self.ecc_block_size;
        let tail_payload = if tail > self.ecc { tail - self.ecc } else { 0 };
        whole * (self.ecc_block_size - self.ecc) + tail_payload
    }

    /// Size of one fountain chunk on the wire, header included.
    #[must_use]
    pub const fn fountain_chunk_write_size(&self) -> u32 {
        self.rs_payload_bytes() / self.fountain_blocks
    }

    /// Payload bytes per fountain chunk.
    #[must_use]
    pub const fn fountain_chunk_size(&self) -> u32 {
        self.fountain_chunk_write_size() - FOUNTAIN_HEADER_SIZE
    }

    /// Check the cross-field invariants. Call once after applying overrides.
    pub fn validate(&self) -> Result<()> {
        if self.ecc >= self.ecc_block_size {
            return Err(Error::Config(format!(
                "ecc {} must be below the block size {}",
                self.ecc, self.ecc_block_size
            )));
        }
        if self.bits_per_symbol != 2 && self.bits_per_symbol != 4 {
            return Err(Error::Config(format!(
                "bits_per_symbol must be 2 or 4, got {}",
                self.bits_per_symbol
            )));
        }
        if self.bits_per_color > 3 {
            return Err(Error::Config(format!(
                "bits_per_color must be 0..=3, got {}",
                self.bits_per_color
            )));
        }
        let x_extent = self.cells_offset + (self.cell_dim_x - 1) * self.cell_spacing_x + self.cell_size;
        let y_extent = self.cells_offset + (self.cell_dim_y - 1) * self.cell_spacing_y + self.cell_size;
        if x_extent > self.total_size || y_extent > self.total_size {
            return Err(Error::Config(format!(
                "grid {x_extent}x{y_extent} does not fit in a {} px frame",
                self.total_size
            )));
        }
        Ok(())
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::sq_8x8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_geometry() {
        let p = Profile::sq_8x8();
        assert_eq!(p.marker_size_x(), 6);
        assert_eq!(p.marker_size_y(), 6);
        assert_eq!(p.bits_per_op(), 6);
        assert_eq!(p.num_cells(), 12400);
        assert_eq!(p.frame_bytes(), 9300);
        assert_eq!(p.rs_payload_bytes(), 7500);
        assert_eq!(p.fountain_chunk_write_size(), 750);
        assert_eq!(p.fountain_chunk_size(), 744);
        p.validate().unwrap();
    }

    #[test]
    fn dense_profile_geometry() {
        let p = Profile::sq_5x5();
        assert_eq!(p.marker_size_x(), 9);
        assert_eq!(p.num_cells(), 162 * 162 - 4 * 81);
        assert_eq!(p.frame_bytes(), p.num_cells() * 4 / 8);
        p.validate().unwrap();
    }

    #[test]
    fn overrides() {
        let p = Profile::sq_8x8().with_ecc(0).with_color_bits(0);
        assert_eq!(p.bits_per_op(), 4);
        assert_eq!(p.rs_payload_bytes(), p.frame_bytes());
        p.validate().unwrap();

        let bad = Profile::sq_8x8().with_ecc(155);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn unknown_preset_is_rejected() {
        assert!(Profile::preset("nope").is_err());
        assert_eq!(Profile::preset("8x8").unwrap(), Profile::sq_8x8());
    }
}
