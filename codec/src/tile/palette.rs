//! Tile color palettes.
//!
//! Entries come from disjoint regions of color space. Slot 1 differs per
//! background: yellow reads badly on white, blue reads badly on black.

#[must_use]
const fn colors(dark: bool) -> [[u8; 3]; 8] {
    let slot1 = if dark { [0xFF, 0xFF, 0x00] } else { [0x00, 0x00, 0xFF] };
    [
        [0x00, 0xFF, 0xFF],
        slot1,
        [0xFF, 0x00, 0xFF],
        [0x00, 0xFF, 0x00],
        [0xFF, 0x7F, 0x00], // orange
        [0x00, 0x7F, 0xFF], // sky blue
        [0xFF, 0x00, 0x00],
        [0x7F, 0x00, 0xFF], // purple
    ]
}

/// The `2^bits_per_color` palette entries for a mode. Zero color bits still
/// yields one entry: every tile is painted in the primary color.
#[must_use]
pub fn palette(dark: bool, bits_per_color: u32) -> Vec<[u8; 3]> {
    colors(dark)[..1 << bits_per_color].to_vec()
}
