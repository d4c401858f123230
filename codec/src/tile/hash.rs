use image::GrayImage;
use image::imageops::{self, FilterType};

/// Average-hash of a tile-sized region: downscale to 8x8, threshold each
/// pixel against the mean. One bit per pixel, row-major.
#[must_use]
pub fn average_hash(cell: &GrayImage) -> u64 {
    let resized;
    let img = if cell.dimensions() == (8, 8) {
        cell
    } else {
        resized = imageops::resize(cell, 8, 8, FilterType::Triangle);
        &resized
    };

    let sum: u32 = img.pixels().map(|p| u32::from(p.0[0])).sum();
    let mean = sum / 64;

    let mut bits = 0u64;
    for (i, p) in img.pixels().enumerate() {
        if u32::from(p.0[0]) > mean {
            bits |= 1 << i;
        }
    }
    bits
}

/// Bit-Hamming distance between two hashes.
#[must_use]
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
