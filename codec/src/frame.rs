//! Canonical frame painting: background, corner markers, edge guides.
//!
//! The same constants define where the deskewer expects those fixtures, so
//! painting and alignment can never drift apart.

use image::{Rgb, RgbImage};

use crate::config::Profile;

/// Gap between the frame border and a guide bar.
pub const GUIDE_INSET: u32 = 1;
/// Guide bar thickness.
pub const GUIDE_THICKNESS: u32 = 6;

/// Distance from the border to a guide bar's center line.
#[must_use]
pub const fn guide_center() -> u32 {
    GUIDE_INSET + GUIDE_THICKNESS / 2
}

fn active(dark: bool) -> Rgb<u8> {
    if dark { Rgb([255, 255, 255]) } else { Rgb([0, 0, 0]) }
}

fn inactive(dark: bool) -> Rgb<u8> {
    if dark { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
}

fn fill_rect(img: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: Rgb<u8>) {
    for y in y0..(y0 + h).min(img.height()) {
        for x in x0..(x0 + w).min(img.width()) {
            img.put_pixel(x, y, color);
        }
    }
}

/// Concentric-square marker. The primary reads `1:1:4:1:1` through its
/// center; the secondary (bottom-right) reads `1:2:2:2:1`.
fn draw_marker(img: &mut RgbImage, x0: u32, y0: u32, size: u32, dark: bool, secondary: bool) {
    let unit = |n: u32| (size * n + 4) / 8;
    let (b1, b2) = if secondary {
        (unit(1), unit(3))
    } else {
        (unit(1), unit(2))
    };

    fill_rect(img, x0, y0, size, size, active(dark));
    fill_rect(img, x0 + b1, y0 + b1, size - 2 * b1, size - 2 * b1, inactive(dark));
    fill_rect(img, x0 + b2, y0 + b2, size - 2 * b2, size - 2 * b2, active(dark));
}

/// The empty frame: background, four corner markers (distinct bottom-right),
/// and a guide bar centered on each edge.
#[must_use]
pub fn frame_template(profile: &Profile, dark: bool) -> RgbImage {
    let size = profile.total_size;
    let marker = profile.marker_px();
    let mut img = RgbImage::from_pixel(size, size, inactive(dark));

    draw_marker(&mut img, 0, 0, marker, dark, false);
    draw_marker(&mut img, size - marker, 0, marker, dark, false);
    draw_marker(&mut img, 0, size - marker, marker, dark, false);
    draw_marker(&mut img, size - marker, size - marker, marker, dark, true);

    let bar = marker;
    let mid = size / 2 - bar / 2;
    let far = size - GUIDE_INSET - GUIDE_THICKNESS;
    // horizontal guides, top and bottom
    fill_rect(&mut img, mid, GUIDE_INSET, bar, GUIDE_THICKNESS, active(dark));
    fill_rect(&mut img, mid, far, bar, GUIDE_THICKNESS, active(dark));
    // vertical guides, left and right
    fill_rect(&mut img, GUIDE_INSET, mid, GUIDE_THICKNESS, bar, active(dark));
    fill_rect(&mut img, far, mid, GUIDE_THICKNESS, bar, active(dark));

    img
}
