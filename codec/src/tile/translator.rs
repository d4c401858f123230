use std::collections::VecDeque;

use image::{GrayImage, Luma, Rgb, RgbImage};

use super::correct::ColorCorrector;
use super::glyphs::{glyph_bank, glyph_bit};
use super::hash::{average_hash, hamming};
use super::palette::palette;
use crate::grid::CellDrift;

/// Symbol-phase match: hash distance below this is good enough to stop
/// probing the drift neighborhood.
const GOOD_ENOUGH: u32 = 8;

/// Light-mode gray clamp: a near-achromatic sample reads as ink-free.
const GRAY_CUTOFF: f64 = 20.0;

fn background(dark: bool) -> Rgb<u8> {
    if dark { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
}

/// Precomposed tile images, one per `(color << symbol_bits) | symbol` value.
pub struct TileEncoder {
    tiles: Vec<RgbImage>,
    cell_size: u32,
}

impl TileEncoder {
    #[must_use]
    pub fn new(dark: bool, bits_per_symbol: u32, bits_per_color: u32, cell_size: u32) -> Self {
        let bank = glyph_bank(bits_per_symbol);
        let colors = palette(dark, bits_per_color);
        let bg = background(dark);

        let mut tiles = Vec::with_capacity(bank.len() * colors.len());
        for color in &colors {
            let ink = Rgb(*color);
            for glyph in bank {
                tiles.push(render_glyph(glyph, cell_size, ink, bg));
            }
        }
        Self { tiles, cell_size }
    }

    /// The composite tile for a bit value.
    #[must_use]
    pub fn tile(&self, bits: u16) -> &RgbImage {
        &self.tiles[bits as usize]
    }

    /// Paste the tile for `bits` onto `img` at `(x, y)`.
    pub fn paint(&self, img: &mut RgbImage, bits: u16, x: u32, y: u32) {
        let tile = self.tile(bits);
        for ty in 0..self.cell_size {
            for tx in 0..self.cell_size {
                img.put_pixel(x + tx, y + ty, *tile.get_pixel(tx, ty));
            }
        }
    }
}

fn render_glyph(glyph: &[u8; 8], cell_size: u32, ink: Rgb<u8>, bg: Rgb<u8>) -> RgbImage {
    RgbImage::from_fn(cell_size, cell_size, |x, y| {
        let gx = x * 8 / cell_size;
        let gy = y * 8 / cell_size;
        if glyph_bit(glyph, gx, gy) { ink } else { bg }
    })
}

/// Result of the symbol phase for one cell.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymbolDecode {
    pub bits: u16,
    pub distance: u32,
    pub dx: i32,
    pub dy: i32,
}

/// Two-phase tile decoder: glyph by perceptual-hash distance, color by
/// normalized relative-color distance.
pub struct TileDecoder {
    dark: bool,
    bits_per_symbol: u32,
    cell_size: u32,
    hashes: Vec<u64>,
    colors: Vec<[u8; 3]>,
    /// rolling estimates of how bright ink has been coming through
    brightness: VecDeque<f64>,
}

impl TileDecoder {
    #[must_use]
    pub fn new(dark: bool, bits_per_symbol: u32, bits_per_color: u32, cell_size: u32) -> Self {
        let ink = if dark { Rgb([255, 255, 255]) } else { Rgb([0, 0, 0]) };
        let bg = background(dark);
        let hashes = glyph_bank(bits_per_symbol)
            .iter()
            .map(|glyph| {
                let rendered = render_glyph(glyph, cell_size, ink, bg);
                average_hash(&to_gray(&rendered))
            })
            .collect();

        Self {
            dark,
            bits_per_symbol,
            cell_size,
            hashes,
            colors: palette(dark, bits_per_color),
            brightness: VecDeque::new(),
        }
    }

    /// Identify the glyph at `(x, y)`, probing the 9-neighborhood around the
    /// drifted anchor point. Returns the best symbol bits, its hash
    /// distance, and the offset that produced it.
    #[must_use]
    pub fn decode_symbol(&self, img: &RgbImage, x: u32, y: u32, drift: CellDrift) -> SymbolDecode {
        let mut best = SymbolDecode {
            distance: u32::MAX,
            ..SymbolDecode::default()
        };

        for (dx, dy) in CellDrift::PAIRS {
            let cx = i64::from(x) + i64::from(drift.x) + i64::from(dx);
            let cy = i64::from(y) + i64::from(drift.y) + i64::from(dy);
            let cell = crop_gray(img, cx, cy, self.cell_size);
            let hash = average_hash(&cell);

            let (bits, distance) = self.best_glyph(hash);
            if distance <= best.distance {
                best = SymbolDecode {
                    bits,
                    distance,
                    dx,
                    dy,
                };
            }
            if best.distance < GOOD_ENOUGH {
                break;
            }
        }
        best
    }

    fn best_glyph(&self, hash: u64) -> (u16, u32) {
        let mut best_bits = 0u16;
        let mut best_distance = u32::MAX;
        for (i, &h) in self.hashes.iter().enumerate() {
            let d = hamming(hash, h);
            if d < best_distance {
                best_distance = d;
                best_bits = i as u16;
                if best_distance == 0 {
                    break;
                }
            }
        }
        (best_bits, best_distance)
    }

    /// Identify the palette entry at the (already drift-adjusted) cell
    /// anchor. Returns the color bits, shifted above the symbol bits.
    #[must_use]
    pub fn decode_color(
        &mut self,
        img: &RgbImage,
        x: i64,
        y: i64,
        corrector: &ColorCorrector,
    ) -> u16 {
        if self.colors.len() <= 1 {
            return 0;
        }

        let rgb = self.mean_ink_color(img, x, y);
        let px = x.clamp(0, i64::from(img.width() - 1)) as u32;
        let py = y.clamp(0, i64::from(img.height() - 1)) as u32;
        let rgb = corrector.apply(px, py, rgb);
        let bits = self.best_color(rgb);
        bits << self.bits_per_symbol
    }

    /// Mean RGB over the 1px-inset interior of the cell. In dark mode only
    /// pixels above the adaptive brightness cutoff count, so the black
    /// background does not wash the ink color out.
    pub fn mean_ink_color(&mut self, img: &RgbImage, x: i64, y: i64) -> [f64; 3] {
        let inset = 1i64;
        let side = i64::from(self.cell_size) - 2 * inset;
        let cutoff = self.brightness_cutoff();

        let mut sum = [0.0f64; 3];
        let mut sum_all = [0.0f64; 3];
        let mut count = 0u32;
        let mut count_all = 0u32;
        for dy in 0..side {
            for dx in 0..side {
                let px = (x + inset + dx).clamp(0, i64::from(img.width()) - 1) as u32;
                let py = (y + inset + dy).clamp(0, i64::from(img.height()) - 1) as u32;
                let p = img.get_pixel(px, py).0;
                let (r, g, b) = (f64::from(p[0]), f64::from(p[1]), f64::from(p[2]));
                sum_all[0] += r;
                sum_all[1] += g;
                sum_all[2] += b;
                count_all += 1;
                if !self.dark || r.max(g).max(b) > cutoff {
                    sum[0] += r;
                    sum[1] += g;
                    sum[2] += b;
                    count += 1;
                }
            }
        }

        let (sum, count) = if count > 0 { (sum, count) } else { (sum_all, count_all) };
        let n = f64::from(count.max(1));
        let rgb = [sum[0] / n, sum[1] / n, sum[2] / n];

        if self.dark {
            let peak = rgb[0].max(rgb[1]).max(rgb[2]);
            self.brightness.push_back(peak);
            if self.brightness.len() > 64 {
                self.brightness.pop_front();
            }
        }
        rgb
    }

    fn brightness_cutoff(&self) -> f64 {
        if self.brightness.is_empty() {
            return 35.0;
        }
        let avg: f64 = self.brightness.iter().sum::<f64>() / self.brightness.len() as f64;
        (avg / 2.0).clamp(20.0, 128.0)
    }

    /// Classify an externally corrected mean color against the palette.
    #[must_use]
    pub fn classify_mean(&self, rgb: [f64; 3]) -> u16 {
        if self.colors.len() <= 1 {
            return 0;
        }
        self.best_color(rgb)
    }

    /// Normalize and pick the palette entry with the smallest relative-color
    /// distance, which is invariant to uniform illumination scale.
    fn best_color(&self, rgb: [f64; 3]) -> u16 {
        let mn = rgb[0].min(rgb[1]).min(rgb[2]);
        let mx = rgb[0].max(rgb[1]).max(rgb[2]);

        let (r, g, b) = if !self.dark && mx - mn < GRAY_CUTOFF {
            (0.0, 0.0, 0.0)
        } else {
            let scale = 255.0 / (mx - mn).max(1.0);
            (
                (rgb[0] - mn) * scale,
                (rgb[1] - mn) * scale,
                (rgb[2] - mn) * scale,
            )
        };

        let mut best = 0u16;
        let mut best_d = f64::MAX;
        for (i, c) in self.colors.iter().enumerate() {
            let (cr, cg, cb) = (f64::from(c[0]), f64::from(c[1]), f64::from(c[2]));
            let drg = (r - g) - (cr - cg);
            let dgb = (g - b) - (cg - cb);
            let dbr = (b - r) - (cb - cr);
            let d = drg * drg + dgb * dgb + dbr * dbr;
            if d < best_d {
                best_d = d;
                best = i as u16;
            }
        }
        best
    }

    /// Palette entry for a color index, as floats (expected values for the
    /// least-squares correction fit).
    #[must_use]
    pub fn expected_color(&self, color_bits: u16) -> [f64; 3] {
        let c = self.colors[color_bits as usize];
        [f64::from(c[0]), f64::from(c[1]), f64::from(c[2])]
    }

    #[must_use]
    pub fn num_colors(&self) -> usize {
        self.colors.len()
    }
}

fn to_gray(img: &RgbImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y).0;
        let luma =
            0.299 * f64::from(p[0]) + 0.587 * f64::from(p[1]) + 0.114 * f64::from(p[2]);
        Luma([luma as u8])
    })
}

/// Grayscale crop of a `size` square at `(x, y)`, clamped to the image.
fn crop_gray(img: &RgbImage, x: i64, y: i64, size: u32) -> GrayImage {
    let max_x = i64::from(img.width()) - i64::from(size);
    let max_y = i64::from(img.height()) - i64::from(size);
    let x0 = x.clamp(0, max_x.max(0)) as u32;
    let y0 = y.clamp(0, max_y.max(0)) as u32;
    GrayImage::from_fn(size, size, |dx, dy| {
        let p = img.get_pixel(x0 + dx, y0 + dy).0;
        let luma =
            0.299 * f64::from(p[0]) + 0.587 * f64::from(p[1]) + 0.114 * f64::from(p[2]);
        Luma([luma as u8])
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::correct::ColorMatrix;
    use super::*;

    fn paint_single(bits: u16, dark: bool) -> RgbImage {
        let enc = TileEncoder::new(dark, 4, 2, 8);
        let mut img = RgbImage::from_pixel(24, 24, background(dark));
        enc.paint(&mut img, bits, 8, 8);
        img
    }

    #[test]
    fn every_tile_value_round_trips() {
        for dark in [true, false] {
            let mut dec = TileDecoder::new(dark, 4, 2, 8);
            for bits in 0..64u16 {
                let img = paint_single(bits, dark);
                let sym = dec.decode_symbol(&img, 8, 8, CellDrift::default());
                assert_eq!(sym.distance, 0, "bits {bits} dark {dark}");
                let color = dec.decode_color(&img, 8, 8, &ColorCorrector::Off);
                assert_eq!(color | sym.bits, bits, "bits {bits} dark {dark}");
            }
        }
    }

    #[test]
    fn symbol_survives_one_pixel_drift() {
        let mut drifted = RgbImage::from_pixel(24, 24, background(true));
        let enc = TileEncoder::new(true, 4, 2, 8);
        enc.paint(&mut drifted, 13, 9, 7);

        let dec = TileDecoder::new(true, 4, 2, 8);
        let sym = dec.decode_symbol(&drifted, 8, 8, CellDrift::default());
        assert_eq!(sym.bits, 13);
        assert_eq!((sym.dx, sym.dy), (1, -1));
    }

    #[test]
    fn drift_hint_narrows_the_search() {
        let mut drifted = RgbImage::from_pixel(32, 32, background(true));
        let enc = TileEncoder::new(true, 4, 2, 8);
        enc.paint(&mut drifted, 5, 12, 12);

        let dec = TileDecoder::new(true, 4, 2, 8);
        let sym = dec.decode_symbol(&drifted, 8, 8, CellDrift::new(3, 3));
        assert_eq!(sym.bits, 5);
        assert_eq!(sym.distance, 0);
        assert_eq!((sym.dx, sym.dy), (1, 1));
    }

    #[test]
    fn color_is_read_from_the_interior() {
        // light mode, color 2 (magenta) over every glyph
        let mut dec = TileDecoder::new(false, 4, 2, 8);
        for symbol in 0..16u16 {
            let bits = (2 << 4) | symbol;
            let img = paint_single(bits, false);
            assert_eq!(dec.decode_color(&img, 8, 8, &ColorCorrector::Off), 2 << 4);
        }
    }

    #[test]
    fn zero_color_bits_reads_zero() {
        let mut dec = TileDecoder::new(true, 4, 0, 8);
        let img = paint_single(3, true);
        assert_eq!(dec.decode_color(&img, 8, 8, &ColorCorrector::Off), 0);
    }

    #[test]
    fn white_balance_undoes_a_channel_cast() {
        let mut dec = TileDecoder::new(true, 4, 2, 8);
        let img = paint_single((1 << 4) | 7, true); // yellow ink
        // per-channel gains, as from a skewed camera white point
        let cast = RgbImage::from_fn(img.width(), img.height(), |x, y| {
            let p = img.get_pixel(x, y).0;
            Rgb([
                (f64::from(p[0]) * 0.5) as u8,
                (f64::from(p[1]) * 0.9) as u8,
                (f64::from(p[2]) * 0.8) as u8,
            ])
        });
        let corrector =
            ColorCorrector::Uniform(ColorMatrix::white_balance([127.5, 229.5, 204.0]));
        assert_eq!(dec.decode_color(&cast, 8, 8, &corrector), 1 << 4);
    }
}
