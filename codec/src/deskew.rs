//! Deskewing: locate the four markers in a photograph and warp the code
//! back onto its canonical square.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use tracing::debug;

use crate::config::Profile;
use crate::error::{Error, Result};
use crate::frame::guide_center;
use crate::scan::{Alignment, Point, Scanner};

/// How aggressively to undo camera geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DeskewLevel {
    /// Use the image as-is (already canonical).
    Off,
    /// Scan and perspective-warp.
    #[default]
    Scan,
    /// Scan, undo radial lens distortion, rescan, then warp.
    Dewarp,
}

impl DeskewLevel {
    #[must_use]
    pub fn from_arg(level: u8) -> Self {
        match level {
            0 => Self::Off,
            1 => Self::Scan,
            _ => Self::Dewarp,
        }
    }
}

pub struct Deskewed {
    pub image: RgbImage,
    /// dimensions of the source photograph
    pub observed: (u32, u32),
}

/// Locate the code in `src` and warp it to `total_size` x `total_size`.
pub fn deskew(src: &RgbImage, profile: &Profile, dark: bool, level: DeskewLevel) -> Result<Deskewed> {
    let observed = src.dimensions();
    if level == DeskewLevel::Off {
        return Ok(Deskewed {
            image: src.clone(),
            observed,
        });
    }

    let scanner = Scanner::new(src, dark, None);
    let mut align = scanner.scan_edges(&scanner.scan()?);
    let mut working = src;
    let undistorted;

    if level == DeskewLevel::Dewarp {
        let k = estimate_radial_factor(&align, profile);
        debug!(k, "radial distortion estimate");
        if k.abs() > 5e-4 {
            undistorted = radial_undistort(src, k);
            let rescanner = Scanner::new(&undistorted, dark, None);
            match rescanner.scan() {
                Ok(second) => {
                    align = rescanner.scan_edges(&second);
                    working = &undistorted;
                }
                Err(err) => debug!(%err, "rescan after undistort failed, keeping first pass"),
            }
        }
    }

    let projection = alignment_projection(&align, profile)
        .ok_or(Error::AnchorDetection { found: 4 })?;

    let size = profile.total_size;
    let mut image = RgbImage::new(size, size);
    warp_into(
        working,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut image,
    );
    Ok(Deskewed { image, observed })
}

/// The canonical positions the observed fixtures must land on.
fn canonical_corners(profile: &Profile) -> [Point; 4] {
    let a = profile.anchor_inset() as f64;
    let t = f64::from(profile.total_size);
    [
        Point::new(a, a),
        Point::new(t - a, a),
        Point::new(a, t - a),
        Point::new(t - a, t - a),
    ]
}

fn canonical_edges(profile: &Profile) -> [Point; 4] {
    let g = f64::from(guide_center());
    let t = f64::from(profile.total_size);
    // top, right, bottom, left
    [
        Point::new(t / 2.0, g),
        Point::new(t - g, t / 2.0),
        Point::new(t / 2.0, t - g),
        Point::new(g, t / 2.0),
    ]
}

/// Projection from observed space to canonical space: an exact 4-point
/// transform, upgraded to an 8-point least-squares fit when every guide bar
/// was found.
fn alignment_projection(align: &Alignment, profile: &Profile) -> Option<Projection> {
    let canon = canonical_corners(profile);

    if align.edges.iter().all(Option::is_some) {
        let canon_edges = canonical_edges(profile);
        let mut from = Vec::with_capacity(8);
        let mut to = Vec::with_capacity(8);
        for (obs, c) in align.corners.iter().zip(canon.iter()) {
            from.push(*obs);
            to.push(*c);
        }
        for (obs, c) in align.edges.iter().zip(canon_edges.iter()) {
            from.push(obs.unwrap());
            to.push(*c);
        }
        if let Some(h) = fit_homography(&from, &to) {
            if let Some(p) = Projection::from_matrix(h) {
                return Some(p);
            }
        }
    }

    let [tl, tr, bl, br] = align.corners;
    Projection::from_control_points(
        [
            (tl.x as f32, tl.y as f32),
            (tr.x as f32, tr.y as f32),
            (bl.x as f32, bl.y as f32),
            (br.x as f32, br.y as f32),
        ],
        [
            (canon[0].x as f32, canon[0].y as f32),
            (canon[1].x as f32, canon[1].y as f32),
            (canon[2].x as f32, canon[2].y as f32),
            (canon[3].x as f32, canon[3].y as f32),
        ],
    )
}

/// Least-squares homography (h33 = 1) over n >= 4 correspondences, solved
/// through the normal equations.
fn fit_homography(from: &[Point], to: &[Point]) -> Option<[f32; 9]> {
    let n = from.len();
    if n < 4 || to.len() != n {
        return None;
    }

    // rows of A: [x y 1 0 0 0 -ux -uy] h = u  (and the v twin)
    let mut ata = [[0.0f64; 8]; 8];
    let mut atb = [0.0f64; 8];
    let mut add_row = |row: [f64; 8], rhs: f64| {
        for i in 0..8 {
            for j in 0..8 {
                ata[i][j] += row[i] * row[j];
            }
            atb[i] += row[i] * rhs;
        }
    };

    for (p, q) in from.iter().zip(to.iter()) {
        add_row(
            [p.x, p.y, 1.0, 0.0, 0.0, 0.0, -q.x * p.x, -q.x * p.y],
            q.x,
        );
        add_row(
            [0.0, 0.0, 0.0, p.x, p.y, 1.0, -q.y * p.x, -q.y * p.y],
            q.y,
        );
    }

    let h = solve_linear(&mut ata, &mut atb)?;
    Some([
        h[0] as f32,
        h[1] as f32,
        h[2] as f32,
        h[3] as f32,
        h[4] as f32,
        h[5] as f32,
        h[6] as f32,
        h[7] as f32,
        1.0,
    ])
}

/// Gaussian elimination with partial pivoting.
fn solve_linear(a: &mut [[f64; 8]; 8], b: &mut [f64; 8]) -> Option<[f64; 8]> {
    for col in 0..8 {
        let pivot = (col..8).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..8 {
            let factor = a[row][col] / a[col][col];
            for k in col..8 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; 8];
    for row in (0..8).rev() {
        let mut sum = b[row];
        for k in row + 1..8 {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}

/// One-parameter radial factor from how far the observed guide bars bulge
/// relative to the straight-line edge midpoints, compared against the
/// canonical ratio. Positive means barrel distortion.
fn estimate_radial_factor(align: &Alignment, profile: &Profile) -> f64 {
    let Some(mp) = align.midpoints else { return 0.0 };

    let t = f64::from(profile.total_size);
    let a = profile.anchor_inset() as f64;
    let g = f64::from(guide_center());
    // canonical: guide centers sit farther from the frame center than the
    // corner-line midpoints by this ratio
    let ideal = (t / 2.0 - g) / (t / 2.0 - a);

    let center = {
        let [tl, tr, bl, br] = align.corners;
        (tl + tr + bl + br) / 4.0
    };

    let line_mids = [mp.top, mp.right, mp.bottom, mp.left];
    let mut sum = 0.0;
    let mut count = 0u32;
    for (edge, line_mid) in align.edges.iter().zip(line_mids.iter()) {
        let Some(edge) = edge else { continue };
        let r_edge = (*edge - center).norm();
        let r_line = (*line_mid - center).norm();
        if r_line < 1.0 {
            continue;
        }
        let observed = r_edge / r_line;
        sum += observed / ideal;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    let bulge = sum / f64::from(count);

    // displacement at the frame edge is roughly k * r^2 with r ~= 2 in
    // focal-normalized units (focal heuristic: width/4, height/4)
    (1.0 - bulge) / 4.0
}

/// Undo barrel/pincushion distortion with a single coefficient. Focal
/// lengths are the crude width/4, height/4 heuristic with the principal
/// point at the image center.
#[must_use]
pub fn radial_undistort(src: &RgbImage, k: f64) -> RgbImage {
    let (w, h) = src.dimensions();
    let (cx, cy) = (f64::from(w) / 2.0, f64::from(h) / 2.0);
    let (fx, fy) = (f64::from(w) / 4.0, f64::from(h) / 4.0);

    RgbImage::from_fn(w, h, |x, y| {
        let xn = (f64::from(x) - cx) / fx;
        let yn = (f64::from(y) - cy) / fy;
        let r2 = xn * xn + yn * yn;
        let scale = 1.0 + k * r2;
        let sx = xn * scale * fx + cx;
        let sy = yn * scale * fy + cy;
        sample_bilinear(src, sx, sy)
    })
}

fn sample_bilinear(img: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (w, h) = (i64::from(img.width()), i64::from(img.height()));
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    if x0 < 0 || y0 < 0 || x0 + 1 >= w || y0 + 1 >= h {
        return Rgb([0, 0, 0]);
    }
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let px = |dx: i64, dy: i64| img.get_pixel((x0 + dx) as u32, (y0 + dy) as u32).0;
    let (p00, p10, p01, p11) = (px(0, 0), px(1, 0), px(0, 1), px(1, 1));

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = f64::from(p00[c]) * (1.0 - fx) + f64::from(p10[c]) * fx;
        let bottom = f64::from(p01[c]) * (1.0 - fx) + f64::from(p11[c]) * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round() as u8;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_homography_from_four_points() {
        // a pure translation by (10, 20)
        let from = vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(0.0, 100.0),
            Point::new(100.0, 100.0),
        ];
        let to: Vec<Point> = from.iter().map(|p| Point::new(p.x + 10.0, p.y + 20.0)).collect();
        let h = fit_homography(&from, &to).unwrap();
        assert!((h[0] - 1.0).abs() < 1e-6);
        assert!((h[2] - 10.0).abs() < 1e-6);
        assert!((h[5] - 20.0).abs() < 1e-6);
        assert!(h[6].abs() < 1e-9 && h[7].abs() < 1e-9);
    }

    #[test]
    fn overdetermined_fit_averages_consistent_points() {
        let from: Vec<Point> = vec![
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(0.0, 100.0),
            Point::new(100.0, 100.0),
            Point::new(50.0, 100.0),
            Point::new(0.0, 50.0),
            Point::new(100.0, 50.0),
        ];
        // scale by 2
        let to: Vec<Point> = from.iter().map(|p| Point::new(p.x * 2.0, p.y * 2.0)).collect();
        let h = fit_homography(&from, &to).unwrap();
        assert!((h[0] - 2.0).abs() < 1e-6);
        assert!((h[4] - 2.0).abs() < 1e-6);
        assert!(h[1].abs() < 1e-6);
    }

    #[test]
    fn undistort_with_zero_k_is_identity_away_from_borders() {
        let src = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 3) as u8, (y * 3) as u8, 128]));
        let out = radial_undistort(&src, 0.0);
        for y in 2..62 {
            for x in 2..62 {
                assert_eq!(out.get_pixel(x, y), src.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn undistort_pulls_pixels_by_k() {
        let mut src = RgbImage::new(100, 100);
        // bright column at x = 90
        for y in 0..100 {
            src.put_pixel(90, y, Rgb([255, 255, 255]));
        }
        let out = radial_undistort(&src, 0.05);
        // at k > 0 the sampled source point moves outward, so the bright
        // column appears nearer the center in the output
        let row = 50u32;
        let bright_x = (0..100u32)
            .max_by_key(|&x| out.get_pixel(x, row).0[0])
            .unwrap();
        assert!(bright_x < 90, "column at {bright_x}");
    }
}
