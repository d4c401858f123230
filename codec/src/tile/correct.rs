//! Color correction for camera-captured frames.
//!
//! Mode 1 builds a von-Kries diagonal adaptation from a known-white sample.
//! Mode 2 refines it with a full 3x3 least-squares fit (Cheung 2004) from
//! observed/expected color pairs gathered during the first decode pass.
//! The split variants carry separate matrices for the image center and the
//! periphery to counter vignetting.

/// A 3x3 linear map over RGB, applied as `v' = M v`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorMatrix(pub [[f64; 3]; 3]);

impl ColorMatrix {
    #[must_use]
    pub const fn identity() -> Self {
        Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Von-Kries chromatic adaptation: scale each channel so the observed
    /// white point maps to (255, 255, 255).
    #[must_use]
    pub fn white_balance(white: [f64; 3]) -> Self {
        let scale = |w: f64| 255.0 / w.max(1.0);
        Self([
            [scale(white[0]), 0.0, 0.0],
            [0.0, scale(white[1]), 0.0],
            [0.0, 0.0, scale(white[2])],
        ])
    }

    #[must_use]
    pub fn apply(&self, rgb: [f64; 3]) -> [f64; 3] {
        let m = &self.0;
        let mut out = [0.0f64; 3];
        for (row, o) in m.iter().zip(out.iter_mut()) {
            *o = (row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2]).clamp(0.0, 255.0);
        }
        out
    }
}

/// Least-squares fit of a 3x3 matrix mapping observed colors onto their
/// expected palette values: `M = ((A'A)^-1 A'B)'`. Returns `None` when the
/// sample set is too small or degenerate.
#[must_use]
pub fn fit_least_squares(observed: &[[f64; 3]], expected: &[[f64; 3]]) -> Option<ColorMatrix> {
    if observed.len() < 4 || observed.len() != expected.len() {
        return None;
    }

    let mut ata = [[0.0f64; 3]; 3];
    let mut atb = [[0.0f64; 3]; 3];
    for (obs, exp) in observed.iter().zip(expected.iter()) {
        for i in 0..3 {
            for j in 0..3 {
                ata[i][j] += obs[i] * obs[j];
                atb[i][j] += obs[i] * exp[j];
            }
        }
    }

    let inv = invert3(&ata)?;
    let mut mt = [[0.0f64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            mt[i][j] = (0..3).map(|k| inv[i][k] * atb[k][j]).sum();
        }
    }

    // transpose: rows of M act on an rgb column vector
    let mut m = [[0.0f64; 3]; 3];
    for (i, row) in mt.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            m[j][i] = v;
        }
    }
    Some(ColorMatrix(m))
}

fn invert3(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-9 {
        return None;
    }
    let inv_det = 1.0 / det;
    let mut out = [[0.0f64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            let (a, b, c, d) = (
                m[(j + 1) % 3][(i + 1) % 3],
                m[(j + 1) % 3][(i + 2) % 3],
                m[(j + 2) % 3][(i + 1) % 3],
                m[(j + 2) % 3][(i + 2) % 3],
            );
            out[i][j] = (a * d - b * c) * inv_det;
        }
    }
    Some(out)
}

/// Position-aware correction: one matrix, or a center/periphery pair.
#[derive(Clone, Copy, Debug)]
pub enum ColorCorrector {
    Off,
    Uniform(ColorMatrix),
    Split {
        center: ColorMatrix,
        outer: ColorMatrix,
        /// squared radius (pixels) of the center region
        radius_sq: f64,
        cx: f64,
        cy: f64,
    },
}

impl ColorCorrector {
    #[must_use]
    pub fn apply(&self, x: u32, y: u32, rgb: [f64; 3]) -> [f64; 3] {
        match self {
            Self::Off => rgb,
            Self::Uniform(m) => m.apply(rgb),
            Self::Split {
                center,
                outer,
                radius_sq,
                cx,
                cy,
            } => {
                let dx = f64::from(x) - cx;
                let dy = f64::from(y) - cy;
                if dx * dx + dy * dy <= *radius_sq {
                    center.apply(rgb)
                } else {
                    outer.apply(rgb)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_balance_maps_the_white_point() {
        let m = ColorMatrix::white_balance([200.0, 220.0, 180.0]);
        let out = m.apply([200.0, 220.0, 180.0]);
        assert!((out[0] - 255.0).abs() < 1e-6);
        assert!((out[1] - 255.0).abs() < 1e-6);
        assert!((out[2] - 255.0).abs() < 1e-6);
    }

    #[test]
    fn identity_fit_from_clean_samples() {
        let samples = vec![
            [255.0, 0.0, 0.0],
            [0.0, 255.0, 0.0],
            [0.0, 0.0, 255.0],
            [255.0, 255.0, 0.0],
            [0.0, 255.0, 255.0],
        ];
        let m = fit_least_squares(&samples, &samples).unwrap();
        for (i, row) in m.0.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                let want = if i == j { 1.0 } else { 0.0 };
                assert!((v - want).abs() < 1e-6, "m[{i}][{j}] = {v}");
            }
        }
    }

    #[test]
    fn recovers_a_channel_swap() {
        // observed colors have red and green swapped
        let expected = vec![
            [255.0, 0.0, 0.0],
            [0.0, 255.0, 0.0],
            [0.0, 0.0, 255.0],
            [255.0, 127.0, 0.0],
            [127.0, 0.0, 255.0],
        ];
        let observed: Vec<[f64; 3]> = expected.iter().map(|c| [c[1], c[0], c[2]]).collect();
        let m = fit_least_squares(&observed, &expected).unwrap();
        let out = m.apply([0.0, 200.0, 0.0]);
        assert!((out[0] - 200.0).abs() < 1e-6);
        assert!(out[1].abs() < 1e-6);
    }

    #[test]
    fn degenerate_samples_are_rejected() {
        let flat = vec![[100.0, 100.0, 100.0]; 10];
        assert!(fit_least_squares(&flat, &flat).is_none());
        assert!(fit_least_squares(&flat[..2], &flat[..2]).is_none());
    }

    #[test]
    fn split_picks_a_matrix_by_radius() {
        let c = ColorCorrector::Split {
            center: ColorMatrix::white_balance([128.0, 255.0, 255.0]),
            outer: ColorMatrix::identity(),
            radius_sq: 100.0 * 100.0,
            cx: 500.0,
            cy: 500.0,
        };
        let inside = c.apply(510, 505, [128.0, 128.0, 128.0]);
        assert!((inside[0] - 255.0).abs() < 1e-6);
        let outside = c.apply(900, 900, [128.0, 128.0, 128.0]);
        assert!((outside[0] - 128.0).abs() < 1e-6);
    }
}
