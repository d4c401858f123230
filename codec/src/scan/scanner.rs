use image::{GrayImage, RgbImage};
use imageproc::contrast::{otsu_level, threshold};
use imageproc::filter::gaussian_blur_f32;
use tracing::debug;

use super::anchor::Anchor;
use super::geometry::{Midpoints, Point, calculate_midpoints};
use super::state::{EdgeScanState, ScanRatio, ScanState};
use crate::error::{Error, Result};

/// Everything the deskewer needs: the four corner centers, whatever edge
/// guides were found, and the measured anchor scale.
#[derive(Clone, Debug)]
pub struct Alignment {
    /// top-left, top-right, bottom-left, bottom-right
    pub corners: [Point; 4],
    /// guide-bar midpoints in top/right/bottom/left order
    pub edges: [Option<Point>; 4],
    pub midpoints: Option<Midpoints>,
    /// average corner-marker half-extent, in source pixels
    pub anchor_size: f64,
}

fn next_power_of_two_plus_one(x: i64) -> i64 {
    let mut p = 1i64;
    while p < x {
        p <<= 1;
    }
    p + 1
}

/// Grayscale, blur proportional to the short side, Otsu threshold.
fn the_works(img: &RgbImage) -> GrayImage {
    let gray = image::imageops::grayscale(img);
    let short = i64::from(img.width().min(img.height()));
    let blur_unit = next_power_of_two_plus_one((short as f64 * 0.002) as i64).max(3);
    // OpenCV's sigma-from-kernel rule keeps the blur comparable across sizes
    let sigma = 0.3 * ((blur_unit - 1) as f32 * 0.5 - 1.0) + 0.8;
    let blurred = gaussian_blur_f32(&gray, sigma.max(0.3));
    let level = otsu_level(&blurred);
    threshold(&blurred, level)
}

/// Four-pass finder-pattern scanner over a binarized image.
pub struct Scanner {
    img: GrayImage,
    width: i64,
    height: i64,
    dark: bool,
    skip: i64,
    cutoff: i64,
}

impl Scanner {
    #[must_use]
    pub fn new(src: &RgbImage, dark: bool, skip: Option<i64>) -> Self {
        let img = the_works(src);
        let (width, height) = (i64::from(img.width()), i64::from(img.height()));
        Self {
            img,
            width,
            height,
            dark,
            skip: skip.unwrap_or(height / 200).max(1),
            cutoff: height / 30,
        }
    }

    fn test_pixel(&self, x: i64, y: i64) -> bool {
        if x < 0 || x >= self.width || y < 0 || y >= self.height {
            return false;
        }
        let p = self.img.get_pixel(x as u32, y as u32).0[0];
        if self.dark { p > 127 } else { p < 127 }
    }

    fn horizontal_scan(&self, y: i64, r: Option<(i64, i64)>, ratio: ScanRatio) -> Vec<Anchor> {
        let (x0, x1) = match r {
            Some((a, b)) => (a.max(0), b.min(self.width)),
            None => (0, self.width),
        };
        let mut found = Vec::new();
        let mut state = ScanState::new(ratio);
        for x in x0..x1 {
            if let Some(res) = state.process(self.test_pixel(x, y)) {
                found.push(Anchor::from_horizontal(x - res, x - 1, y));
            }
        }
        // pattern flush at the end of the range
        if let Some(res) = state.process(false) {
            found.push(Anchor::from_horizontal(x1 - res, x1 - 1, y));
        }
        found
    }

    fn vertical_scan(
        &self,
        x: i64,
        xmax: i64,
        r: Option<(i64, i64)>,
        ratio: ScanRatio,
    ) -> Vec<Anchor> {
        let xavg = (x + xmax) / 2;
        let (y0, y1) = match r {
            Some((a, b)) => (a.max(0), b.min(self.height)),
            None => (0, self.height),
        };
        let mut found = Vec::new();
        let mut state = ScanState::new(ratio);
        for y in y0..y1 {
            if let Some(res) = state.process(self.test_pixel(xavg, y)) {
                found.push(Anchor::new(x, xmax, y - res, y - 1));
            }
        }
        if let Some(res) = state.process(false) {
            found.push(Anchor::new(x, xmax, y1 - res, y1 - 1));
        }
        found
    }

    fn diagonal_scan(
        &self,
        start_x: i64,
        end_x: i64,
        start_y: i64,
        end_y: i64,
        ratio: ScanRatio,
    ) -> Vec<Anchor> {
        let end_x = end_x.min(self.width);
        let end_y = end_y.min(self.height);
        let (mut x, mut y) = (start_x, start_y);
        // roll forward until inside the top/left bounds
        if x < 0 {
            y += -x;
            x = 0;
        }
        if y < 0 {
            x += -y;
            y = 0;
        }

        let mut found = Vec::new();
        let mut state = ScanState::new(ratio);
        while x < end_x && y < end_y {
            if let Some(res) = state.process(self.test_pixel(x, y)) {
                found.push(Anchor::new(x - res, x, y - res, y));
            }
            x += 1;
            y += 1;
        }
        if let Some(res) = state.process(false) {
            found.push(Anchor::new(x - res, x, y - res, y));
        }
        found
    }

    /// Pass 1: coarse horizontal sweep for candidate x-spans.
    fn t1_scan_horizontal(
        &self,
        skip: i64,
        start_y: i64,
        end_y: i64,
        r: Option<(i64, i64)>,
        ratio: ScanRatio,
    ) -> Vec<Anchor> {
        let end_y = end_y.min(self.height);
        let mut results = Vec::new();
        let mut y = start_y.max(0) + skip;
        while y < end_y {
            results.extend(self.horizontal_scan(y, r, ratio));
            y += skip;
        }
        results
    }

    /// Pass 2: vertical rescans around each candidate's y-center.
    fn t2_scan_vertical(&self, candidates: &[Anchor], ratio: ScanRatio) -> Vec<Anchor> {
        let mut results = Vec::new();
        for p in candidates {
            let guess = (p.y - 3 * p.xrange(), p.y + 3 * p.xrange());
            results.extend(self.vertical_scan(p.x, p.xmax, Some(guess), ratio));
        }
        results
    }

    /// Pass 3: diagonal confirmation, filtering text/graphics that happen to
    /// match along one axis.
    fn t3_scan_diagonal(&self, candidates: &[Anchor], ratio: ScanRatio) -> Vec<Anchor> {
        let mut results = Vec::new();
        for p in candidates {
            results.extend(self.diagonal_scan(
                p.xavg() - 2 * p.yrange(),
                p.xavg() + 2 * p.yrange(),
                p.y - p.yrange(),
                p.ymax + p.yrange(),
                ratio,
            ));
        }
        results
    }

    /// Pass 4: short re-scans at +-1px around each candidate's center with a
    /// tighter merge cutoff; candidates that stop confirming are dropped.
    fn t4_confirm_scan(&self, candidates: &[Anchor], ratio: ScanRatio, merge: bool) -> Vec<Anchor> {
        let confirm_cutoff = self.cutoff / 2;
        let confirmed = |p: &Anchor, results: &[Anchor]| -> Vec<Anchor> {
            results
                .iter()
                .filter(|c| c.is_mergeable(p, confirm_cutoff))
                .copied()
                .collect()
        };

        let mut results = Vec::new();
        'candidates: for &p in candidates {
            let mut p = p;

            let xrange = (p.x - p.xrange(), p.xmax + p.xrange());
            let yavg = p.yavg();
            for y in [yavg - 1, yavg, yavg + 1] {
                let xs = self.horizontal_scan(y, Some(xrange), ratio);
                let confirms = confirmed(&p, &xs);
                if confirms.is_empty() {
                    continue 'candidates;
                }
                if merge {
                    for c in &confirms {
                        p.merge(c);
                    }
                }
            }

            let yrange = (p.y - p.yrange(), p.ymax + p.yrange());
            let xavg = p.xavg();
            for x in [xavg - 1, xavg, xavg + 1] {
                let ys = self.vertical_scan(x, x, Some(yrange), ratio);
                let confirms = confirmed(&p, &ys);
                if confirms.is_empty() {
                    continue 'candidates;
                }
                if merge {
                    for c in &confirms {
                        p.merge(c);
                    }
                }
            }

            results.push(p);
        }

        self.deduplicate(results)
    }

    /// Group by proximity and size ratio, union each group's bounding boxes.
    fn deduplicate(&self, candidates: Vec<Anchor>) -> Vec<Anchor> {
        let mut groups: Vec<Vec<Anchor>> = Vec::new();
        for p in candidates {
            let mut placed = false;
            for group in &mut groups {
                if group[0].is_mergeable(&p, self.cutoff) {
                    group.push(p);
                    placed = true;
                    break;
                }
            }
            if !placed {
                groups.push(vec![p]);
            }
        }

        groups
            .into_iter()
            .map(|group| {
                let mut merged = group[0];
                for p in &group[1..] {
                    merged.merge(p);
                }
                merged
            })
            .collect()
    }

    /// Keep the three largest candidates, each at least half the average
    /// size. Returns the survivors and the average half-extent.
    fn filter_candidates(&self, mut candidates: Vec<Anchor>) -> (Vec<Anchor>, i64) {
        if candidates.len() < 3 {
            return (candidates, 0);
        }
        candidates.sort_by_key(Anchor::size);
        let best: Vec<Anchor> = candidates[candidates.len() - 3..].to_vec();

        let xrange: i64 = best.iter().map(Anchor::xrange).sum::<i64>() / best.len() as i64;
        let yrange: i64 = best.iter().map(Anchor::yrange).sum::<i64>() / best.len() as i64;
        let max_range = xrange.max(yrange);

        let kept = best
            .into_iter()
            .filter(|c| 2 * c.xrange() >= xrange && 2 * c.yrange() >= yrange)
            .collect();
        (kept, max_range)
    }

    /// Order three markers as top-left, top-right, bottom-left. The marker
    /// opposite the longest edge is the top-left; rotating the incoming edge
    /// a quarter turn clockwise tells the other two apart.
    fn sort_corners(candidates: &[Anchor]) -> [Anchor; 3] {
        let fix = |idx: i64| -> usize {
            if idx < 0 {
                2
            } else if idx > 2 {
                0
            } else {
                idx as usize
            }
        };

        let cs: Vec<Point> = candidates
            .iter()
            .map(|p| Point::new(p.xavg() as f64, p.yavg() as f64))
            .collect();
        let edges = [cs[1] - cs[2], cs[2] - cs[0], cs[0] - cs[1]];

        let mut top_left = 0usize;
        let mut max_d = 0.0f64;
        for (i, e) in edges.iter().enumerate() {
            let dist = e.dot(*e);
            if dist > max_d {
                max_d = dist;
                top_left = i;
            }
        }

        let departing = edges[fix(top_left as i64 - 1)];
        let incoming = edges[fix(top_left as i64 + 1)].rotate_cw();
        let overlap = departing - incoming;

        let (top_right, bottom_left) = if overlap.dot(overlap) < departing.dot(departing) {
            (fix(top_left as i64 + 1), fix(top_left as i64 - 1))
        } else {
            (fix(top_left as i64 - 1), fix(top_left as i64 + 1))
        };

        [
            candidates[top_left],
            candidates[top_right],
            candidates[bottom_left],
        ]
    }

    /// Predict the bottom-right marker from the other three and re-scan a
    /// window around the prediction with the secondary ratio.
    fn scan_fourth_corner(&self, center: Point, range: i64) -> Option<Point> {
        let uncertainty = 4;
        let start_y = center.y as i64 - range * uncertainty;
        let end_y = center.y as i64 + range * uncertainty;
        let start_x = center.x as i64 - range * uncertainty;
        let end_x = center.x as i64 + range * uncertainty;

        let skip = (self.skip / 2).max(1);
        debug!(start_x, end_x, start_y, end_y, skip, "fourth corner window");

        let ratio = ScanRatio::OneTwoTwo;
        let candidates =
            self.t1_scan_horizontal(skip, start_y, end_y, Some((start_x, end_x)), ratio);
        let t2 = self.t2_scan_vertical(&candidates, ratio);
        if !t2
            .iter()
            .any(|c| 2 * c.xrange() >= range && 2 * c.yrange() >= range)
        {
            return None;
        }

        let t3 = self.t3_scan_diagonal(&t2, ratio);
        let mut t4 = self.t4_confirm_scan(&t3, ratio, false);
        t4.sort_by_key(Anchor::size);

        let best = *t4.last()?;
        if 2 * best.xrange() < range || 2 * best.yrange() < range {
            return None;
        }
        Some(Point::new(best.xavg() as f64, best.yavg() as f64))
    }

    /// Full scan: all four passes, dedup, filter, orient, and recover the
    /// bottom-right corner.
    pub fn scan(&self) -> Result<Alignment> {
        let ratio = ScanRatio::OneOneFour;
        let t1 = self.t1_scan_horizontal(self.skip, 0, self.height, None, ratio);
        let t2 = self.t2_scan_vertical(&t1, ratio);
        let t3 = self.t3_scan_diagonal(&t2, ratio);
        let t4 = self.t4_confirm_scan(&t3, ratio, true);
        debug!(
            t1 = t1.len(),
            t2 = t2.len(),
            t3 = t3.len(),
            t4 = t4.len(),
            "scan passes"
        );

        let (kept, max_range) = self.filter_candidates(t4);
        if kept.len() < 3 {
            return Err(Error::AnchorDetection { found: kept.len() });
        }

        let [tl, tr, bl] = Self::sort_corners(&kept);
        let corners = [tl, tr, bl];
        let centers: Vec<Point> = corners
            .iter()
            .map(|p| Point::new(p.xavg() as f64, p.yavg() as f64))
            .collect();

        // scale each edge vector by the relative size of the far marker, so
        // a perspective-shrunk side predicts a proportionally nearer corner
        let top_scalar =
            bl.max_range() as f64 / tr.max_range().max(tl.max_range()).max(1) as f64;
        let top_edge = (centers[1] - centers[0]) * top_scalar;
        let left_scalar =
            tr.max_range() as f64 / bl.max_range().max(tl.max_range()).max(1) as f64;
        let left_edge = (centers[2] - centers[0]) * left_scalar;

        let guess = (centers[2] + top_edge + centers[1] + left_edge) / 2.0;
        debug!(x = guess.x, y = guess.y, "bottom right prediction");

        let fourth = self
            .scan_fourth_corner(guess, max_range)
            .ok_or(Error::AnchorDetection { found: 3 })?;

        let anchor_size = corners
            .iter()
            .map(|c| (c.xrange() + c.yrange()) as f64 / 2.0)
            .sum::<f64>()
            / 3.0;

        Ok(Alignment {
            corners: [centers[0], centers[1], centers[2], fourth],
            edges: [None; 4],
            midpoints: None,
            anchor_size,
        })
    }

    /// Probe at 4 points along the edge direction; a real guide bar lights
    /// at least two of them.
    fn chase_edge(&self, start: Point, unit: Point) -> bool {
        let mut hits = 0;
        for i in [-2.0f64, -1.0, 1.0, 2.0] {
            let x = (start.x + unit.x * i) as i64;
            let y = (start.y + unit.y * i) as i64;
            if self.test_pixel(x, y) {
                hits += 1;
            }
        }
        hits >= 2
    }

    /// Walk outward then inward from an edge midpoint along the
    /// perpendicular, looking for the guide bar's active run.
    fn find_edge(&self, u: Point, v: Point, mid: Point, anchor_size: f64) -> Option<Point> {
        let distance_v = v - u;
        let distance_unit = distance_v / 512.0;
        let out_v = Point::new(distance_v.y / 64.0, -distance_v.x / 64.0);

        let mid = mid + out_v * (anchor_size / 16.0);

        let in_v = Point::new(-out_v.x, -out_v.y);
        for check in [out_v, in_v] {
            let max_check = check.x.abs().max(check.y.abs());
            if max_check < 1.0 {
                continue;
            }
            let unit = check / max_check;

            let mut state = EdgeScanState::new();
            let (mut i, mut j) = (0.0f64, 0.0f64);
            while i.abs() <= check.x.abs() && j.abs() <= check.y.abs() {
                let x = (mid.x + i) as i64;
                let y = (mid.y + j) as i64;
                if x < 0 || x >= self.width || y < 0 || y >= self.height {
                    i += unit.x;
                    j += unit.y;
                    continue;
                }
                if let Some(size) = state.process(self.test_pixel(x, y)) {
                    let edge = Point::new(x as f64, y as f64) - unit * (size as f64 / 2.0);
                    if self.chase_edge(edge, distance_unit) {
                        return Some(edge);
                    }
                }
                i += unit.x;
                j += unit.y;
            }
        }
        None
    }

    /// Find the four guide-bar midpoints for an aligned code. Missing bars
    /// stay `None`; the deskewer falls back to corners alone.
    #[must_use]
    pub fn scan_edges(&self, align: &Alignment) -> Alignment {
        let Some(mp) = calculate_midpoints(&align.corners) else {
            return align.clone();
        };
        let [tl, tr, bl, br] = align.corners;
        let bounds = [
            (tl, tr, mp.top),
            (tr, br, mp.right),
            (br, bl, mp.bottom),
            (bl, tl, mp.left),
        ];

        let mut edges = [None; 4];
        for (i, (start, end, mid)) in bounds.into_iter().enumerate() {
            edges[i] = self.find_edge(start, end, mid, align.anchor_size);
        }

        Alignment {
            corners: align.corners,
            edges,
            midpoints: Some(mp),
            anchor_size: align.anchor_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use crate::frame::frame_template;

    fn template_scanner(dark: bool) -> Scanner {
        let img = frame_template(&Profile::sq_8x8(), dark);
        Scanner::new(&img, dark, None)
    }

    fn assert_near(p: Point, x: f64, y: f64, tol: f64) {
        assert!(
            (p.x - x).abs() <= tol && (p.y - y).abs() <= tol,
            "({}, {}) not within {tol} of ({x}, {y})",
            p.x,
            p.y
        );
    }

    #[test]
    fn finds_all_four_corners_on_a_clean_frame() {
        let align = template_scanner(true).scan().unwrap();
        let [tl, tr, bl, br] = align.corners;
        assert_near(tl, 27.0, 27.0, 4.0);
        assert_near(tr, 997.0, 27.0, 4.0);
        assert_near(bl, 27.0, 997.0, 4.0);
        assert_near(br, 997.0, 997.0, 6.0);
        assert!(align.anchor_size > 20.0 && align.anchor_size < 32.0);
    }

    #[test]
    fn light_mode_inverts_the_polarity() {
        let align = template_scanner(false).scan().unwrap();
        assert_near(align.corners[0], 27.0, 27.0, 4.0);
        assert_near(align.corners[3], 997.0, 997.0, 6.0);
    }

    #[test]
    fn edge_guides_are_found_near_the_borders() {
        let scanner = template_scanner(true);
        let align = scanner.scan_edges(&scanner.scan().unwrap());
        let [top, right, bottom, left] = align.edges;
        let top = top.unwrap();
        assert!((top.x - 512.0).abs() <= 6.0 && top.y <= 8.0, "top at {top:?}");
        let right = right.unwrap();
        assert!(right.x >= 1016.0 && (right.y - 512.0).abs() <= 6.0);
        let bottom = bottom.unwrap();
        assert!(bottom.y >= 1016.0 && (bottom.x - 512.0).abs() <= 6.0);
        let left = left.unwrap();
        assert!(left.x <= 8.0 && (left.y - 512.0).abs() <= 6.0);
    }

    #[test]
    fn dedup_is_idempotent() {
        let scanner = template_scanner(true);
        let candidates = vec![
            Anchor::new(100, 150, 100, 150),
            Anchor::new(102, 152, 101, 149),
            Anchor::new(98, 148, 103, 153),
            Anchor::new(600, 650, 600, 650),
            Anchor::new(604, 652, 598, 648),
        ];
        let once = scanner.deduplicate(candidates);
        let twice = scanner.deduplicate(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn featureless_image_reports_missing_anchors() {
        let blank = RgbImage::from_pixel(512, 512, image::Rgb([30, 30, 30]));
        let scanner = Scanner::new(&blank, true, None);
        assert!(matches!(
            scanner.scan(),
            Err(Error::AnchorDetection { .. })
        ));
    }
}
