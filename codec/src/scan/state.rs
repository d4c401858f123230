/// Run-length ratios a [`ScanState`] can hunt for.
///
/// The primary corner markers read `1:1:4:1:1` along any line through their
/// center; the bottom-right marker uses `1:2:2` (i.e. `1:2:2:2:1`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanRatio {
    OneOneFour,
    OneTwoTwo,
}

impl ScanRatio {
    /// (min, max) bounds on `center / run`, for the outermost runs and the
    /// inner runs respectively.
    const fn limits(self) -> [(f64, f64); 2] {
        match self {
            Self::OneOneFour => [(3.0, 6.0), (3.0, 6.0)],
            Self::OneTwoTwo => [(1.0, 3.0), (0.5, 1.5)],
        }
    }
}

/// Finder-pattern state machine.
///
/// Consumes a stream of active/inactive pixels; states 0-5 alternate
/// polarity, and the transition into state 6 evaluates the last five runs
/// against the ratio. Whatever the verdict, the window then slides forward
/// two runs so overlapping patterns still register.
pub struct ScanState {
    state: u8,
    tally: Vec<i64>,
    limits: [(f64, f64); 2],
}

impl ScanState {
    #[must_use]
    pub fn new(ratio: ScanRatio) -> Self {
        Self {
            state: 0,
            tally: vec![0],
            limits: ratio.limits(),
        }
    }

    fn pop_state(&mut self) {
        self.state -= 2;
        self.tally.drain(..2);
    }

    fn evaluate(&self) -> Option<i64> {
        if self.state != 6 {
            return None;
        }
        let runs = &self.tally[1..6];
        if runs.iter().any(|&r| r == 0) {
            return None;
        }

        let center = runs[2] as f64;
        let checks = [
            (runs[0], self.limits[0]),
            (runs[1], self.limits[1]),
            (runs[3], self.limits[1]),
            (runs[4], self.limits[0]),
        ];
        for (run, (lo, hi)) in checks {
            let ratio_min = center / (run + 1) as f64;
            let ratio_max = center / (run - 1).max(1) as f64;
            if ratio_max < lo || ratio_min > hi {
                return None;
            }
        }
        Some(runs.iter().sum())
    }

    /// Feed one pixel. Returns the total pattern width when the last five
    /// runs match the ratio.
    pub fn process(&mut self, active: bool) -> Option<i64> {
        let is_transition = (self.state % 2 == 0 && active) || (self.state % 2 == 1 && !active);
        if is_transition {
            self.state += 1;
            self.tally.push(1);

            if self.state == 6 {
                let res = self.evaluate();
                self.pop_state();
                return res;
            }
            return None;
        }

        // mid-run: states 1..=5 tally their own polarity; state 0 idles
        if self.state > 0 {
            *self.tally.last_mut().unwrap() += 1;
        }
        None
    }
}

/// Simpler two-state machine for the edge guides: measures the length of
/// each active run.
pub struct EdgeScanState {
    state: u8,
    tally: Vec<i64>,
}

impl EdgeScanState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: 0,
            tally: vec![0],
        }
    }

    pub fn process(&mut self, active: bool) -> Option<i64> {
        let is_transition = (self.state == 0 && active) || (self.state == 1 && !active);
        if is_transition {
            self.state += 1;
            self.tally.push(1);
            if self.state == 2 {
                let run = self.tally[1];
                self.state -= 2;
                self.tally.drain(..2);
                return Some(run);
            }
            return None;
        }
        if self.state == 1 {
            *self.tally.last_mut().unwrap() += 1;
        }
        None
    }
}

impl Default for EdgeScanState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(state: &mut ScanState, runs: &[(bool, i64)]) -> Vec<i64> {
        let mut hits = Vec::new();
        for &(active, len) in runs {
            for _ in 0..len {
                if let Some(w) = state.process(active) {
                    hits.push(w);
                }
            }
        }
        // pattern flush at end of range
        if let Some(w) = state.process(false) {
            hits.push(w);
        }
        hits
    }

    #[test]
    fn clean_one_one_four_pattern() {
        let mut s = ScanState::new(ScanRatio::OneOneFour);
        let hits = feed(
            &mut s,
            &[
                (false, 10),
                (true, 7),
                (false, 7),
                (true, 26),
                (false, 7),
                (true, 7),
            ],
        );
        assert_eq!(hits, vec![54]);
    }

    #[test]
    fn ratio_violations_are_rejected() {
        // center only 2x the outer runs
        let mut s = ScanState::new(ScanRatio::OneOneFour);
        let hits = feed(
            &mut s,
            &[
                (false, 10),
                (true, 10),
                (false, 10),
                (true, 20),
                (false, 10),
                (true, 10),
            ],
        );
        assert!(hits.is_empty());
    }

    #[test]
    fn one_two_two_pattern() {
        let mut s = ScanState::new(ScanRatio::OneTwoTwo);
        let hits = feed(
            &mut s,
            &[
                (false, 5),
                (true, 7),
                (false, 13),
                (true, 14),
                (false, 13),
                (true, 7),
            ],
        );
        assert_eq!(hits, vec![7 + 13 + 14 + 13 + 7]);
    }

    #[test]
    fn window_slides_over_repeated_patterns() {
        // two overlapping patterns: the second reuses the tail of the first
        let mut s = ScanState::new(ScanRatio::OneOneFour);
        let hits = feed(
            &mut s,
            &[
                (false, 3),
                (true, 5),
                (false, 5),
                (true, 20),
                (false, 5),
                (true, 5),
                (false, 5),
                (true, 20),
                (false, 5),
                (true, 5),
            ],
        );
        assert_eq!(hits, vec![40, 40]);
    }

    #[test]
    fn edge_state_measures_active_runs() {
        let mut s = EdgeScanState::new();
        let mut hits = Vec::new();
        for &(active, len) in &[(false, 4), (true, 6), (false, 2), (true, 3), (false, 1)] {
            for _ in 0..len as usize {
                if let Some(run) = s.process(active) {
                    hits.push(run);
                }
            }
        }
        assert_eq!(hits, vec![6, 3]);
    }
}
