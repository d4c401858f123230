/// Cumulative sub-pixel sampling offset for a tile, clamped to a small box.
///
/// Decoding a warped photograph leaves residual misalignment that grows as
/// we move away from the anchors; each decoded tile reports the offset that
/// matched best and its neighbors start sampling from there.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellDrift {
    pub x: i32,
    pub y: i32,
}

impl CellDrift {
    /// Sampling offsets tried around the drifted anchor point, best-guess
    /// first: center, then axis-aligned, then diagonals.
    pub const PAIRS: [(i32, i32); 9] = [
        (0, 0),
        (1, 0),
        (0, 1),
        (-1, 0),
        (0, -1),
        (1, 1),
        (-1, -1),
        (1, -1),
        (-1, 1),
    ];

    const LIMIT: i32 = 7;

    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self {
            x: Self::clamp(x),
            y: Self::clamp(y),
        }
    }

    pub fn update(&mut self, dx: i32, dy: i32) {
        self.x = Self::clamp(self.x + dx);
        self.y = Self::clamp(self.y + dy);
    }

    const fn clamp(v: i32) -> i32 {
        if v > Self::LIMIT {
            Self::LIMIT
        } else if v < -Self::LIMIT {
            -Self::LIMIT
        } else {
            v
        }
    }
}
