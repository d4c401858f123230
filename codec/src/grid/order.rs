use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::drift::CellDrift;
use super::positions::AdjacentCellFinder;

/// A lazy, finite walk over the grid's tiles.
///
/// Callers must invoke [`DecodeOrder::update`] after decoding each element;
/// the iterator uses the reported offset and error to steer what comes next.
pub trait DecodeOrder {
    fn next(&mut self) -> Option<(usize, (u32, u32), CellDrift)>;
    fn update(&mut self, dx: i32, dy: i32, error_distance: u32);
}

/// Emission-order iteration with a single shared drift.
pub struct LinearDecodeOrder {
    positions: Vec<(u32, u32)>,
    index: usize,
    drift: CellDrift,
}

impl LinearDecodeOrder {
    #[must_use]
    pub fn new(positions: Vec<(u32, u32)>) -> Self {
        Self {
            positions,
            index: 0,
            drift: CellDrift::default(),
        }
    }
}

impl DecodeOrder for LinearDecodeOrder {
    fn next(&mut self) -> Option<(usize, (u32, u32), CellDrift)> {
        let i = self.index;
        let pos = *self.positions.get(i)?;
        self.index += 1;
        Some((i, pos, self.drift))
    }

    fn update(&mut self, dx: i32, dy: i32, _error_distance: u32) {
        self.drift.update(dx, dy);
    }
}

struct Instruction {
    error_distance: u32,
    index: usize,
    drift: CellDrift,
}

impl Ord for Instruction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.error_distance, self.index).cmp(&(other.error_distance, other.index))
    }
}

impl PartialOrd for Instruction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for Instruction {}

/// Flood-fill decode order.
///
/// A min-heap keyed on the reporting cell's error distance, seeded with the
/// four grid corners at zero drift. Decoding fans out from clean regions
/// into noisier ones, and every cell inherits the freshest local drift
/// estimate from whichever neighbor reached it first with the least error.
pub struct FloodDecodeOrder {
    finder: AdjacentCellFinder,
    heap: BinaryHeap<Reverse<Instruction>>,
    visited: Vec<bool>,
    most_recent: usize,
    current_drift: CellDrift,
}

impl FloodDecodeOrder {
    #[must_use]
    pub fn new(finder: AdjacentCellFinder) -> Self {
        let count = finder.len();
        let mut order = Self {
            finder,
            heap: BinaryHeap::new(),
            visited: vec![false; count],
            most_recent: 0,
            current_drift: CellDrift::default(),
        };
        for index in order.corner_seeds() {
            order.heap.push(Reverse(Instruction {
                error_distance: 0,
                index,
                drift: CellDrift::default(),
            }));
        }
        order
    }

    /// The four cells nearest the grid corners: first cell, end of the top
    /// strip's first row, first cell of the last row, last cell.
    fn corner_seeds(&self) -> [usize; 4] {
        let count = self.finder.len();
        // the strip rows share a y until the first wrap
        let mut width = 1;
        while width < count && self.finder.position(width).1 == self.finder.position(0).1 {
            width += 1;
        }
        [0, width - 1, count - width, count - 1]
    }
}

impl DecodeOrder for FloodDecodeOrder {
    fn next(&mut self) -> Option<(usize, (u32, u32), CellDrift)> {
        loop {
            let Reverse(instr) = self.heap.pop()?;
            if self.visited[instr.index] {
                continue;
            }
            self.visited[instr.index] = true;
            self.most_recent = instr.index;
            self.current_drift = instr.drift;
            return Some((instr.index, self.finder.position(instr.index), instr.drift));
        }
    }

    fn update(&mut self, dx: i32, dy: i32, error_distance: u32) {
        let mut drift = self.current_drift;
        drift.update(dx, dy);
        for i in self.finder.find_adjacent(self.most_recent) {
            if !self.visited[i] {
                self.heap.push(Reverse(Instruction {
                    error_distance,
                    index: i,
                    drift,
                }));
            }
        }
    }
}
