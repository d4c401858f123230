//! Finder-pattern scanning for captured photographs.

mod anchor;
mod geometry;
mod scanner;
mod state;

pub use anchor::Anchor;
pub use geometry::{Midpoints, Point, calculate_midpoints, line_intersection};
pub use scanner::{Alignment, Scanner};
pub use state::{EdgeScanState, ScanRatio, ScanState};
