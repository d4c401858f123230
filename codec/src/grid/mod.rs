//! Tile grid layout and decode iteration order.

mod drift;
mod order;
mod positions;

pub use drift::CellDrift;
pub use order::{DecodeOrder, FloodDecodeOrder, LinearDecodeOrder};
pub use positions::{AdjacentCellFinder, CellPositions, cell_positions};
