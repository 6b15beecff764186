//! Pressure Grid — a fixed 12-cell board (3 rows × 4 columns) that
//! accumulates time-weighted pressure from grid events, routes attention to
//! the hottest room, and periodically measures specification/repository
//! drift per cell.

mod cells;
mod drift;
mod events;
mod pressure;
mod render;

pub use cells::{cell, cell_for_phase, intersection_tag, Cell, RowName, CELLS};
pub use drift::{CellDrift, DriftDetector, DriftDirection, DriftSignal};
pub use events::{GridEvent, GridEventLog, GridEventType};
pub use pressure::{CellPressure, PressureGrid, RoomRecommendation};
pub use render::render_board;
