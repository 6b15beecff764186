//! Fixed 3×4 ASCII rendering of the pressure board.

use std::collections::HashMap;

use crate::cells::{RowName, CELLS};
use crate::pressure::CellPressure;

/// Indicator for a cell's heat: cold below 0.3, warm below 0.7, hot above.
fn indicator(pressure: f64) -> &'static str {
    if pressure < 0.3 {
        "🔵"
    } else if pressure < 0.7 {
        "🟡"
    } else {
        "🔴"
    }
}

/// Render the 12-cell board with box-drawing borders, one row of four cells
/// per grid row, each cell showing its id, indicator, pressure, and label.
pub fn render_board(pressures: &HashMap<String, CellPressure>) -> String {
    const CELL_WIDTH: usize = 18;
    let horizontal = "─".repeat(CELL_WIDTH);

    let mut out = String::new();
    out.push_str(&format!(
        "┌{h}┬{h}┬{h}┬{h}┐\n",
        h = horizontal
    ));

    let rows = [RowName::Strategy, RowName::Tactics, RowName::Operations];
    for (i, row) in rows.iter().enumerate() {
        out.push_str("│");
        for cell in CELLS.iter().filter(|c| c.row == *row) {
            let pressure = pressures
                .get(cell.id)
                .map(|p| p.pressure)
                .unwrap_or(0.0);
            let body = format!(
                " {} {} {:.2} {}",
                cell.id,
                indicator(pressure),
                pressure,
                cell.label
            );
            out.push_str(&pad(&body, CELL_WIDTH));
            out.push('│');
        }
        out.push_str(&format!("  {row}\n"));

        if i + 1 < rows.len() {
            out.push_str(&format!(
                "├{h}┼{h}┼{h}┼{h}┤\n",
                h = horizontal
            ));
        }
    }

    out.push_str(&format!(
        "└{h}┴{h}┴{h}┴{h}┘\n",
        h = horizontal
    ));
    out
}

/// Pad to `width` display columns, counting the two-column emoji indicator.
fn pad(s: &str, width: usize) -> String {
    let cols = s.chars().count() + 1; // emoji renders double-width
    if cols >= width {
        s.to_string()
    } else {
        format!("{s}{}", " ".repeat(width - cols))
    }
}
