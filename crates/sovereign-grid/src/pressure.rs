//! Time-weighted pressure accumulation and hot-cell routing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::cells::{cell, CELLS};
use crate::events::{GridEvent, GridEventLog};

/// Derived per-cell pressure snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellPressure {
    /// Normalized score in `[0, 1]`; the hottest cell is exactly `1.0`.
    pub pressure: f64,
    pub event_count: usize,
    pub last_event_ts: Option<DateTime<Utc>>,
}

/// Routing recommendation derived from a set of hot cells.
#[derive(Debug, Clone)]
pub struct RoomRecommendation {
    pub room: String,
    pub total_pressure: f64,
    pub explanation: String,
}

/// 12-cell pressure accumulator backed by the grid event journal.
pub struct PressureGrid {
    log: Arc<GridEventLog>,
    snapshot: Mutex<HashMap<String, CellPressure>>,
}

impl PressureGrid {
    pub fn new(log: Arc<GridEventLog>) -> Self {
        let snapshot = CELLS
            .iter()
            .map(|c| (c.id.to_string(), CellPressure::default()))
            .collect();
        Self {
            log,
            snapshot: Mutex::new(snapshot),
        }
    }

    /// Recompute every cell's pressure from the last 24 h of events.
    pub fn update(&self) {
        let now = Utc::now();
        let events = self.log.events_since(now - Duration::hours(24));
        let fresh = compute_pressures(&events, now);
        debug!(events = events.len(), "pressure grid updated");
        *self.snapshot.lock().unwrap() = fresh;
    }

    pub fn pressures(&self) -> HashMap<String, CellPressure> {
        self.snapshot.lock().unwrap().clone()
    }

    pub fn pressure_of(&self, cell_id: &str) -> f64 {
        self.snapshot
            .lock()
            .unwrap()
            .get(cell_id)
            .map(|p| p.pressure)
            .unwrap_or(0.0)
    }

    /// Cell ids at or above `threshold`, hottest first.
    pub fn hot_cells(&self, threshold: f64) -> Vec<String> {
        let snapshot = self.snapshot.lock().unwrap();
        let mut hot: Vec<(&String, f64)> = snapshot
            .iter()
            .filter(|(_, p)| p.pressure >= threshold)
            .map(|(id, p)| (id, p.pressure))
            .collect();
        hot.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        hot.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Recommend the room with the highest total pressure across `hot`.
    pub fn route_to_room(&self, hot: &[String]) -> RoomRecommendation {
        if hot.is_empty() {
            return RoomRecommendation {
                room: "#general".to_string(),
                total_pressure: 0.0,
                explanation: "no hot cells; defaulting to #general".to_string(),
            };
        }

        let snapshot = self.snapshot.lock().unwrap();
        let mut per_room: HashMap<&str, (f64, Vec<&str>)> = HashMap::new();
        for id in hot {
            let Some(cell) = cell(id) else { continue };
            let pressure = snapshot.get(id).map(|p| p.pressure).unwrap_or(0.0);
            let entry = per_room.entry(cell.room).or_default();
            entry.0 += pressure;
            entry.1.push(cell.id);
        }

        let mut rooms: Vec<(&str, (f64, Vec<&str>))> = per_room.into_iter().collect();
        rooms.sort_by(|a, b| b.1 .0.total_cmp(&a.1 .0).then_with(|| a.0.cmp(b.0)));

        match rooms.into_iter().next() {
            Some((room, (total, cells))) => RoomRecommendation {
                room: room.to_string(),
                total_pressure: total,
                explanation: format!(
                    "room {room} carries {total:.2} total pressure from cells {}",
                    cells.join(", ")
                ),
            },
            None => RoomRecommendation {
                room: "#general".to_string(),
                total_pressure: 0.0,
                explanation: "hot cells did not resolve to known rooms".to_string(),
            },
        }
    }
}

/// Weight an event by age: 1.0 within 1 h, 0.5 within 6 h, 0.2 within 24 h,
/// discarded beyond that.
fn time_weight(age: Duration) -> Option<f64> {
    if age <= Duration::hours(1) {
        Some(1.0)
    } else if age <= Duration::hours(6) {
        Some(0.5)
    } else if age <= Duration::hours(24) {
        Some(0.2)
    } else {
        None
    }
}

/// Score each cell by summed time-weights, then normalize by the maximum so
/// the hottest cell is exactly 1.0 (or everything is 0.0).
pub(crate) fn compute_pressures(
    events: &[GridEvent],
    now: DateTime<Utc>,
) -> HashMap<String, CellPressure> {
    let mut raw: HashMap<String, (f64, usize, Option<DateTime<Utc>>)> = CELLS
        .iter()
        .map(|c| (c.id.to_string(), (0.0, 0, None)))
        .collect();

    for event in events {
        let Some(weight) = time_weight(now - event.timestamp) else {
            continue;
        };
        let Some(entry) = raw.get_mut(&event.cell) else {
            continue;
        };
        entry.0 += weight;
        entry.1 += 1;
        entry.2 = match entry.2 {
            Some(prev) if prev >= event.timestamp => Some(prev),
            _ => Some(event.timestamp),
        };
    }

    let max = raw.values().map(|(score, _, _)| *score).fold(0.0, f64::max);

    raw.into_iter()
        .map(|(id, (score, count, last))| {
            let pressure = if max > 0.0 { score / max } else { 0.0 };
            (
                id,
                CellPressure {
                    pressure,
                    event_count: count,
                    last_event_ts: last,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::GridEventType;
    use sovereign_core::types::Metadata;
    use tempfile::TempDir;

    fn event(cell: &str, age: Duration, now: DateTime<Utc>) -> GridEvent {
        GridEvent {
            timestamp: now - age,
            kind: GridEventType::PressureUpdate,
            cell: cell.to_string(),
            phase: None,
            task: None,
            intersection: None,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn normalizes_hottest_cell_to_exactly_one() {
        let now = Utc::now();
        let mut events = Vec::new();
        for _ in 0..5 {
            events.push(event("A1", Duration::minutes(10), now));
        }
        for _ in 0..2 {
            events.push(event("B2", Duration::minutes(10), now));
        }

        let pressures = compute_pressures(&events, now);
        assert_eq!(pressures["A1"].pressure, 1.0);
        assert!((pressures["B2"].pressure - 0.4).abs() < 1e-9);
        for (id, p) in &pressures {
            if id != "A1" && id != "B2" {
                assert_eq!(p.pressure, 0.0);
            }
            assert!((0.0..=1.0).contains(&p.pressure));
        }
        assert_eq!(pressures["A1"].event_count, 5);
    }

    #[test]
    fn empty_event_window_is_all_zero() {
        let pressures = compute_pressures(&[], Utc::now());
        assert!(pressures.values().all(|p| p.pressure == 0.0));
        assert_eq!(pressures.len(), 12);
    }

    #[test]
    fn weights_decay_with_age() {
        let now = Utc::now();
        let events = vec![
            event("A1", Duration::minutes(30), now),  // 1.0
            event("B2", Duration::hours(3), now),     // 0.5
            event("C3", Duration::hours(12), now),    // 0.2
            event("C4", Duration::hours(30), now),    // discarded
        ];
        let pressures = compute_pressures(&events, now);
        assert_eq!(pressures["A1"].pressure, 1.0);
        assert_eq!(pressures["B2"].pressure, 0.5);
        assert_eq!(pressures["C3"].pressure, 0.2);
        assert_eq!(pressures["C4"].pressure, 0.0);
        assert_eq!(pressures["C4"].event_count, 0);
    }

    #[test]
    fn hot_cells_sorted_descending() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(GridEventLog::open(dir.path()).unwrap());
        for _ in 0..5 {
            log.emit_for_cell(GridEventType::PressureUpdate, "A1", None, None, Metadata::new());
        }
        for _ in 0..2 {
            log.emit_for_cell(GridEventType::PressureUpdate, "B2", None, None, Metadata::new());
        }

        let grid = PressureGrid::new(log);
        grid.update();

        assert_eq!(grid.hot_cells(0.5), vec!["A1".to_string()]);
        assert_eq!(
            grid.hot_cells(0.3),
            vec!["A1".to_string(), "B2".to_string()]
        );
    }

    #[test]
    fn routing_follows_highest_room_total() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(GridEventLog::open(dir.path()).unwrap());
        // A1 and C2 both bind room "rio"; B2 binds "wezterm".
        for _ in 0..3 {
            log.emit_for_cell(GridEventType::PressureUpdate, "A1", None, None, Metadata::new());
        }
        for _ in 0..3 {
            log.emit_for_cell(GridEventType::PressureUpdate, "C2", None, None, Metadata::new());
        }
        for _ in 0..3 {
            log.emit_for_cell(GridEventType::PressureUpdate, "B2", None, None, Metadata::new());
        }

        let grid = PressureGrid::new(log);
        grid.update();

        let hot = grid.hot_cells(0.7);
        let rec = grid.route_to_room(&hot);
        assert_eq!(rec.room, "rio");
        assert!(rec.total_pressure > 1.0);
        assert!(rec.explanation.contains("rio"));
    }

    #[test]
    fn empty_hot_set_routes_to_general() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(GridEventLog::open(dir.path()).unwrap());
        let grid = PressureGrid::new(log);
        let rec = grid.route_to_room(&[]);
        assert_eq!(rec.room, "#general");
        assert_eq!(rec.total_pressure, 0.0);
    }
}
