//! Append-only grid event journal (`grid-events.jsonl`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use sovereign_core::types::Metadata;

use crate::cells::{cell, cell_for_phase};

const EVENTS_FILE: &str = "grid-events.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GridEventType {
    PointerCreate,
    PressureUpdate,
    CellActivate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: GridEventType,
    pub cell: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intersection: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// Single-writer append-only event log. Emissions are best-effort; reads
/// tolerate malformed lines.
pub struct GridEventLog {
    path: PathBuf,
}

impl GridEventLog {
    pub fn open(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(EVENTS_FILE),
        })
    }

    /// Classify by external phase number. Invalid phases emit nothing.
    pub fn emit_for_phase(
        &self,
        kind: GridEventType,
        phase: u32,
        task: Option<String>,
        metadata: Metadata,
    ) -> Option<GridEvent> {
        let cell_id = match cell_for_phase(phase) {
            Some(id) => id,
            None => {
                debug!(phase, "no cell bound to phase, event dropped");
                return None;
            }
        };
        let event = GridEvent {
            timestamp: Utc::now(),
            kind,
            cell: cell_id.to_string(),
            phase: Some(phase),
            task,
            intersection: None,
            metadata,
        };
        self.append(&event);
        Some(event)
    }

    /// Classify by caller-chosen cell id. Unknown cells emit nothing.
    pub fn emit_for_cell(
        &self,
        kind: GridEventType,
        cell_id: &str,
        task: Option<String>,
        intersection: Option<String>,
        metadata: Metadata,
    ) -> Option<GridEvent> {
        if cell(cell_id).is_none() {
            warn!(cell = cell_id, "unknown cell, event dropped");
            return None;
        }
        let event = GridEvent {
            timestamp: Utc::now(),
            kind,
            cell: cell_id.to_string(),
            phase: None,
            task,
            intersection,
            metadata,
        };
        self.append(&event);
        Some(event)
    }

    /// All events at or after `cutoff`, oldest first.
    pub fn events_since(&self, cutoff: DateTime<Utc>) -> Vec<GridEvent> {
        let Ok(file) = fs::File::open(&self.path) else {
            return Vec::new();
        };
        BufReader::new(file)
            .lines()
            .map_while(|l| l.ok())
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str::<GridEvent>(&l) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "malformed grid event skipped");
                    None
                }
            })
            .filter(|e| e.timestamp >= cutoff)
            .collect()
    }

    fn append(&self, event: &GridEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "grid event serialization failed");
                return;
            }
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            warn!(error = %e, "grid event append failed");
        }
    }
}
