//! The fixed cell table: ids, labels, row names, bound rooms, and the
//! calibration bindings (intent keywords, repository paths) used by the
//! drift detector.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowName {
    Strategy,
    Tactics,
    Operations,
}

impl fmt::Display for RowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RowName::Strategy => "Strategy",
            RowName::Tactics => "Tactics",
            RowName::Operations => "Operations",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Cell {
    pub id: &'static str,
    pub label: &'static str,
    pub row: RowName,
    /// Cognitive room this cell routes to.
    pub room: &'static str,
    /// Keywords scanned in the spec/comms documents for intent strength.
    pub keywords: &'static [&'static str],
    /// Repository paths scanned for reality strength.
    pub repo_paths: &'static [&'static str],
}

/// 3 rows × 4 columns, row-major: A1..A4, B1..B4, C1..C4.
pub const CELLS: [Cell; 12] = [
    Cell {
        id: "A1",
        label: "vision",
        row: RowName::Strategy,
        room: "rio",
        keywords: &["vision", "intent", "purpose", "sovereign"],
        repo_paths: &["docs"],
    },
    Cell {
        id: "A2",
        label: "spec",
        row: RowName::Strategy,
        room: "cursor",
        keywords: &["spec", "requirement", "invariant", "contract"],
        repo_paths: &["docs", "crates/sovereign-core"],
    },
    Cell {
        id: "A3",
        label: "research",
        row: RowName::Strategy,
        room: "code",
        keywords: &["research", "experiment", "prototype"],
        repo_paths: &["docs"],
    },
    Cell {
        id: "A4",
        label: "narrative",
        row: RowName::Strategy,
        room: "warp",
        keywords: &["narrative", "announce", "publish"],
        repo_paths: &["crates/sovereign-drafts"],
    },
    Cell {
        id: "B1",
        label: "planning",
        row: RowName::Tactics,
        room: "kitty",
        keywords: &["plan", "roadmap", "milestone"],
        repo_paths: &["docs"],
    },
    Cell {
        id: "B2",
        label: "steering",
        row: RowName::Tactics,
        room: "wezterm",
        keywords: &["steer", "predict", "redirect", "countdown"],
        repo_paths: &["crates/sovereign-steering"],
    },
    Cell {
        id: "B3",
        label: "drafting",
        row: RowName::Tactics,
        room: "ghostty",
        keywords: &["draft", "tweet", "rewrite"],
        repo_paths: &["crates/sovereign-drafts"],
    },
    Cell {
        id: "B4",
        label: "routing",
        row: RowName::Tactics,
        room: "iterm",
        keywords: &["route", "adapter", "bridge", "channel"],
        repo_paths: &["crates/sovereign-registry"],
    },
    Cell {
        id: "C1",
        label: "execution",
        row: RowName::Operations,
        room: "terminal",
        keywords: &["execute", "dispatch", "task"],
        repo_paths: &["crates/sovereign-journal", "crates/sovereign-poller"],
    },
    Cell {
        id: "C2",
        label: "capture",
        row: RowName::Operations,
        room: "rio",
        keywords: &["capture", "terminal", "clipboard", "stabilize"],
        repo_paths: &["crates/sovereign-capture", "crates/sovereign-clipboard"],
    },
    Cell {
        id: "C3",
        label: "journal",
        row: RowName::Operations,
        room: "cursor",
        keywords: &["journal", "replay", "durable"],
        repo_paths: &["crates/sovereign-journal"],
    },
    Cell {
        id: "C4",
        label: "transparency",
        row: RowName::Operations,
        room: "code",
        keywords: &["transparency", "denial", "spike", "trust"],
        repo_paths: &["crates/sovereign-transparency"],
    },
];

/// Lookup by cell id (`A1`..`C4`).
pub fn cell(id: &str) -> Option<&'static Cell> {
    CELLS.iter().find(|c| c.id == id)
}

/// Classification table for external phase numbers: 9 phases map onto 9
/// cells; any other phase produces no emission.
pub fn cell_for_phase(phase: u32) -> Option<&'static str> {
    match phase {
        1 => Some("A1"),
        2 => Some("A2"),
        3 => Some("A3"),
        4 => Some("B1"),
        5 => Some("B2"),
        6 => Some("B3"),
        7 => Some("C1"),
        8 => Some("C2"),
        9 => Some("C3"),
        _ => None,
    }
}

/// Symbolic `<source-cell>:<target-cell>` annotation for grid events and
/// outbound messages.
pub fn intersection_tag(source: &str, target: &str) -> String {
    format!("{source}:{target}")
}
