//! Task Journal — durable task records with an append-only JSONL journal and
//! crash replay.
//!
//! The in-memory map is authoritative for the running process; journal writes
//! are best-effort and replay tolerates malformed lines. All mutations funnel
//! through this component (single-writer by convention).

mod journal;

pub use journal::TaskJournal;
