//! Drift Detector — periodic comparison of specification intent against
//! repository reality, per grid cell.
//!
//! Intent strength comes from keyword mentions in the specification and
//! pipeline-communications documents; reality strength from recent commit
//! counts and source line totals under the cell's repository paths. Both are
//! clipped to `[0, 1]` against fixed calibration bounds, and the signed
//! difference classifies the cell's drift direction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use sovereign_capture::ShellExecutor;
use sovereign_core::config::DriftConfig;
use sovereign_core::gateway::ChatGateway;

use crate::cells::{Cell, CELLS};

/// Intent calibration: mentions that saturate the signal.
const INTENT_MENTIONS_CAL: f64 = 30.0;
/// Reality calibration bounds.
const REALITY_COMMITS_CAL: f64 = 20.0;
const REALITY_LINES_CAL: f64 = 2_000.0;
/// Intent/reality differences inside this band count as aligned.
const DEADBAND: f64 = 0.15;
/// Below this, a signal is considered cold.
const COLD_THRESHOLD: f64 = 0.10;

/// Source file extensions counted toward reality line totals.
const SOURCE_EXTENSIONS: [&str; 6] = ["rs", "toml", "md", "ts", "js", "py"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftDirection {
    SpecAhead,
    RepoAhead,
    Aligned,
    BothCold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellDrift {
    pub cell: String,
    pub label: String,
    pub intent: f64,
    pub reality: f64,
    /// Absolute difference of the two strengths.
    pub drift: f64,
    pub direction: DriftDirection,
    pub intent_active: bool,
    pub commit_count: usize,
    pub file_count: usize,
    pub total_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSignal {
    pub generated_at: DateTime<Utc>,
    pub cells: Vec<CellDrift>,
    pub average_drift: f64,
    /// Focus-needed cells (spec ahead with active intent), worst first.
    pub hot_cells: Vec<String>,
    pub cold_cells: Vec<String>,
    pub recommendation: String,
}

pub struct DriftDetector {
    config: DriftConfig,
    shell: Arc<dyn ShellExecutor>,
}

impl DriftDetector {
    pub fn new(config: DriftConfig, shell: Arc<dyn ShellExecutor>) -> Self {
        Self { config, shell }
    }

    /// One full sweep over all 12 cells.
    pub async fn detect(&self) -> DriftSignal {
        let spec_text = read_doc(self.config.spec_doc.as_deref());
        let comms_text = read_doc(self.config.comms_doc.as_deref());

        let mut cells = Vec::with_capacity(CELLS.len());
        for cell in &CELLS {
            cells.push(self.measure_cell(cell, &spec_text, &comms_text).await);
        }

        let average_drift = cells.iter().map(|c| c.drift).sum::<f64>() / cells.len() as f64;

        let mut hot: Vec<&CellDrift> = cells
            .iter()
            .filter(|c| c.direction == DriftDirection::SpecAhead && c.intent_active)
            .collect();
        hot.sort_by(|a, b| b.drift.total_cmp(&a.drift));
        let hot_cells: Vec<String> = hot.iter().map(|c| c.cell.clone()).collect();

        let cold_cells: Vec<String> = cells
            .iter()
            .filter(|c| c.direction == DriftDirection::BothCold)
            .map(|c| c.cell.clone())
            .collect();

        let recommendation = match hot.first() {
            Some(top) => format!(
                "Focus on {} ({}): specification is ahead of the repository by {:.2}",
                top.cell, top.label, top.drift
            ),
            None => "No focus needed: no active cell has its specification ahead".to_string(),
        };

        DriftSignal {
            generated_at: Utc::now(),
            cells,
            average_drift,
            hot_cells,
            cold_cells,
            recommendation,
        }
    }

    async fn measure_cell(&self, cell: &Cell, spec_text: &str, comms_text: &str) -> CellDrift {
        let mentions =
            count_mentions(spec_text, cell.keywords) + count_mentions(comms_text, cell.keywords);
        let intent = intent_strength(mentions);

        let (mut commit_count, mut file_count, mut total_lines) = (0usize, 0usize, 0usize);
        if let Some(root) = self.config.repo_root.as_deref() {
            for rel in cell.repo_paths {
                commit_count += self.commits_for_path(root, rel).await;
                let (files, lines) = scan_path(Path::new(root), rel);
                file_count += files;
                total_lines += lines;
            }
        }
        let reality = reality_strength(commit_count, total_lines);

        let direction = classify(intent, reality);
        debug!(cell = cell.id, intent, reality, ?direction, "cell measured");

        CellDrift {
            cell: cell.id.to_string(),
            label: cell.label.to_string(),
            intent,
            reality,
            drift: (intent - reality).abs(),
            direction,
            intent_active: intent >= COLD_THRESHOLD,
            commit_count,
            file_count,
            total_lines,
        }
    }

    /// Commits touching `rel` in the recent window; 0 on any git failure.
    async fn commits_for_path(&self, root: &str, rel: &str) -> usize {
        let cmd = format!(
            "git -C '{root}' rev-list --count --since=7.days HEAD -- '{rel}'"
        );
        match self.shell.exec(&cmd).await {
            Ok(out) if out.exit_code == 0 => out.stdout.trim().parse().unwrap_or(0),
            Ok(out) => {
                debug!(rel, stderr = %out.stderr.trim(), "git rev-list failed");
                0
            }
            Err(e) => {
                debug!(rel, error = %e, "git rev-list errored");
                0
            }
        }
    }

    /// Periodic loop: post each sweep's recommendation to `channel` (when
    /// bound) until shutdown. Disabled when the configured interval is 0.
    pub async fn run(
        self: Arc<Self>,
        gateway: Arc<dyn ChatGateway>,
        channel: Option<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if self.config.interval_ms == 0 {
            info!("drift detector disabled (interval 0)");
            return;
        }
        info!(interval_ms = self.config.interval_ms, "drift detector started");
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.interval_ms));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let signal = self.detect().await;
                    if let Some(channel_id) = &channel {
                        let text = format!(
                            "📐 Drift sweep: average {:.2}, hot [{}], cold [{}]\n{}",
                            signal.average_drift,
                            signal.hot_cells.join(", "),
                            signal.cold_cells.join(", "),
                            signal.recommendation,
                        );
                        if let Err(e) = gateway.send_to_channel(channel_id, &text).await {
                            warn!(error = %e, "drift report post failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("drift detector shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn read_doc(path: Option<&str>) -> String {
    match path {
        Some(p) => fs::read_to_string(p).unwrap_or_default(),
        None => String::new(),
    }
}

/// Case-insensitive, non-overlapping occurrence count across all keywords.
fn count_mentions(text: &str, keywords: &[&str]) -> usize {
    if text.is_empty() {
        return 0;
    }
    let lower = text.to_lowercase();
    keywords
        .iter()
        .map(|kw| lower.matches(&kw.to_lowercase()).count())
        .sum()
}

fn intent_strength(mentions: usize) -> f64 {
    (mentions as f64 / INTENT_MENTIONS_CAL).min(1.0)
}

fn reality_strength(commits: usize, lines: usize) -> f64 {
    0.6 * (commits as f64 / REALITY_COMMITS_CAL).min(1.0)
        + 0.4 * (lines as f64 / REALITY_LINES_CAL).min(1.0)
}

fn classify(intent: f64, reality: f64) -> DriftDirection {
    if intent < COLD_THRESHOLD && reality < COLD_THRESHOLD {
        DriftDirection::BothCold
    } else if intent - reality > DEADBAND {
        DriftDirection::SpecAhead
    } else if reality - intent > DEADBAND {
        DriftDirection::RepoAhead
    } else {
        DriftDirection::Aligned
    }
}

/// Count source files and lines under `<root>/<rel>`.
fn scan_path(root: &Path, rel: &str) -> (usize, usize) {
    let dir = root.join(rel);
    if !dir.exists() {
        return (0, 0);
    }
    let mut files = 0usize;
    let mut lines = 0usize;
    for entry in WalkDir::new(&dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let is_source = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));
        if !is_source {
            continue;
        }
        files += 1;
        if let Ok(contents) = fs::read_to_string(entry.path()) {
            lines += contents.lines().count();
        }
    }
    (files, lines)
}
