//! Transparency Reporter — surfaces denials, trust-debt spikes, and periodic
//! summaries on one dedicated channel.
//!
//! A missing chat binding silently no-ops every operation; the engine keeps
//! running with transparency dark rather than failing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sovereign_core::config::TransparencyConfig;
use sovereign_core::gateway::ChatGateway;

/// History is trimmed back to this many spikes...
const HISTORY_KEEP: usize = 500;
/// ...once it grows to this many.
const HISTORY_TRIM_AT: usize = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustDebtSpike {
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub delta: f64,
    pub previous_score: f64,
    pub new_score: f64,
    pub source: String,
    pub details: String,
}

pub struct TransparencyReporter {
    config: TransparencyConfig,
    gateway: Arc<dyn ChatGateway>,
    /// The transparency channel; `None` disables all posting.
    channel: Option<String>,
    history: Mutex<Vec<TrustDebtSpike>>,
    last_summary_at: Mutex<DateTime<Utc>>,
    stop: CancellationToken,
}

impl TransparencyReporter {
    pub fn new(
        config: TransparencyConfig,
        gateway: Arc<dyn ChatGateway>,
        channel: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            gateway,
            channel,
            history: Mutex::new(Vec::new()),
            last_summary_at: Mutex::new(Utc::now()),
            stop: CancellationToken::new(),
        })
    }

    /// Post a structured denial notice immediately.
    pub async fn record_denial(&self, author: &str, room: &str, reason: &str) {
        let Some(channel) = &self.channel else {
            debug!("denial not posted: no transparency channel bound");
            return;
        };
        let text = format!("🚫 Denied: {author} in #{room} — {reason}");
        if let Err(e) = self.gateway.send_to_channel(channel, &text).await {
            warn!(error = %e, "denial post failed");
        }
    }

    /// Record a spike in the history buffer, posting it only when its delta
    /// magnitude reaches the configured threshold.
    pub async fn record_spike(&self, spike: TrustDebtSpike) {
        let significant = spike.delta.abs() >= self.config.spike_threshold;
        {
            let mut history = self.history.lock().unwrap();
            history.push(spike.clone());
            if history.len() >= HISTORY_TRIM_AT {
                let drop = history.len() - HISTORY_KEEP;
                history.drain(..drop);
                debug!(kept = HISTORY_KEEP, "spike history trimmed");
            }
        }

        if !significant {
            return;
        }
        let Some(channel) = &self.channel else {
            return;
        };
        let text = format!(
            "⚡ Trust-debt spike in {}: Δ{:+.1} ({:.1} → {:.1}) via {}\n{}",
            spike.category,
            spike.delta,
            spike.previous_score,
            spike.new_score,
            spike.source,
            spike.details,
        );
        if let Err(e) = self.gateway.send_to_channel(channel, &text).await {
            warn!(error = %e, "spike post failed");
        }
    }

    pub fn spike_history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    /// Spawn the periodic summary loop. Disabled when the interval is 0.
    pub fn start(self: &Arc<Self>) {
        if self.config.report_interval_ms == 0 {
            info!("periodic transparency summary disabled (interval 0)");
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(this.config.report_interval_ms));
            // The first tick of a tokio interval fires immediately; skip it
            // so the first summary covers a full window.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => this.periodic_summary().await,
                    _ = this.stop.cancelled() => {
                        info!("transparency summary loop stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Aggregate spikes recorded since the previous summary and post the
    /// digest, only if any were recorded.
    pub async fn periodic_summary(&self) {
        let since = {
            let mut last = self.last_summary_at.lock().unwrap();
            let since = *last;
            *last = Utc::now();
            since
        };
        let window: Vec<TrustDebtSpike> = self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.timestamp >= since)
            .cloned()
            .collect();

        let Some(text) = summarize(&window) else {
            debug!("no spikes in window, summary skipped");
            return;
        };
        let Some(channel) = &self.channel else {
            return;
        };
        if let Err(e) = self.gateway.send_to_channel(channel, &text).await {
            warn!(error = %e, "summary post failed");
        }
    }

    /// Cancel the periodic summary loop.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

/// Group spikes by category, sort by absolute net delta, and render the
/// digest. `None` when the window is empty.
fn summarize(spikes: &[TrustDebtSpike]) -> Option<String> {
    if spikes.is_empty() {
        return None;
    }

    let mut by_category: HashMap<&str, (f64, usize)> = HashMap::new();
    for spike in spikes {
        let entry = by_category.entry(spike.category.as_str()).or_default();
        entry.0 += spike.delta;
        entry.1 += 1;
    }

    let mut rows: Vec<(&str, f64, usize)> = by_category
        .into_iter()
        .map(|(category, (net, count))| (category, net, count))
        .collect();
    rows.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()).then_with(|| a.0.cmp(b.0)));

    let mut text = format!("📊 Trust-debt summary — {} spike(s)\n", spikes.len());
    for (category, net, count) in rows {
        text.push_str(&format!("• {category}: net Δ{net:+.1} across {count}\n"));
    }
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sovereign_core::Result;

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatGateway for RecordingGateway {
        async fn send_to_channel(&self, _c: &str, text: &str) -> Result<Option<String>> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(None)
        }
        async fn edit_message(&self, _c: &str, _m: &str, _t: &str) -> Result<()> {
            Ok(())
        }
        async fn add_reaction(&self, _c: &str, _m: &str, _e: &str) -> Result<()> {
            Ok(())
        }
        async fn send_file(&self, _c: &str, _b: Vec<u8>, _f: &str) -> Result<()> {
            Ok(())
        }
        async fn ensure_category(&self, _g: &str, n: &str) -> Result<String> {
            Ok(n.to_string())
        }
        async fn ensure_text_channel(&self, _g: &str, n: &str, _c: &str) -> Result<String> {
            Ok(n.to_string())
        }
    }

    fn spike(category: &str, delta: f64) -> TrustDebtSpike {
        TrustDebtSpike {
            timestamp: Utc::now(),
            category: category.to_string(),
            delta,
            previous_score: 50.0,
            new_score: 50.0 + delta,
            source: "commit-scan".to_string(),
            details: "unit".to_string(),
        }
    }

    fn reporter(threshold: f64, channel: Option<&str>) -> (Arc<TransparencyReporter>, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::default());
        let reporter = TransparencyReporter::new(
            TransparencyConfig {
                spike_threshold: threshold,
                report_interval_ms: 0,
            },
            Arc::clone(&gateway) as Arc<dyn ChatGateway>,
            channel.map(str::to_string),
        );
        (reporter, gateway)
    }

    #[tokio::test]
    async fn denial_posts_immediately() {
        let (reporter, gateway) = reporter(5.0, Some("trust"));
        reporter.record_denial("guest", "rio", "not authorized").await;
        let sent = gateway.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("guest"));
        assert!(sent[0].contains("#rio"));
    }

    #[tokio::test]
    async fn spikes_post_only_at_threshold() {
        let (reporter, gateway) = reporter(5.0, Some("trust"));

        reporter.record_spike(spike("hygiene", 2.0)).await;
        assert!(gateway.sent.lock().unwrap().is_empty());

        reporter.record_spike(spike("hygiene", -6.5)).await;
        let sent = gateway.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Δ-6.5"));

        assert_eq!(reporter.spike_history_len(), 2);
    }

    #[tokio::test]
    async fn history_trims_to_last_500_at_1000() {
        let (reporter, _gateway) = reporter(1_000.0, Some("trust"));
        for i in 0..1_000 {
            reporter.record_spike(spike("bulk", i as f64 / 100.0)).await;
        }
        assert_eq!(reporter.spike_history_len(), HISTORY_KEEP);
    }

    #[tokio::test]
    async fn summary_groups_and_sorts_by_net_delta() {
        let (reporter, gateway) = reporter(1_000.0, Some("trust"));
        reporter.record_spike(spike("small", 1.0)).await;
        reporter.record_spike(spike("big", -4.0)).await;
        reporter.record_spike(spike("big", -3.0)).await;

        reporter.periodic_summary().await;

        let sent = gateway.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let big_pos = sent[0].find("big").unwrap();
        let small_pos = sent[0].find("small").unwrap();
        assert!(big_pos < small_pos, "categories not sorted by |net|");
        assert!(sent[0].contains("Δ-7.0"));
        assert!(sent[0].contains("3 spike(s)"));
    }

    #[tokio::test]
    async fn empty_window_posts_nothing() {
        let (reporter, gateway) = reporter(5.0, Some("trust"));
        reporter.periodic_summary().await;
        assert!(gateway.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_binding_is_a_silent_noop() {
        let (reporter, gateway) = reporter(0.0, None);
        reporter.record_denial("a", "rio", "r").await;
        reporter.record_spike(spike("cat", 50.0)).await;
        reporter.periodic_summary().await;
        assert!(gateway.sent.lock().unwrap().is_empty());
        assert_eq!(reporter.spike_history_len(), 1);
    }
}
