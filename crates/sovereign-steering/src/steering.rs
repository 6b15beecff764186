use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sovereign_core::config::SteeringConfig;
use sovereign_core::gateway::ChatGateway;
use sovereign_core::types::Tier;

use crate::prediction::{Prediction, PredictionStatus};

/// Executes a prediction's prompt. Returns whether execution succeeded;
/// `false` marks the prediction aborted.
#[async_trait]
pub trait PredictionExecutor: Send + Sync {
    async fn execute(&self, prediction: &Prediction) -> bool;
}

/// Supplies the current sovereignty score in `[0, 1]`.
pub trait SovereigntySource: Send + Sync {
    fn current(&self) -> f64;
}

/// Countdown length for a given sovereignty score.
pub fn sovereignty_timeout_ms(score: f64) -> u64 {
    if score >= 0.8 {
        5_000
    } else if score >= 0.6 {
        30_000
    } else {
        60_000
    }
}

struct Entry {
    prediction: Prediction,
    /// Non-null only while the prediction is pending.
    timer: Option<CancellationToken>,
    /// Set while the executor callback is running, for grace-window logging.
    executing_since: Option<Instant>,
}

/// Ask-and-Predict steering: one pending prediction per room, advanced by
/// timers, redirects, and admin blessings. Latest signal wins.
pub struct SteeringLoop {
    config: SteeringConfig,
    gateway: Arc<dyn ChatGateway>,
    executor: Arc<dyn PredictionExecutor>,
    sovereignty: Option<Arc<dyn SovereigntySource>>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl SteeringLoop {
    pub fn new(
        config: SteeringConfig,
        gateway: Arc<dyn ChatGateway>,
        executor: Arc<dyn PredictionExecutor>,
        sovereignty: Option<Arc<dyn SovereigntySource>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            gateway,
            executor,
            sovereignty,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Decide how a classified message executes: instantly (admin), after a
    /// countdown (trusted), or only as a suggestion (general).
    pub async fn handle_message(
        self: &Arc<Self>,
        tier: Tier,
        room: &str,
        channel_id: &str,
        prompt: &str,
        author: &str,
        categories: Vec<String>,
    ) -> Prediction {
        match tier {
            Tier::Admin => self.execute_instantly(room, channel_id, prompt, author, categories).await,
            Tier::Trusted => {
                self.schedule_countdown(room, channel_id, prompt, author, categories)
                    .await
            }
            Tier::General => {
                self.post_suggestion(room, channel_id, prompt, author, categories)
                    .await
            }
        }
    }

    async fn execute_instantly(
        &self,
        room: &str,
        channel_id: &str,
        prompt: &str,
        author: &str,
        categories: Vec<String>,
    ) -> Prediction {
        let mut prediction =
            Prediction::new(room, channel_id, prompt, Tier::Admin, author, categories, 0);
        prediction.status = PredictionStatus::Executing;
        info!(room, author, "admin request executing immediately");

        let ok = self.executor.execute(&prediction).await;
        prediction.status = if ok {
            PredictionStatus::Completed
        } else {
            PredictionStatus::Aborted
        };
        prediction
    }

    async fn schedule_countdown(
        self: &Arc<Self>,
        room: &str,
        channel_id: &str,
        prompt: &str,
        author: &str,
        categories: Vec<String>,
    ) -> Prediction {
        let timeout_ms = self.compute_timeout();
        let mut prediction = Prediction::new(
            room,
            channel_id,
            prompt,
            Tier::Trusted,
            author,
            categories,
            timeout_ms,
        );

        let text = format!(
            "🔮 Planned: {}\nAligned: {}\nProceeding in {} s unless redirected.",
            prediction.predicted_action,
            join_categories(&prediction.aligned_categories),
            timeout_ms / 1_000,
        );
        match self.gateway.send_to_channel(channel_id, &text).await {
            Ok(message_id) => prediction.message_id = message_id,
            Err(e) => warn!(room, error = %e, "countdown post failed"),
        }

        let token = CancellationToken::new();
        self.insert_entry(prediction.clone(), Some(token.clone()));

        let this = Arc::clone(self);
        let fire_room = room.to_string();
        let fire_id = prediction.id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(room = %fire_room, "countdown cancelled");
                }
                _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                    this.fire(&fire_room, &fire_id).await;
                }
            }
        });

        prediction
    }

    async fn post_suggestion(
        self: &Arc<Self>,
        room: &str,
        channel_id: &str,
        prompt: &str,
        author: &str,
        categories: Vec<String>,
    ) -> Prediction {
        let mut prediction = Prediction::new(
            room,
            channel_id,
            prompt,
            Tier::General,
            author,
            categories,
            0,
        );

        let text = format!(
            "💡 {author} suggests: {}\nAn admin reaction is required to execute.",
            prediction.predicted_action
        );
        match self.gateway.send_to_channel(channel_id, &text).await {
            Ok(message_id) => prediction.message_id = message_id,
            Err(e) => warn!(room, error = %e, "suggestion post failed"),
        }

        self.insert_entry(prediction.clone(), None);
        prediction
    }

    /// Timer expiry: if the prediction is still pending, announce and run it.
    async fn fire(self: &Arc<Self>, room: &str, prediction_id: &str) {
        let prediction = {
            let mut entries = self.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(room) else {
                return;
            };
            if entry.prediction.id != prediction_id
                || entry.prediction.status != PredictionStatus::Pending
            {
                // A redirect, bless, or abort won the race.
                return;
            }
            entry.prediction.status = PredictionStatus::Executing;
            entry.timer = None;
            entry.executing_since = Some(Instant::now());
            entry.prediction.clone()
        };

        if let Some(message_id) = &prediction.message_id {
            let _ = self
                .gateway
                .edit_message(
                    &prediction.channel_id,
                    message_id,
                    "⚙️ executing — no intervention received",
                )
                .await;
        }

        info!(room, id = %prediction.id, "prediction auto-executing");
        let ok = self.executor.execute(&prediction).await;
        self.finish_execution(room, prediction_id, ok);
    }

    /// Record the executor outcome and drop the entry from the index.
    fn finish_execution(&self, room: &str, prediction_id: &str, ok: bool) {
        let mut entries = self.entries.lock().unwrap();
        let matches = entries
            .get(room)
            .is_some_and(|e| e.prediction.id == prediction_id);
        if matches {
            if let Some(mut entry) = entries.remove(room) {
                entry.prediction.status = if ok {
                    PredictionStatus::Completed
                } else {
                    PredictionStatus::Aborted
                };
            }
        }
    }

    /// Supersede the room's pending prediction with a new prompt. Returns the
    /// new prediction, or `None` when the room has nothing pending.
    pub async fn redirect(
        self: &Arc<Self>,
        room: &str,
        new_prompt: &str,
        source: &str,
    ) -> Option<Prediction> {
        let old = {
            let mut entries = self.entries.lock().unwrap();
            let pending = entries
                .get(room)
                .is_some_and(|e| e.prediction.status == PredictionStatus::Pending);
            if pending {
                let mut entry = entries.remove(room)?;
                if let Some(token) = entry.timer.take() {
                    token.cancel();
                }
                entry.prediction.status = PredictionStatus::Redirected;
                entry.prediction.abort_reason = Some(format!(
                    "Redirected by {source}: {}",
                    prefix(new_prompt, 80)
                ));
                Some(entry.prediction)
            } else {
                // The timer fired first; once execution has begun the
                // redirect observes a non-pending status and is a no-op.
                if let Some(entry) = entries.get(room) {
                    let within_grace = entry.executing_since.is_some_and(|t| {
                        t.elapsed() < Duration::from_millis(self.config.redirect_grace_period_ms)
                    });
                    warn!(
                        room,
                        source,
                        within_grace,
                        status = ?entry.prediction.status,
                        "redirect lost the race to the timer"
                    );
                }
                None
            }
        };
        let old = old?;

        if let Some(message_id) = &old.message_id {
            let reason = old.abort_reason.as_deref().unwrap_or("Redirected");
            let _ = self
                .gateway
                .edit_message(&old.channel_id, message_id, &format!("↪️ {reason}"))
                .await;
        }

        info!(room, source, "prediction redirected");
        let new = self
            .handle_message(
                old.tier,
                room,
                &old.channel_id,
                new_prompt,
                &old.author,
                old.aligned_categories.clone(),
            )
            .await;
        Some(new)
    }

    /// Execute a general-tier suggestion after an admin reaction. Returns
    /// whether a matching pending suggestion was found.
    pub async fn admin_bless(self: &Arc<Self>, message_id: &str, admin_username: &str) -> bool {
        let prediction = {
            let mut entries = self.entries.lock().unwrap();
            let room = entries
                .iter()
                .find(|(_, e)| {
                    e.prediction.tier == Tier::General
                        && e.prediction.status == PredictionStatus::Pending
                        && e.prediction.message_id.as_deref() == Some(message_id)
                })
                .map(|(room, _)| room.clone());
            let Some(entry) = room.and_then(|room| entries.get_mut(&room)) else {
                return false;
            };
            if let Some(token) = entry.timer.take() {
                token.cancel();
            }
            entry.prediction.status = PredictionStatus::Executing;
            entry.executing_since = Some(Instant::now());
            entry.prediction.clone()
        };

        let _ = self
            .gateway
            .edit_message(
                &prediction.channel_id,
                message_id,
                &format!("✅ Blessed by {admin_username} — executing."),
            )
            .await;

        info!(room = %prediction.room, admin = admin_username, "suggestion blessed");
        let ok = self.executor.execute(&prediction).await;
        self.finish_execution(&prediction.room, &prediction.id, ok);
        true
    }

    /// Emergency stop: cancel every pending timer, mark all pending
    /// predictions aborted, clear the index. Returns the aborted count.
    pub fn abort_all(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let mut aborted = 0;
        for entry in entries.values_mut() {
            if entry.prediction.status == PredictionStatus::Pending {
                if let Some(token) = entry.timer.take() {
                    token.cancel();
                }
                entry.prediction.status = PredictionStatus::Aborted;
                entry.prediction.abort_reason = Some("Emergency stop".to_string());
                aborted += 1;
            }
        }
        entries.clear();
        info!(aborted, "all predictions aborted");
        aborted
    }

    pub fn get_active_predictions(&self) -> Vec<Prediction> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.prediction.status == PredictionStatus::Pending)
            .map(|e| e.prediction.clone())
            .collect()
    }

    /// Whether the room is currently gated by a pending prediction.
    pub fn has_pending_prediction(&self, room: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(room)
            .is_some_and(|e| e.prediction.status == PredictionStatus::Pending)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn compute_timeout(&self) -> u64 {
        if !self.config.use_sovereignty_timeouts {
            return self.config.ask_predict_timeout_ms;
        }
        match &self.sovereignty {
            Some(source) => sovereignty_timeout_ms(source.current()),
            None => self.config.ask_predict_timeout_ms,
        }
    }

    fn insert_entry(&self, prediction: Prediction, timer: Option<CancellationToken>) {
        let mut entries = self.entries.lock().unwrap();

        let pending = entries
            .values()
            .filter(|e| e.prediction.status == PredictionStatus::Pending)
            .count();
        if pending >= self.config.max_concurrent_predictions {
            // Soft limit: warn but accept.
            warn!(
                pending,
                max = self.config.max_concurrent_predictions,
                "pending prediction limit exceeded"
            );
        }

        if let Some(previous) = entries.get_mut(&prediction.room) {
            if previous.prediction.status == PredictionStatus::Pending {
                warn!(room = %prediction.room, "superseding an existing pending prediction");
                if let Some(token) = previous.timer.take() {
                    token.cancel();
                }
            }
        }

        entries.insert(
            prediction.room.clone(),
            Entry {
                prediction,
                timer,
                executing_since: None,
            },
        );
    }
}

fn join_categories(categories: &[String]) -> String {
    if categories.is_empty() {
        "none".to_string()
    } else {
        categories.join(", ")
    }
}

fn prefix(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        s.to_string()
    } else {
        s.chars().take(n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sovereign_core::Result;

    // -- fixtures ----------------------------------------------------------

    #[derive(Default)]
    struct CountingExecutor {
        executed: Mutex<Vec<String>>,
        succeed: bool,
    }

    impl CountingExecutor {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                executed: Mutex::new(Vec::new()),
                succeed: true,
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PredictionExecutor for CountingExecutor {
        async fn execute(&self, prediction: &Prediction) -> bool {
            self.executed
                .lock()
                .unwrap()
                .push(prediction.prompt.clone());
            self.succeed
        }
    }

    struct FixedSovereignty(f64);
    impl SovereigntySource for FixedSovereignty {
        fn current(&self) -> f64 {
            self.0
        }
    }

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<String>>,
        edits: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatGateway for RecordingGateway {
        async fn send_to_channel(&self, _c: &str, text: &str) -> Result<Option<String>> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(text.to_string());
            Ok(Some(format!("msg-{}", sent.len())))
        }
        async fn edit_message(&self, _c: &str, _m: &str, text: &str) -> Result<()> {
            self.edits.lock().unwrap().push(text.to_string());
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

    fn steering(
        sovereignty: Option<f64>,
        executor: Arc<CountingExecutor>,
        gateway: Arc<RecordingGateway>,
    ) -> Arc<SteeringLoop> {
        let config = SteeringConfig {
            ask_predict_timeout_ms: 30_000,
            redirect_grace_period_ms: 10_000,
            max_concurrent_predictions: 5,
            use_sovereignty_timeouts: sovereignty.is_some(),
        };
        SteeringLoop::new(
            config,
            gateway as Arc<dyn ChatGateway>,
            executor as Arc<dyn PredictionExecutor>,
            sovereignty.map(|s| Arc::new(FixedSovereignty(s)) as Arc<dyn SovereigntySource>),
        )
    }

    // -- timeout tiers -----------------------------------------------------

    #[test]
    fn sovereignty_timeout_tiers() {
        assert_eq!(sovereignty_timeout_ms(0.85), 5_000);
        assert_eq!(sovereignty_timeout_ms(0.8), 5_000);
        assert_eq!(sovereignty_timeout_ms(0.7), 30_000);
        assert_eq!(sovereignty_timeout_ms(0.6), 30_000);
        assert_eq!(sovereignty_timeout_ms(0.3), 60_000);
    }

    // -- scenarios ---------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn trusted_auto_executes_at_5s_when_sovereignty_high() {
        let executor = CountingExecutor::succeeding();
        let gateway = Arc::new(RecordingGateway::default());
        let loop_ = steering(Some(0.85), Arc::clone(&executor), Arc::clone(&gateway));

        let prediction = loop_
            .handle_message(Tier::Trusted, "rio", "chan", "deploy it", "ana", vec![])
            .await;
        assert_eq!(prediction.timeout_ms, 5_000);
        assert_eq!(prediction.status, PredictionStatus::Pending);
        assert!(loop_.has_pending_prediction("rio"));
        assert!(executor.prompts().is_empty());

        tokio::time::sleep(Duration::from_millis(5_100)).await;

        assert_eq!(executor.prompts(), vec!["deploy it".to_string()]);
        assert!(!loop_.has_pending_prediction("rio"));
        let edits = gateway.edits.lock().unwrap();
        assert!(edits.iter().any(|e| e.contains("no intervention received")));
    }

    #[tokio::test(start_paused = true)]
    async fn redirect_before_timer_supersedes() {
        let executor = CountingExecutor::succeeding();
        let gateway = Arc::new(RecordingGateway::default());
        let loop_ = steering(Some(0.85), Arc::clone(&executor), Arc::clone(&gateway));

        loop_
            .handle_message(Tier::Trusted, "rio", "chan", "old plan", "ana", vec![])
            .await;

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        let new = loop_.redirect("rio", "new plan", "text").await.unwrap();
        assert_eq!(new.prompt, "new plan");
        assert_eq!(new.status, PredictionStatus::Pending);
        assert!(loop_.has_pending_prediction("rio"));

        // The old countdown message now carries the redirect reason.
        let edits = gateway.edits.lock().unwrap().clone();
        assert!(edits
            .iter()
            .any(|e| e.contains("Redirected by text: new plan")));

        // Past the old deadline: the old timer must not fire.
        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert!(executor.prompts().is_empty());

        // The replacement fires on its own countdown.
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(executor.prompts(), vec!["new plan".to_string()]);
    }

    #[tokio::test]
    async fn redirect_without_pending_returns_none() {
        let executor = CountingExecutor::succeeding();
        let gateway = Arc::new(RecordingGateway::default());
        let loop_ = steering(None, executor, gateway);
        assert!(loop_.redirect("rio", "plan", "text").await.is_none());
    }

    #[tokio::test]
    async fn admin_executes_immediately_without_posting() {
        let executor = CountingExecutor::succeeding();
        let gateway = Arc::new(RecordingGateway::default());
        let loop_ = steering(None, Arc::clone(&executor), Arc::clone(&gateway));

        let prediction = loop_
            .handle_message(Tier::Admin, "rio", "chan", "restart service", "op", vec![])
            .await;

        assert_eq!(prediction.status, PredictionStatus::Completed);
        assert_eq!(executor.prompts(), vec!["restart service".to_string()]);
        assert!(gateway.sent.lock().unwrap().is_empty());
        assert!(!loop_.has_pending_prediction("rio"));
    }

    #[tokio::test(start_paused = true)]
    async fn general_suggestion_waits_for_bless() {
        let executor = CountingExecutor::succeeding();
        let gateway = Arc::new(RecordingGateway::default());
        let loop_ = steering(None, Arc::clone(&executor), Arc::clone(&gateway));

        let prediction = loop_
            .handle_message(Tier::General, "rio", "chan", "run tests", "guest", vec![])
            .await;
        let message_id = prediction.message_id.clone().unwrap();

        // No timer: nothing happens no matter how long we wait.
        tokio::time::sleep(Duration::from_millis(120_000)).await;
        assert!(executor.prompts().is_empty());
        assert!(loop_.has_pending_prediction("rio"));

        assert!(!loop_.admin_bless("msg-unknown", "op").await);
        assert!(loop_.admin_bless(&message_id, "op").await);
        assert_eq!(executor.prompts(), vec!["run tests".to_string()]);
        assert!(!loop_.has_pending_prediction("rio"));

        let edits = gateway.edits.lock().unwrap();
        assert!(edits.iter().any(|e| e.contains("Blessed by op")));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_all_cancels_every_pending_timer() {
        let executor = CountingExecutor::succeeding();
        let gateway = Arc::new(RecordingGateway::default());
        let loop_ = steering(Some(0.85), Arc::clone(&executor), gateway);

        loop_
            .handle_message(Tier::Trusted, "rio", "chan", "a", "ana", vec![])
            .await;
        loop_
            .handle_message(Tier::Trusted, "kitty", "chan", "b", "ana", vec![])
            .await;

        assert_eq!(loop_.abort_all(), 2);
        assert!(loop_.get_active_predictions().is_empty());

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert!(executor.prompts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_limit_is_soft() {
        let executor = CountingExecutor::succeeding();
        let gateway = Arc::new(RecordingGateway::default());
        let config = SteeringConfig {
            ask_predict_timeout_ms: 30_000,
            redirect_grace_period_ms: 10_000,
            max_concurrent_predictions: 1,
            use_sovereignty_timeouts: false,
        };
        let loop_ = SteeringLoop::new(
            config,
            gateway as Arc<dyn ChatGateway>,
            executor as Arc<dyn PredictionExecutor>,
            None,
        );

        loop_
            .handle_message(Tier::Trusted, "rio", "chan", "a", "ana", vec![])
            .await;
        loop_
            .handle_message(Tier::Trusted, "kitty", "chan", "b", "ana", vec![])
            .await;

        assert!(loop_.has_pending_prediction("rio"));
        assert!(loop_.has_pending_prediction("kitty"));
        assert_eq!(loop_.get_active_predictions().len(), 2);
    }
}
