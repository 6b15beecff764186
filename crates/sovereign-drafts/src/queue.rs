use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use sovereign_core::config::DraftsConfig;
use sovereign_core::gateway::ChatGateway;
use sovereign_core::types::short_id;

use crate::llm::DraftBrain;

/// Hard cap on a staged draft, ellipsis included.
pub const DRAFT_MAX_CHARS: usize = 200;
/// Hard cap on a composed tweet.
pub const TWEET_MAX_CHARS: usize = 280;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftOrigin {
    Command,
    Scheduler,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetDraft {
    pub id: String,
    pub text: String,
    pub topic: String,
    pub origin: DraftOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_message_id: Option<String>,
    pub char_count: usize,
    /// Prior texts, oldest first.
    #[serde(default)]
    pub rewrite_history: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// External publish step (browser automation lives behind this seam).
#[async_trait]
pub trait TweetPublisher: Send + Sync {
    async fn publish(&self, text: &str) -> bool;
}

struct QueueState {
    /// Keyed by the staging message id.
    drafts: HashMap<String, TweetDraft>,
    posted_today: u32,
    day: NaiveDate,
}

/// Outbound drafts staged for admin approval on the staging channel.
pub struct DraftQueue {
    config: DraftsConfig,
    brain: Arc<dyn DraftBrain>,
    gateway: Arc<dyn ChatGateway>,
    staging_channel: Option<String>,
    state: Mutex<QueueState>,
}

impl DraftQueue {
    pub fn new(
        config: DraftsConfig,
        brain: Arc<dyn DraftBrain>,
        gateway: Arc<dyn ChatGateway>,
        staging_channel: Option<String>,
    ) -> Self {
        Self {
            config,
            brain,
            gateway,
            staging_channel,
            state: Mutex::new(QueueState {
                drafts: HashMap::new(),
                posted_today: 0,
                day: Utc::now().date_naive(),
            }),
        }
    }

    /// Whether the calendar-day post budget still has room. Rolling into a
    /// new day resets the counter.
    pub fn can_post(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let today = Utc::now().date_naive();
        if state.day != today {
            state.day = today;
            state.posted_today = 0;
        }
        state.posted_today < self.config.max_daily_posts
    }

    /// Draft a post for `topic` and stage it for approval. Returns `None`
    /// when rate-limited, when the LLM yields nothing, or when staging fails.
    pub async fn create_draft(&self, topic: &str, origin: DraftOrigin) -> Option<TweetDraft> {
        if !self.can_post() {
            warn!(topic, "draft skipped: daily post budget exhausted");
            return None;
        }

        let prompt = format!(
            "Write one short, punchy post (under 180 characters) about: {topic}. \
             No hashtags, no preamble, just the post text."
        );
        let raw = self.brain.draft(&prompt).await;
        let text = truncate_chars(raw.trim(), DRAFT_MAX_CHARS);
        if text.is_empty() {
            warn!(topic, "draft skipped: empty LLM response");
            return None;
        }

        let mut draft = TweetDraft {
            id: short_id(),
            char_count: text.chars().count(),
            text,
            topic: topic.to_string(),
            origin,
            discord_message_id: None,
            rewrite_history: Vec::new(),
            created_at: Utc::now(),
        };

        let Some(channel) = &self.staging_channel else {
            warn!("draft dropped: no staging channel bound");
            return None;
        };
        let staging = format!(
            "📝 Draft {} — {}\n\n{}\n\n{} / {DRAFT_MAX_CHARS} characters\nReact 👍 to publish, 🗑 to discard, reply with feedback to rewrite.",
            draft.id, draft.topic, draft.text, draft.char_count,
        );
        match self.gateway.send_to_channel(channel, &staging).await {
            Ok(Some(message_id)) => {
                draft.discord_message_id = Some(message_id.clone());
                self.state
                    .lock()
                    .unwrap()
                    .drafts
                    .insert(message_id, draft.clone());
                info!(id = %draft.id, topic, "draft staged");
                Some(draft)
            }
            Ok(None) => {
                warn!(id = %draft.id, "staging post returned no message id, draft dropped");
                None
            }
            Err(e) => {
                warn!(id = %draft.id, error = %e, "staging post failed, draft dropped");
                None
            }
        }
    }

    /// Replace a staged draft's text after feedback, keeping the old text in
    /// the rewrite history and editing the staging message in place.
    pub async fn update_draft(
        &self,
        message_id: &str,
        new_text: &str,
        feedback: &str,
    ) -> Option<TweetDraft> {
        let draft = {
            let mut state = self.state.lock().unwrap();
            let draft = state.drafts.get_mut(message_id)?;
            draft.rewrite_history.push(draft.text.clone());
            draft.text = truncate_chars(new_text.trim(), DRAFT_MAX_CHARS);
            draft.char_count = draft.text.chars().count();
            draft.clone()
        };

        if let Some(channel) = &self.staging_channel {
            let staging = format!(
                "📝 Draft {} — {} (rewrite {} after: {feedback})\n\n{}\n\n{} / {DRAFT_MAX_CHARS} characters\nReact 👍 to publish, 🗑 to discard, reply with feedback to rewrite.",
                draft.id,
                draft.topic,
                draft.rewrite_history.len(),
                draft.text,
                draft.char_count,
            );
            if let Err(e) = self.gateway.edit_message(channel, message_id, &staging).await {
                warn!(id = %draft.id, error = %e, "staging edit failed");
            }
        }
        Some(draft)
    }

    /// Redraft through the LLM using reviewer feedback, then swap the text in
    /// via [`update_draft`](Self::update_draft). `None` when the draft is
    /// unknown or the LLM yields nothing.
    pub async fn rewrite_with_feedback(
        &self,
        message_id: &str,
        feedback: &str,
    ) -> Option<TweetDraft> {
        let current = self.find_draft_by_message_id(message_id)?;
        let prompt = format!(
            "Rewrite this post based on the feedback. Keep it under 180 characters, \
             return only the new text.\n\nPost: {}\nFeedback: {feedback}",
            current.text
        );
        let raw = self.brain.draft(&prompt).await;
        let new_text = raw.trim();
        if new_text.is_empty() {
            warn!(id = %current.id, "rewrite skipped: empty LLM response");
            return None;
        }
        self.update_draft(message_id, new_text, feedback).await
    }

    pub fn find_draft_by_message_id(&self, message_id: &str) -> Option<TweetDraft> {
        self.state.lock().unwrap().drafts.get(message_id).cloned()
    }

    pub fn get_pending_drafts(&self) -> Vec<TweetDraft> {
        let mut drafts: Vec<TweetDraft> =
            self.state.lock().unwrap().drafts.values().cloned().collect();
        drafts.sort_by_key(|d| d.created_at);
        drafts
    }

    pub fn remove_draft(&self, message_id: &str) -> Option<TweetDraft> {
        self.state.lock().unwrap().drafts.remove(message_id)
    }

    /// Count a publication against the daily budget and retire the draft.
    pub fn mark_posted(&self, message_id: &str) -> Option<TweetDraft> {
        let mut state = self.state.lock().unwrap();
        let draft = state.drafts.remove(message_id)?;
        state.posted_today += 1;
        info!(id = %draft.id, posted_today = state.posted_today, "draft marked posted");
        Some(draft)
    }
}

/// The published form of a draft: the text plus its topic tag, clamped to
/// the tweet limit.
pub fn compose_tweet(draft: &TweetDraft) -> String {
    let tag = draft
        .topic
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase();
    let tweet = if tag.is_empty() {
        draft.text.clone()
    } else {
        format!("{} #{tag}", draft.text)
    };
    truncate_chars(&tweet, TWEET_MAX_CHARS)
}

/// Truncate to `max` characters, ellipsis included.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max - 1).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sovereign_core::Result;

    struct FixedBrain(String);

    #[async_trait]
    impl DraftBrain for FixedBrain {
        async fn draft(&self, _prompt: &str) -> String {
            self.0.clone()
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
            Ok(Some(format!("staged-{}", sent.len())))
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

    fn queue(brain: &str, max_daily: u32) -> (DraftQueue, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::default());
        let config = DraftsConfig {
            max_daily_posts: max_daily,
            ..Default::default()
        };
        let queue = DraftQueue::new(
            config,
            Arc::new(FixedBrain(brain.to_string())),
            Arc::clone(&gateway) as Arc<dyn ChatGateway>,
            Some("x-posts".to_string()),
        );
        (queue, gateway)
    }

    #[tokio::test]
    async fn staged_draft_is_truncated_and_indexed() {
        let long = "z".repeat(500);
        let (queue, gateway) = queue(&long, 5);

        let draft = queue.create_draft("shipping", DraftOrigin::Command).await.unwrap();
        assert_eq!(draft.text.chars().count(), DRAFT_MAX_CHARS);
        assert!(draft.text.ends_with('…'));
        assert_eq!(draft.char_count, DRAFT_MAX_CHARS);

        let message_id = draft.discord_message_id.clone().unwrap();
        let found = queue.find_draft_by_message_id(&message_id).unwrap();
        assert_eq!(found.id, draft.id);

        let staged = gateway.sent.lock().unwrap();
        assert!(staged[0].contains("React 👍 to publish"));
        assert!(staged[0].contains(&draft.id));
    }

    #[tokio::test]
    async fn empty_llm_response_drops_the_draft() {
        let (queue, _gateway) = queue("   ", 5);
        assert!(queue.create_draft("topic", DraftOrigin::Auto).await.is_none());
        assert!(queue.get_pending_drafts().is_empty());
    }

    #[tokio::test]
    async fn daily_budget_gates_creation() {
        let (queue, _gateway) = queue("fine post", 1);

        let draft = queue.create_draft("one", DraftOrigin::Command).await.unwrap();
        let message_id = draft.discord_message_id.unwrap();
        assert!(queue.can_post());
        queue.mark_posted(&message_id).unwrap();

        assert!(!queue.can_post());
        assert!(queue.create_draft("two", DraftOrigin::Command).await.is_none());
    }

    #[tokio::test]
    async fn rewrite_pushes_history_and_edits_staging() {
        let (queue, gateway) = queue("first version", 5);
        let draft = queue.create_draft("t", DraftOrigin::Command).await.unwrap();
        let message_id = draft.discord_message_id.unwrap();

        let updated = queue
            .update_draft(&message_id, "second version", "tighter please")
            .await
            .unwrap();
        assert_eq!(updated.text, "second version");
        assert_eq!(updated.rewrite_history, vec!["first version".to_string()]);

        let edits = gateway.edits.lock().unwrap();
        assert!(edits[0].contains("second version"));
        assert!(edits[0].contains("tighter please"));
    }

    #[tokio::test]
    async fn remove_draft_forgets_the_message() {
        let (queue, _gateway) = queue("text", 5);
        let draft = queue.create_draft("t", DraftOrigin::Scheduler).await.unwrap();
        let message_id = draft.discord_message_id.unwrap();

        assert!(queue.remove_draft(&message_id).is_some());
        assert!(queue.find_draft_by_message_id(&message_id).is_none());
        assert!(queue.remove_draft(&message_id).is_none());
    }

    #[test]
    fn composed_tweets_respect_the_280_cap() {
        let draft = TweetDraft {
            id: "d1".to_string(),
            text: "y".repeat(200),
            topic: "shipping updates".to_string(),
            origin: DraftOrigin::Auto,
            discord_message_id: None,
            char_count: 200,
            rewrite_history: Vec::new(),
            created_at: Utc::now(),
        };
        let tweet = compose_tweet(&draft);
        assert!(tweet.chars().count() <= TWEET_MAX_CHARS);
        assert!(tweet.contains("#shipping"));

        let bare = TweetDraft {
            topic: String::new(),
            ..draft
        };
        assert_eq!(compose_tweet(&bare).chars().count(), 200);
    }
}
