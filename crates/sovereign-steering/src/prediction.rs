use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sovereign_core::types::{short_id, Tier};

/// How much of the prompt is surfaced as the predicted action.
const ACTION_PREFIX_LEN: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Pending,
    Executing,
    Aborted,
    Redirected,
    Completed,
}

/// A scheduled auto-execution or pending suggestion for one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub room: String,
    pub channel_id: String,
    pub prompt: String,
    pub tier: Tier,
    pub author: String,
    /// Prompt prefix shown in the countdown post.
    pub predicted_action: String,
    pub aligned_categories: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub timeout_ms: u64,
    pub status: PredictionStatus,
    /// Handle to the user-visible countdown/suggestion post.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

impl Prediction {
    pub fn new(
        room: &str,
        channel_id: &str,
        prompt: &str,
        tier: Tier,
        author: &str,
        aligned_categories: Vec<String>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            id: short_id(),
            room: room.to_string(),
            channel_id: channel_id.to_string(),
            prompt: prompt.to_string(),
            tier,
            author: author.to_string(),
            predicted_action: action_prefix(prompt),
            aligned_categories,
            created_at: Utc::now(),
            timeout_ms,
            status: PredictionStatus::Pending,
            message_id: None,
            abort_reason: None,
        }
    }
}

/// First `ACTION_PREFIX_LEN` characters of the prompt, on a char boundary.
fn action_prefix(prompt: &str) -> String {
    if prompt.chars().count() <= ACTION_PREFIX_LEN {
        prompt.to_string()
    } else {
        let prefix: String = prompt.chars().take(ACTION_PREFIX_LEN).collect();
        format!("{prefix}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_prefix_truncates_long_prompts() {
        let short = Prediction::new("rio", "c", "ls", Tier::Trusted, "ana", vec![], 5_000);
        assert_eq!(short.predicted_action, "ls");

        let long_prompt = "x".repeat(200);
        let long = Prediction::new("rio", "c", &long_prompt, Tier::Trusted, "ana", vec![], 5_000);
        assert_eq!(long.predicted_action.chars().count(), 81);
        assert!(long.predicted_action.ends_with('…'));
    }
}
