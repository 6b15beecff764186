//! Client for the local LLM drafting endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use sovereign_core::config::DraftsConfig;

/// Every LLM call is bounded at 30 s.
const LLM_TIMEOUT_SECS: u64 = 30;

/// Drafting seam: produce a short text for a topic prompt. Any failure
/// yields empty text; the caller drops the draft.
#[async_trait]
pub trait DraftBrain: Send + Sync {
    async fn draft(&self, prompt: &str) -> String;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// HTTP client for a local generator (`POST /api/generate`).
pub struct LocalDrafter {
    client: reqwest::Client,
    config: DraftsConfig,
}

impl LocalDrafter {
    pub fn new(config: DraftsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(LLM_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

#[async_trait]
impl DraftBrain for LocalDrafter {
    async fn draft(&self, prompt: &str) -> String {
        let url = format!("{}/api/generate", self.config.llm_base_url);
        let body = json!({
            "model": self.config.llm_model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.config.temperature,
                "num_predict": self.config.num_predict,
            },
        });

        debug!(model = %self.config.llm_model, "requesting draft");
        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "draft request failed");
                return String::new();
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "draft endpoint returned error");
            return String::new();
        }
        match response.json::<GenerateResponse>().await {
            Ok(parsed) => parsed.response,
            Err(e) => {
                warn!(error = %e, "draft response unparsable");
                String::new()
            }
        }
    }
}
