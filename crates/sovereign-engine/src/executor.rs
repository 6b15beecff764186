//! Turns an approved prediction into a journalled task dispatched at the
//! room's terminal.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use sovereign_capture::RoomCapture;
use sovereign_core::gateway::ChatGateway;
use sovereign_core::types::{TaskPatch, TaskStatus};
use sovereign_journal::TaskJournal;
use sovereign_registry::RoomRegistry;
use sovereign_steering::{Prediction, PredictionExecutor};

pub struct TaskExecutor {
    journal: Arc<TaskJournal>,
    capture: Arc<dyn RoomCapture>,
    registry: Arc<RoomRegistry>,
    gateway: Arc<dyn ChatGateway>,
}

impl TaskExecutor {
    pub fn new(
        journal: Arc<TaskJournal>,
        capture: Arc<dyn RoomCapture>,
        registry: Arc<RoomRegistry>,
        gateway: Arc<dyn ChatGateway>,
    ) -> Self {
        Self {
            journal,
            capture,
            registry,
            gateway,
        }
    }
}

/// Prefix the prompt with the room's rolling context so the terminal session
/// picks up where the last task left off.
fn compose_dispatch(context: &str, prompt: &str) -> String {
    if context.trim().is_empty() {
        prompt.to_string()
    } else {
        format!("Previous context:\n{}\n---\n{prompt}", context.trim_end())
    }
}

#[async_trait]
impl PredictionExecutor for TaskExecutor {
    async fn execute(&self, prediction: &Prediction) -> bool {
        let room = &prediction.room;

        // One active task per room, ever.
        if let Some(running) = self.journal.running_for_room(room) {
            warn!(room, running = %running.id, "dispatch refused: room busy");
            let _ = self
                .gateway
                .send_to_channel(
                    &prediction.channel_id,
                    &format!("⏳ Task {} is still active in {room}; try again later.", running.id),
                )
                .await;
            return false;
        }

        // Snapshot the terminal before typing so the poller's first delta is
        // exactly the new output.
        let snapshot = self.capture.capture_with_delta(room, "").await;

        let task = self
            .journal
            .create(room, &prediction.channel_id, &prediction.prompt);
        self.journal.set_baseline(&task.id, &snapshot.content);

        let dispatch_text =
            compose_dispatch(&self.registry.get_room_context(room), &prediction.prompt);
        if let Err(e) = self.capture.dispatch(room, &dispatch_text).await {
            warn!(room, task = %task.id, error = %e, "dispatch failed");
            self.journal.update_status(&task.id, TaskStatus::Failed, None);
            let _ = self
                .gateway
                .send_to_channel(
                    &prediction.channel_id,
                    &format!("❌ Task {} — dispatch to {room} failed", task.id),
                )
                .await;
            return false;
        }

        self.journal.update_status(
            &task.id,
            TaskStatus::Dispatched,
            Some(TaskPatch {
                dispatched_at: Some(Utc::now()),
                ..Default::default()
            }),
        );

        match self
            .gateway
            .send_to_channel(
                &prediction.channel_id,
                &format!("📤 Task {} dispatched to {room}", task.id),
            )
            .await
        {
            Ok(Some(message_id)) => self.journal.set_discord_message_id(&task.id, &message_id),
            Ok(None) => {}
            Err(e) => warn!(task = %task.id, error = %e, "dispatch notice failed"),
        }

        info!(room, task = %task.id, "task dispatched");
        true
    }
}
