//! Shared data types: tasks, tiers, and the terminal IPC backend set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Free-form metadata carried on tasks and events. Ordered so journal lines
/// are byte-stable across replays.
pub type Metadata = BTreeMap<String, Value>;

/// Generate a short opaque id (8 hex chars) for tasks and drafts.
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Execution tier of a chat author, resolved by the Handle Authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Authorized handle with instant-execute rights in the target room.
    Admin,
    /// Authorized handle without instant rights, or configured confirm-first.
    Trusted,
    /// Any other author.
    General,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Admin => write!(f, "admin"),
            Tier::Trusted => write!(f, "trusted"),
            Tier::General => write!(f, "general"),
        }
    }
}

// ---------------------------------------------------------------------------
// IpcBackend
// ---------------------------------------------------------------------------

/// Closed set of terminal IPC mechanisms a room can be bound to.
///
/// Only `SystemEvents` contends for the clipboard arbiter; every other
/// backend reads the terminal buffer without focus or clipboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IpcBackend {
    Iterm,
    Terminal,
    Kitty,
    Wezterm,
    SystemEvents,
}

impl fmt::Display for IpcBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IpcBackend::Iterm => "iterm",
            IpcBackend::Terminal => "terminal",
            IpcBackend::Kitty => "kitty",
            IpcBackend::Wezterm => "wezterm",
            IpcBackend::SystemEvents => "system-events",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// TaskStatus / Task
// ---------------------------------------------------------------------------

/// Lifecycle state of a dispatched unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Dispatched,
    Running,
    Complete,
    Failed,
    Timeout,
    Killed,
}

impl TaskStatus {
    /// A terminal status never transitions again and carries `completed_at`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Killed
        )
    }

    /// Dispatched or running: the at-most-one-per-room window.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Dispatched | TaskStatus::Running)
    }

    /// Emoji used in the task-result header posted back to the channel.
    pub fn emoji(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "⏳",
            TaskStatus::Dispatched => "📤",
            TaskStatus::Running => "⚙️",
            TaskStatus::Complete => "✅",
            TaskStatus::Failed => "❌",
            TaskStatus::Timeout => "⏰",
            TaskStatus::Killed => "🛑",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Dispatched => "dispatched",
            TaskStatus::Running => "running",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Killed => "killed",
        };
        write!(f, "{s}")
    }
}

/// Unit of work dispatched to one cognitive room.
///
/// Created by the steering loop (or the admin path), mutated only by the
/// poller after dispatch, destroyed only by external archival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub room: String,
    pub channel_id: String,
    /// Verbatim user text.
    pub prompt: String,
    pub status: TaskStatus,
    /// Accumulated captured terminal output.
    #[serde(default)]
    pub output: String,
    /// Last full snapshot used for delta computation.
    #[serde(default)]
    pub baseline: String,
    #[serde(default)]
    pub last_output_length: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Reply handle the poster edits when the task completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Task {
    pub fn new(room: impl Into<String>, channel_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: short_id(),
            room: room.into(),
            channel_id: channel_id.into(),
            prompt: prompt.into(),
            status: TaskStatus::Pending,
            output: String::new(),
            baseline: String::new(),
            last_output_length: 0,
            created_at: Utc::now(),
            dispatched_at: None,
            last_output_at: None,
            completed_at: None,
            discord_message_id: None,
            metadata: Metadata::new(),
        }
    }
}

/// Partial task overlay carried by journal `update` records.
///
/// Every field is optional; absent fields leave the task untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_message_id: Option<String>,
}

impl TaskPatch {
    /// Overlay this patch onto `task`, leaving absent fields untouched.
    pub fn apply(&self, task: &mut Task) {
        if let Some(output) = &self.output {
            task.output = output.clone();
        }
        if let Some(baseline) = &self.baseline {
            task.baseline = baseline.clone();
        }
        if let Some(len) = self.last_output_length {
            task.last_output_length = len;
        }
        if let Some(ts) = self.dispatched_at {
            task.dispatched_at = Some(ts);
        }
        if let Some(ts) = self.last_output_at {
            task.last_output_at = Some(ts);
        }
        if let Some(ts) = self.completed_at {
            task.completed_at = Some(ts);
        }
        if let Some(id) = &self.discord_message_id {
            task.discord_message_id = Some(id.clone());
        }
    }
}
