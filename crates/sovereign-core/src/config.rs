use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::IpcBackend;

/// Environment variables that bootstrap the privileged admin external IDs.
/// Absence is not fatal; username checks still work.
pub const ENV_ADMIN_ID_PRIMARY: &str = "SOVEREIGN_ADMIN_ID_PRIMARY";
pub const ENV_ADMIN_ID_SECONDARY: &str = "SOVEREIGN_ADMIN_ID_SECONDARY";

/// Top-level config (sovereign.toml + SOVEREIGN_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SovereignConfig {
    /// Root directory for all persisted state (journals, snapshots, context).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub discord: DiscordConfig,
    #[serde(default = "default_rooms")]
    pub rooms: Vec<RoomConfig>,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub steering: SteeringConfig,
    #[serde(default)]
    pub drafts: DraftsConfig,
    #[serde(default)]
    pub transparency: TransparencyConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    /// Authorized handles loaded at startup.
    #[serde(default)]
    pub handles: Vec<HandleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: String,
    /// Guild the room channels live in.
    pub guild_id: String,
    /// Category name under which the room channels are created.
    #[serde(default = "default_category")]
    pub category: String,
}

/// One cognitive room: a named terminal window bound to an IPC backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub name: String,
    pub backend: IpcBackend,
    /// Window/tab/pane title substring used to locate the room.
    /// Defaults to the room name.
    #[serde(default)]
    pub window_hint: Option<String>,
    /// Application name for `system-events` activation (e.g. "Cursor").
    #[serde(default)]
    pub app_name: Option<String>,
}

impl RoomConfig {
    pub fn hint(&self) -> &str {
        self.window_hint.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Quiescent window after which a running task is considered stable.
    #[serde(default = "default_stabilization_ms")]
    pub stabilization_ms: u64,
    /// Timeout for each capture shell invocation.
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            task_timeout_ms: default_task_timeout_ms(),
            stabilization_ms: default_stabilization_ms(),
            capture_timeout_ms: default_capture_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteeringConfig {
    /// Countdown for trusted-tier predictions when sovereignty timeouts are off.
    #[serde(default = "default_ask_predict_timeout_ms")]
    pub ask_predict_timeout_ms: u64,
    #[serde(default = "default_redirect_grace_ms")]
    pub redirect_grace_period_ms: u64,
    /// Soft cap on simultaneously pending predictions.
    #[serde(default = "default_max_predictions")]
    pub max_concurrent_predictions: usize,
    /// When true, the countdown length is derived from the sovereignty score.
    #[serde(default)]
    pub use_sovereignty_timeouts: bool,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            ask_predict_timeout_ms: default_ask_predict_timeout_ms(),
            redirect_grace_period_ms: default_redirect_grace_ms(),
            max_concurrent_predictions: default_max_predictions(),
            use_sovereignty_timeouts: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftsConfig {
    /// Base URL of the local LLM drafting endpoint.
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_num_predict")]
    pub num_predict: u32,
    /// Calendar-day cap on published posts.
    #[serde(default = "default_max_daily_posts")]
    pub max_daily_posts: u32,
}

impl Default for DraftsConfig {
    fn default() -> Self {
        Self {
            llm_base_url: default_llm_base_url(),
            llm_model: default_llm_model(),
            temperature: default_temperature(),
            num_predict: default_num_predict(),
            max_daily_posts: default_max_daily_posts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyConfig {
    /// Absolute spike delta at or above which a spike is posted immediately.
    #[serde(default = "default_spike_threshold")]
    pub spike_threshold: f64,
    /// Summary cadence; 0 disables the periodic summary.
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

impl Default for TransparencyConfig {
    fn default() -> Self {
        Self {
            spike_threshold: default_spike_threshold(),
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DriftConfig {
    /// Specification document scanned for per-cell intent keywords.
    #[serde(default)]
    pub spec_doc: Option<String>,
    /// Pipeline-communications document scanned alongside the spec.
    #[serde(default)]
    pub comms_doc: Option<String>,
    /// Repository root whose paths are scanned for reality signals.
    #[serde(default)]
    pub repo_root: Option<String>,
    /// Detector cadence; 0 disables the periodic run.
    #[serde(default)]
    pub interval_ms: u64,
}

/// How an authorized handle's requests are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandlePolicy {
    InstantExecute,
    ConfirmFirst,
}

/// Which rooms a handle may instantly execute in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomScope {
    /// The literal string "all".
    All(AllRooms),
    Named(Vec<String>),
}

/// Serde helper: the `"all"` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllRooms {
    All,
}

impl RoomScope {
    pub fn all() -> Self {
        RoomScope::All(AllRooms::All)
    }

    pub fn covers(&self, room: &str) -> bool {
        match self {
            RoomScope::All(_) => true,
            RoomScope::Named(rooms) => rooms.iter().any(|r| r == room),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleConfig {
    pub username: String,
    #[serde(default)]
    pub external_id: Option<String>,
    pub policy: HandlePolicy,
    #[serde(default = "RoomScope::all")]
    pub rooms: RoomScope,
}

impl SovereignConfig {
    /// Load config from a TOML file with SOVEREIGN_* env var overrides.
    pub fn load(config_path: &str) -> crate::error::Result<Self> {
        let config: SovereignConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("SOVEREIGN_").split("__"))
            .extract()
            .map_err(|e| crate::error::SovereignError::Config(e.to_string()))?;
        Ok(config)
    }

    /// The two privileged admin external IDs, read from the environment.
    pub fn admin_external_ids() -> Vec<String> {
        [ENV_ADMIN_ID_PRIMARY, ENV_ADMIN_ID_SECONDARY]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .filter(|v| !v.is_empty())
            .collect()
    }

    pub fn room(&self, name: &str) -> Option<&RoomConfig> {
        self.rooms.iter().find(|r| r.name == name)
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}
fn default_category() -> String {
    "sovereign-engine".to_string()
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_task_timeout_ms() -> u64 {
    300_000
}
fn default_stabilization_ms() -> u64 {
    5_000
}
fn default_capture_timeout_ms() -> u64 {
    5_000
}
fn default_ask_predict_timeout_ms() -> u64 {
    30_000
}
fn default_redirect_grace_ms() -> u64 {
    10_000
}
fn default_max_predictions() -> usize {
    5
}
fn default_llm_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_llm_model() -> String {
    "llama3.2".to_string()
}
fn default_temperature() -> f64 {
    0.8
}
fn default_num_predict() -> u32 {
    120
}
fn default_max_daily_posts() -> u32 {
    6
}
fn default_spike_threshold() -> f64 {
    5.0
}
fn default_report_interval_ms() -> u64 {
    3_600_000
}

/// The nine default cognitive rooms: four native-IPC terminals and five
/// apps reachable only through UI scripting + clipboard.
fn default_rooms() -> Vec<RoomConfig> {
    let native = [
        ("iterm", IpcBackend::Iterm),
        ("terminal", IpcBackend::Terminal),
        ("kitty", IpcBackend::Kitty),
        ("wezterm", IpcBackend::Wezterm),
    ];
    let scripted = [
        ("rio", "Rio"),
        ("cursor", "Cursor"),
        ("code", "Code"),
        ("warp", "Warp"),
        ("ghostty", "Ghostty"),
    ];

    let mut rooms: Vec<RoomConfig> = native
        .into_iter()
        .map(|(name, backend)| RoomConfig {
            name: name.to_string(),
            backend,
            window_hint: None,
            app_name: None,
        })
        .collect();

    rooms.extend(scripted.into_iter().map(|(name, app)| RoomConfig {
        name: name.to_string(),
        backend: IpcBackend::SystemEvents,
        window_hint: None,
        app_name: Some(app.to_string()),
    }));

    rooms
}
