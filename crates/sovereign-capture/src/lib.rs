//! Output Capture — reads the most recent visible text of a room's terminal
//! through its bound IPC backend and computes output deltas against a
//! baseline snapshot.

mod backend;
pub mod error;
pub mod shell;

pub use error::{CaptureError, Result};
pub use shell::{ExecOutcome, ShellExecutor, TokioShell};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sovereign_clipboard::ClipboardArbiter;
use sovereign_core::config::RoomConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// One capture observation for a room.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub room: String,
    /// Full visible buffer text; empty on unknown room or backend failure.
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// New text since the supplied baseline (see [`compute_delta`]).
    pub delta: String,
}

impl CaptureResult {
    fn empty(room: &str) -> Self {
        Self {
            room: room.to_string(),
            content: String::new(),
            timestamp: Utc::now(),
            delta: String::new(),
        }
    }
}

/// Capture seam consumed by the poller and the engine's dispatch path.
#[async_trait]
pub trait RoomCapture: Send + Sync {
    /// Capture the room and compute the delta against `baseline`.
    async fn capture_with_delta(&self, room: &str, baseline: &str) -> CaptureResult;

    /// Type `text` into the room's terminal followed by a newline.
    async fn dispatch(&self, room: &str, text: &str) -> Result<()>;
}

/// Production capture service: rooms bound to backends, driven through a
/// shell executor, clipboard access serialized by the arbiter.
pub struct CaptureService {
    rooms: HashMap<String, RoomConfig>,
    shell: Arc<dyn ShellExecutor>,
    arbiter: Arc<ClipboardArbiter>,
}

impl CaptureService {
    pub fn new(
        rooms: &[RoomConfig],
        shell: Arc<dyn ShellExecutor>,
        arbiter: Arc<ClipboardArbiter>,
    ) -> Self {
        Self {
            rooms: rooms.iter().map(|r| (r.name.clone(), r.clone())).collect(),
            shell,
            arbiter,
        }
    }

    /// Read the room's current buffer. Unknown rooms and backend failures
    /// yield an empty-content result with the failure logged; the caller's
    /// delta stays empty and no task state advances.
    pub async fn capture(&self, room: &str) -> CaptureResult {
        let Some(config) = self.rooms.get(room) else {
            warn!(room, "capture requested for unknown room");
            return CaptureResult::empty(room);
        };

        match backend::read_room(self.shell.as_ref(), &self.arbiter, config).await {
            Ok(content) => CaptureResult {
                room: room.to_string(),
                content,
                timestamp: Utc::now(),
                delta: String::new(),
            },
            Err(e) => {
                warn!(room, backend = %config.backend, error = %e, "capture failed");
                CaptureResult::empty(room)
            }
        }
    }
}

#[async_trait]
impl RoomCapture for CaptureService {
    async fn capture_with_delta(&self, room: &str, baseline: &str) -> CaptureResult {
        let mut result = self.capture(room).await;
        result.delta = compute_delta(&result.content, baseline);
        result
    }

    async fn dispatch(&self, room: &str, text: &str) -> Result<()> {
        let config = self
            .rooms
            .get(room)
            .ok_or_else(|| CaptureError::UnknownRoom(room.to_string()))?;
        backend::write_room(self.shell.as_ref(), &self.arbiter, config, text).await
    }
}

/// Delta law: the new tail when `content` strictly extends `baseline`, the
/// whole content when they differ some other way, empty when equal.
pub fn compute_delta(content: &str, baseline: &str) -> String {
    if content == baseline {
        String::new()
    } else if content.starts_with(baseline) {
        content[baseline.len()..].to_string()
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sovereign_core::types::IpcBackend;
    use std::sync::Mutex;

    /// Scripted executor: pops canned outcomes in order and records commands.
    struct ScriptedShell {
        outcomes: Mutex<Vec<ExecOutcome>>,
        commands: Mutex<Vec<String>>,
    }

    impl ScriptedShell {
        fn new(outcomes: Vec<ExecOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                commands: Mutex::new(Vec::new()),
            }
        }

        fn ok(stdout: &str) -> ExecOutcome {
            ExecOutcome {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: 0,
            }
        }
    }

    #[async_trait]
    impl ShellExecutor for ScriptedShell {
        async fn exec(&self, command_line: &str) -> Result<ExecOutcome> {
            self.commands.lock().unwrap().push(command_line.to_string());
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                return Ok(ScriptedShell::ok(""));
            }
            Ok(outcomes.remove(0))
        }
    }

    fn kitty_room() -> RoomConfig {
        RoomConfig {
            name: "kitty".to_string(),
            backend: IpcBackend::Kitty,
            window_hint: None,
            app_name: None,
        }
    }

    fn service(rooms: Vec<RoomConfig>, shell: ScriptedShell) -> CaptureService {
        CaptureService::new(
            &rooms,
            Arc::new(shell),
            Arc::new(ClipboardArbiter::new()),
        )
    }

    #[test]
    fn delta_law() {
        // content strictly extends baseline
        assert_eq!(compute_delta("abcdef", "abc"), "def");
        // differ without prefix relation
        assert_eq!(compute_delta("xyz", "abc"), "xyz");
        // equal
        assert_eq!(compute_delta("abc", "abc"), "");
        // empty baseline
        assert_eq!(compute_delta("abc", ""), "abc");
    }

    #[tokio::test]
    async fn unknown_room_captures_empty() {
        let svc = service(vec![], ScriptedShell::new(vec![]));
        let result = svc.capture("nowhere").await;
        assert!(result.content.is_empty());
        assert!(result.delta.is_empty());
    }

    #[tokio::test]
    async fn kitty_capture_uses_title_match() {
        let svc = service(
            vec![kitty_room()],
            ScriptedShell::new(vec![ScriptedShell::ok("$ make\nok\n$ ")]),
        );
        let result = svc.capture_with_delta("kitty", "$ make\n").await;
        assert_eq!(result.content, "$ make\nok\n$ ");
        assert_eq!(result.delta, "ok\n$ ");
    }

    #[tokio::test]
    async fn kitty_capture_falls_back_to_whole_pane() {
        let shell = ScriptedShell::new(vec![
            ExecOutcome {
                stdout: String::new(),
                stderr: "no matching window".to_string(),
                exit_code: 1,
            },
            ScriptedShell::ok("pane text"),
        ]);
        let svc = service(vec![kitty_room()], shell);
        let result = svc.capture("kitty").await;
        assert_eq!(result.content, "pane text");
    }

    #[tokio::test]
    async fn wezterm_capture_picks_matching_pane() {
        let shell = Arc::new(ScriptedShell::new(vec![
            ScriptedShell::ok(r#"[{"pane_id":3,"title":"other"},{"pane_id":7,"title":"wezterm build"}]"#),
            ScriptedShell::ok("wez output"),
        ]));
        let rooms = vec![RoomConfig {
            name: "wezterm".to_string(),
            backend: IpcBackend::Wezterm,
            window_hint: None,
            app_name: None,
        }];
        let svc = CaptureService::new(
            &rooms,
            Arc::clone(&shell) as Arc<dyn ShellExecutor>,
            Arc::new(ClipboardArbiter::new()),
        );
        let result = svc.capture("wezterm").await;
        assert_eq!(result.content, "wez output");
        let commands = shell.commands.lock().unwrap().clone();
        assert!(commands[1].contains("--pane-id 7"));
    }

    #[tokio::test]
    async fn dispatch_to_unknown_room_errors() {
        let svc = service(vec![], ScriptedShell::new(vec![]));
        let err = svc.dispatch("nowhere", "ls").await.unwrap_err();
        assert!(matches!(err, CaptureError::UnknownRoom(_)));
    }
}
