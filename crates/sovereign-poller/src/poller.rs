use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use sovereign_capture::RoomCapture;
use sovereign_core::config::PollerConfig;
use sovereign_core::gateway::ChatGateway;
use sovereign_core::types::{Task, TaskStatus};
use sovereign_journal::TaskJournal;
use sovereign_registry::RoomRegistry;

use crate::post::post_task_result;

/// Shell prompt suffixes that mark a finished command at end-of-line.
const PROMPT_SUFFIXES: [&str; 5] = ["$", "❯", "➜", ">", "%"];

/// True when the accumulated output ends with a shell-prompt pattern.
pub fn ends_with_shell_prompt(output: &str) -> bool {
    let Some(last) = output.trim_end().lines().last() else {
        return false;
    };
    let last = last.trim_end();
    if PROMPT_SUFFIXES.iter().any(|s| last.ends_with(s)) {
        return true;
    }
    // Conda-style prompts also finish with '#': "(base) #".
    last.starts_with("(base)") && last.ends_with('#')
}

/// Background loop driving every dispatched/running task toward a terminal
/// status. A single logical driver: all post-dispatch task mutation happens
/// here.
pub struct OutputPoller {
    journal: Arc<TaskJournal>,
    capture: Arc<dyn RoomCapture>,
    registry: Arc<RoomRegistry>,
    gateway: Arc<dyn ChatGateway>,
    config: PollerConfig,
    /// Re-entrancy guard: a tick that would overlap a still-running tick is
    /// dropped.
    polling: AtomicBool,
    /// Invoked with every task that reaches `complete`; the host uses this to
    /// feed the pressure grid.
    on_complete: Option<Arc<dyn Fn(&Task) + Send + Sync>>,
}

impl OutputPoller {
    pub fn new(
        journal: Arc<TaskJournal>,
        capture: Arc<dyn RoomCapture>,
        registry: Arc<RoomRegistry>,
        gateway: Arc<dyn ChatGateway>,
        config: PollerConfig,
    ) -> Self {
        Self {
            journal,
            capture,
            registry,
            gateway,
            config,
            polling: AtomicBool::new(false),
            on_complete: None,
        }
    }

    /// Install a completion hook fired for every task that stabilizes.
    pub fn with_completion_hook(mut self, hook: Arc<dyn Fn(&Task) + Send + Sync>) -> Self {
        self.on_complete = Some(hook);
        self
    }

    /// Run until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.config.poll_interval_ms, "output poller started");
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("output poller shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One poller tick over all active tasks, round-robin in creation order.
    /// Skips entirely when a previous tick is still in flight.
    pub async fn poll_once(&self) {
        if self
            .polling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("previous tick still running, dropping this one");
            return;
        }

        for task in self.journal.active_tasks() {
            if let Err(e) = self.advance_task(task).await {
                error!(error = %e, "task advance failed");
            }
        }

        self.polling.store(false, Ordering::SeqCst);
    }

    async fn advance_task(&self, task: Task) -> sovereign_core::Result<()> {
        let now = Utc::now();

        // 1. Timeout on wall-clock age.
        let age_ms = (now - task.created_at).num_milliseconds();
        if age_ms > self.config.task_timeout_ms as i64 {
            info!(task = %task.id, room = %task.room, age_ms, "task timed out");
            self.journal
                .update_status(&task.id, TaskStatus::Timeout, None);
            if let Some(updated) = self.journal.get(&task.id) {
                let reason = format!("timed out after {} s", age_ms / 1000);
                post_task_result(self.gateway.as_ref(), &updated, &reason).await;
            }
            return Ok(());
        }

        // 2. Capture. Failures surface as empty content with an empty delta,
        //    which advances nothing; stabilization is driven by real
        //    progress only.
        let captured = self
            .capture
            .capture_with_delta(&task.room, &task.baseline)
            .await;

        // 3. Advance on new output.
        if !captured.delta.is_empty() {
            self.journal.append_output(&task.id, &captured.delta);
            self.journal.set_baseline(&task.id, &captured.content);
            if task.status == TaskStatus::Dispatched {
                self.journal
                    .update_status(&task.id, TaskStatus::Running, None);
            }
            return Ok(());
        }

        // 4. Stabilization: quiescent interval plus a prompt suffix, or the
        //    prompt-absent grace window of twice the stabilization time.
        if task.status != TaskStatus::Running {
            return Ok(());
        }
        let Some(last_output_at) = task.last_output_at else {
            return Ok(());
        };
        let stable_for = (now - last_output_at).num_milliseconds() as u64;
        if stable_for < self.config.stabilization_ms {
            return Ok(());
        }
        let finished = ends_with_shell_prompt(&task.output)
            || stable_for >= 2 * self.config.stabilization_ms;
        if !finished {
            return Ok(());
        }

        info!(task = %task.id, room = %task.room, stable_for, "task stabilized");
        self.journal
            .update_status(&task.id, TaskStatus::Complete, None);
        self.registry.update_room_context(&task.room, &task.output);

        if let Some(updated) = self.journal.get(&task.id) {
            if let Some(message_id) = &updated.discord_message_id {
                let header = format!("{} Task {} — complete", updated.status.emoji(), updated.id);
                let _ = self
                    .gateway
                    .edit_message(&updated.channel_id, message_id, &header)
                    .await;
            }
            post_task_result(self.gateway.as_ref(), &updated, "completed").await;
            if let Some(hook) = &self.on_complete {
                hook(&updated);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sovereign_capture::{compute_delta, CaptureResult};
    use sovereign_core::types::TaskPatch;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // -- fixtures ----------------------------------------------------------

    struct FixedCapture {
        screens: Mutex<HashMap<String, String>>,
    }

    impl FixedCapture {
        fn new() -> Self {
            Self {
                screens: Mutex::new(HashMap::new()),
            }
        }

        fn set(&self, room: &str, content: &str) {
            self.screens
                .lock()
                .unwrap()
                .insert(room.to_string(), content.to_string());
        }
    }

    #[async_trait]
    impl RoomCapture for FixedCapture {
        async fn capture_with_delta(&self, room: &str, baseline: &str) -> CaptureResult {
            let content = self
                .screens
                .lock()
                .unwrap()
                .get(room)
                .cloned()
                .unwrap_or_default();
            CaptureResult {
                room: room.to_string(),
                delta: compute_delta(&content, baseline),
                content,
                timestamp: Utc::now(),
            }
        }

        async fn dispatch(&self, _room: &str, _text: &str) -> sovereign_capture::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<(String, String)>>,
        files: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl sovereign_core::gateway::ChatGateway for RecordingGateway {
        async fn send_to_channel(
            &self,
            channel_id: &str,
            text: &str,
        ) -> sovereign_core::Result<Option<String>> {
            self.sent
                .lock()
                .unwrap()
                .push((channel_id.to_string(), text.to_string()));
            Ok(Some("reply-1".to_string()))
        }
        async fn edit_message(&self, _c: &str, _m: &str, _t: &str) -> sovereign_core::Result<()> {
            Ok(())
        }
        async fn add_reaction(&self, _c: &str, _m: &str, _e: &str) -> sovereign_core::Result<()> {
            Ok(())
        }
        async fn send_file(
            &self,
            channel_id: &str,
            bytes: Vec<u8>,
            filename: &str,
        ) -> sovereign_core::Result<()> {
            self.files.lock().unwrap().push((
                channel_id.to_string(),
                filename.to_string(),
                bytes.len(),
            ));
            Ok(())
        }
        async fn ensure_category(&self, _g: &str, name: &str) -> sovereign_core::Result<String> {
            Ok(format!("cat-{name}"))
        }
        async fn ensure_text_channel(
            &self,
            _g: &str,
            name: &str,
            _cat: &str,
        ) -> sovereign_core::Result<String> {
            Ok(format!("chan-{name}"))
        }
    }

    struct Fixture {
        poller: OutputPoller,
        journal: Arc<TaskJournal>,
        capture: Arc<FixedCapture>,
        gateway: Arc<RecordingGateway>,
        registry: Arc<RoomRegistry>,
        _dir: TempDir,
    }

    async fn fixture(config: PollerConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(TaskJournal::open(dir.path()).unwrap());
        let capture = Arc::new(FixedCapture::new());
        let gateway = Arc::new(RecordingGateway::default());
        let registry = Arc::new(
            RoomRegistry::init(
                gateway.as_ref(),
                "guild",
                "sovereign",
                &["rio".to_string()],
                dir.path(),
            )
            .await
            .unwrap(),
        );
        let poller = OutputPoller::new(
            Arc::clone(&journal),
            Arc::clone(&capture) as Arc<dyn RoomCapture>,
            Arc::clone(&registry),
            Arc::clone(&gateway) as Arc<dyn ChatGateway>,
            config,
        );
        Fixture {
            poller,
            journal,
            capture,
            gateway,
            registry,
            _dir: dir,
        }
    }

    fn config() -> PollerConfig {
        PollerConfig {
            poll_interval_ms: 100,
            task_timeout_ms: 300_000,
            stabilization_ms: 5_000,
            capture_timeout_ms: 5_000,
        }
    }

    // -- prompt detection --------------------------------------------------

    #[test]
    fn prompt_suffixes_detected_at_end_of_line() {
        assert!(ends_with_shell_prompt("make complete\n$ "));
        assert!(ends_with_shell_prompt("done\n❯"));
        assert!(ends_with_shell_prompt("done\n➜ "));
        assert!(ends_with_shell_prompt("zsh here\n% "));
        assert!(ends_with_shell_prompt("conda\n(base) # "));
        assert!(ends_with_shell_prompt("plain\n>"));
        assert!(!ends_with_shell_prompt("still compiling..."));
        assert!(!ends_with_shell_prompt(""));
    }

    // -- lifecycle ---------------------------------------------------------

    #[tokio::test]
    async fn new_output_advances_dispatched_to_running() {
        let fx = fixture(config()).await;
        let task = fx.journal.create("rio", "chan-rio", "make build");
        fx.journal
            .update_status(&task.id, TaskStatus::Dispatched, None);
        fx.capture.set("rio", "$ make build\ncompiling...");

        fx.poller.poll_once().await;

        let task = fx.journal.get(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.output, "$ make build\ncompiling...");
        assert_eq!(task.baseline, "$ make build\ncompiling...");
        assert!(task.last_output_at.is_some());
    }

    #[tokio::test]
    async fn capture_failure_does_not_advance_state() {
        let fx = fixture(config()).await;
        let task = fx.journal.create("rio", "chan-rio", "make");
        fx.journal
            .update_status(&task.id, TaskStatus::Dispatched, None);
        // No screen content set: capture yields empty content, empty delta.

        fx.poller.poll_once().await;

        let task = fx.journal.get(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Dispatched);
        assert!(task.last_output_at.is_none());
    }

    #[tokio::test]
    async fn stabilizes_on_shell_prompt_and_posts_inline() {
        let fx = fixture(config()).await;
        let task = fx.journal.create("rio", "chan-rio", "make");
        let output = "make complete\n$ ";
        fx.capture.set("rio", output);
        fx.journal.update_status(
            &task.id,
            TaskStatus::Running,
            Some(TaskPatch {
                output: Some(output.to_string()),
                baseline: Some(output.to_string()),
                last_output_at: Some(Utc::now() - chrono::Duration::seconds(6)),
                ..Default::default()
            }),
        );

        fx.poller.poll_once().await;

        let task = fx.journal.get(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert!(task.completed_at.is_some());

        // Room context was updated to the task's output.
        assert_eq!(fx.registry.get_room_context("rio"), "make complete\n$ ");

        let sent = fx.gateway.sent.lock().unwrap();
        let body = &sent.last().unwrap().1;
        assert!(body.contains(&format!("✅ Task {} — completed", task.id)));
        assert!(body.contains("make complete"));
        assert!(body.contains("```"));
    }

    #[tokio::test]
    async fn no_prompt_needs_double_stabilization_window() {
        let fx = fixture(config()).await;
        let task = fx.journal.create("rio", "chan-rio", "tail -f log");
        let output = "no prompt here";
        fx.capture.set("rio", output);
        fx.journal.update_status(
            &task.id,
            TaskStatus::Running,
            Some(TaskPatch {
                output: Some(output.to_string()),
                baseline: Some(output.to_string()),
                last_output_at: Some(Utc::now() - chrono::Duration::seconds(6)),
                ..Default::default()
            }),
        );

        // 6 s quiet without a prompt: under the 10 s grace, stays running.
        fx.poller.poll_once().await;
        assert_eq!(fx.journal.get(&task.id).unwrap().status, TaskStatus::Running);

        fx.journal.update_status(
            &task.id,
            TaskStatus::Running,
            Some(TaskPatch {
                last_output_at: Some(Utc::now() - chrono::Duration::seconds(11)),
                ..Default::default()
            }),
        );
        fx.poller.poll_once().await;
        assert_eq!(
            fx.journal.get(&task.id).unwrap().status,
            TaskStatus::Complete
        );
    }

    #[tokio::test]
    async fn long_output_goes_out_as_attachment() {
        let fx = fixture(config()).await;
        let task = fx.journal.create("rio", "chan-rio", "make");
        let output = format!("{}\n$ ", "x".repeat(2_000));
        fx.capture.set("rio", &output);
        fx.journal.update_status(
            &task.id,
            TaskStatus::Running,
            Some(TaskPatch {
                output: Some(output.clone()),
                baseline: Some(output.clone()),
                last_output_at: Some(Utc::now() - chrono::Duration::seconds(6)),
                ..Default::default()
            }),
        );

        fx.poller.poll_once().await;

        let files = fx.gateway.files.lock().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].1, format!("task-{}-output.txt", task.id));
        assert_eq!(files[0].2, output.len());
    }

    #[tokio::test]
    async fn stale_task_times_out_with_notice() {
        let dir = TempDir::new().unwrap();
        // Seed the journal with a create record whose created_at is ancient,
        // exercising replay on the way in.
        let mut task = Task::new("rio", "chan-rio", "sleep forever");
        task.status = TaskStatus::Running;
        task.created_at = Utc::now() - chrono::Duration::seconds(600);
        let line = serde_json::json!({
            "type": "create",
            "ts": Utc::now(),
            "task": task,
        });
        std::fs::write(
            dir.path().join("tasks.jsonl"),
            format!("{line}\n"),
        )
        .unwrap();

        let journal = Arc::new(TaskJournal::open(dir.path()).unwrap());
        let capture = Arc::new(FixedCapture::new());
        let gateway = Arc::new(RecordingGateway::default());
        let registry = Arc::new(
            RoomRegistry::init(
                gateway.as_ref(),
                "guild",
                "sovereign",
                &["rio".to_string()],
                dir.path(),
            )
            .await
            .unwrap(),
        );
        let poller = OutputPoller::new(
            Arc::clone(&journal),
            capture as Arc<dyn RoomCapture>,
            registry,
            Arc::clone(&gateway) as Arc<dyn ChatGateway>,
            config(),
        );

        poller.poll_once().await;

        let replayed = journal.get(&task.id).unwrap();
        assert_eq!(replayed.status, TaskStatus::Timeout);
        assert!(replayed.completed_at.is_some());
        let sent = gateway.sent.lock().unwrap();
        assert!(sent.last().unwrap().1.contains("timed out"));
        assert!(sent.last().unwrap().1.contains("no output captured"));
    }
}
