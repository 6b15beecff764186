use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use sovereign_core::types::{Task, TaskPatch, TaskStatus};

const JOURNAL_FILE: &str = "tasks.jsonl";

/// One line of the journal.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JournalEntry {
    Create {
        ts: DateTime<Utc>,
        task: Task,
    },
    Update {
        ts: DateTime<Utc>,
        id: String,
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        patch: Option<TaskPatch>,
    },
}

struct Inner {
    tasks: HashMap<String, Task>,
}

/// Durable task store. Mutators update the in-memory map first, then append a
/// journal line; a failed append is logged and swallowed; the next
/// successful write heals the journal.
pub struct TaskJournal {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl TaskJournal {
    /// Open the journal under `data_dir`, replaying any existing records.
    pub fn open(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(JOURNAL_FILE);

        let mut tasks = HashMap::new();
        if path.exists() {
            let file = fs::File::open(&path)?;
            let mut replayed = 0usize;
            let mut skipped = 0usize;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalEntry>(&line) {
                    Ok(JournalEntry::Create { task, .. }) => {
                        tasks.insert(task.id.clone(), task);
                        replayed += 1;
                    }
                    Ok(JournalEntry::Update {
                        id, status, patch, ..
                    }) => match tasks.get_mut(&id) {
                        Some(task) => {
                            task.status = status;
                            if let Some(patch) = patch {
                                patch.apply(task);
                            }
                            replayed += 1;
                        }
                        None => {
                            warn!(id, "journal update for unknown task skipped");
                            skipped += 1;
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "malformed journal line skipped");
                        skipped += 1;
                    }
                }
            }
            info!(replayed, skipped, tasks = tasks.len(), "task journal replayed");
        }

        Ok(Self {
            path,
            inner: Mutex::new(Inner { tasks }),
        })
    }

    // -----------------------------------------------------------------------
    // Creation and queries
    // -----------------------------------------------------------------------

    /// Create a fresh pending task and journal it.
    pub fn create(&self, room: &str, channel_id: &str, prompt: &str) -> Task {
        let task = Task::new(room, channel_id, prompt);
        {
            let mut inner = self.inner.lock().unwrap();
            inner.tasks.insert(task.id.clone(), task.clone());
        }
        self.append(&JournalEntry::Create {
            ts: Utc::now(),
            task: task.clone(),
        });
        debug!(id = %task.id, room, "task created");
        task
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.inner.lock().unwrap().tasks.get(id).cloned()
    }

    /// All tasks whose status is one of `statuses`.
    pub fn by_status(&self, statuses: &[TaskStatus]) -> Vec<Task> {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect()
    }

    /// Every dispatched or running task, ordered by creation time so the
    /// poller visits rooms round-robin within a tick.
    pub fn active_tasks(&self) -> Vec<Task> {
        let mut tasks = self.by_status(&[TaskStatus::Dispatched, TaskStatus::Running]);
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// The at-most-one task with status dispatched or running in `room`.
    pub fn running_for_room(&self, room: &str) -> Option<Task> {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .values()
            .find(|t| t.room == room && t.status.is_active())
            .cloned()
    }

    /// Top-n tasks by creation time, newest first.
    pub fn recent(&self, n: usize) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.inner.lock().unwrap().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.truncate(n);
        tasks
    }

    // -----------------------------------------------------------------------
    // Mutators
    // -----------------------------------------------------------------------

    /// Transition the room's current active task to `killed`. Returns whether
    /// a task was killed.
    pub fn kill_room(&self, room: &str) -> bool {
        let id = match self.running_for_room(room) {
            Some(task) => task.id,
            None => return false,
        };
        info!(room, id = %id, "killing running task");
        self.update_status(&id, TaskStatus::Killed, None);
        true
    }

    /// Set the task's status, overlaying `patch` first. A transition to a
    /// terminal status stamps `completed_at` exactly once.
    pub fn update_status(&self, id: &str, status: TaskStatus, patch: Option<TaskPatch>) {
        let entry = {
            let mut inner = self.inner.lock().unwrap();
            let Some(task) = inner.tasks.get_mut(id) else {
                warn!(id, %status, "update_status for unknown task ignored");
                return;
            };

            if let Some(patch) = &patch {
                patch.apply(task);
            }
            task.status = status;
            if status.is_terminal() && task.completed_at.is_none() {
                task.completed_at = Some(Utc::now());
            }

            JournalEntry::Update {
                ts: Utc::now(),
                id: id.to_string(),
                status,
                patch: Some(TaskPatch {
                    completed_at: task.completed_at,
                    ..patch.unwrap_or_default()
                }),
            }
        };
        self.append(&entry);
    }

    /// Concatenate `delta` onto the task's output and refresh the progress
    /// markers.
    pub fn append_output(&self, id: &str, delta: &str) {
        let entry = {
            let mut inner = self.inner.lock().unwrap();
            let Some(task) = inner.tasks.get_mut(id) else {
                warn!(id, "append_output for unknown task ignored");
                return;
            };
            task.output.push_str(delta);
            task.last_output_at = Some(Utc::now());
            task.last_output_length = task.output.len();

            JournalEntry::Update {
                ts: Utc::now(),
                id: id.to_string(),
                status: task.status,
                patch: Some(TaskPatch {
                    output: Some(task.output.clone()),
                    last_output_length: Some(task.last_output_length),
                    last_output_at: task.last_output_at,
                    ..Default::default()
                }),
            }
        };
        self.append(&entry);
    }

    pub fn set_baseline(&self, id: &str, baseline: &str) {
        self.patch_field(id, |task| {
            task.baseline = baseline.to_string();
            TaskPatch {
                baseline: Some(baseline.to_string()),
                ..Default::default()
            }
        });
    }

    pub fn set_discord_message_id(&self, id: &str, message_id: &str) {
        self.patch_field(id, |task| {
            task.discord_message_id = Some(message_id.to_string());
            TaskPatch {
                discord_message_id: Some(message_id.to_string()),
                ..Default::default()
            }
        });
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn patch_field(&self, id: &str, f: impl FnOnce(&mut Task) -> TaskPatch) {
        let entry = {
            let mut inner = self.inner.lock().unwrap();
            let Some(task) = inner.tasks.get_mut(id) else {
                warn!(id, "patch for unknown task ignored");
                return;
            };
            let patch = f(task);
            JournalEntry::Update {
                ts: Utc::now(),
                id: id.to_string(),
                status: task.status,
                patch: Some(patch),
            }
        };
        self.append(&entry);
    }

    /// Best-effort append: write failures are swallowed (in-memory state
    /// stays authoritative), the next successful write heals the file.
    fn append(&self, entry: &JournalEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "journal entry serialization failed");
                return;
            }
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            warn!(error = %e, path = %self.path.display(), "journal append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> TaskJournal {
        TaskJournal::open(dir.path()).unwrap()
    }

    #[test]
    fn create_assigns_short_id_and_pending_status() {
        let dir = TempDir::new().unwrap();
        let journal = open(&dir);
        let task = journal.create("rio", "123", "make build");
        assert_eq!(task.id.len(), 8);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.output.is_empty());
        assert!(task.baseline.is_empty());
    }

    #[test]
    fn replay_round_trips_create_and_last_status() {
        let dir = TempDir::new().unwrap();
        let id = {
            let journal = open(&dir);
            let task = journal.create("rio", "123", "cargo test");
            journal.update_status(&task.id, TaskStatus::Dispatched, None);
            journal.update_status(&task.id, TaskStatus::Running, None);
            task.id
        };

        let reopened = open(&dir);
        let task = reopened.get(&id).unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.room, "rio");
        assert_eq!(task.channel_id, "123");
        assert_eq!(task.prompt, "cargo test");
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    fn replay_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let id = {
            let journal = open(&dir);
            journal.create("rio", "123", "ls").id
        };
        // Corrupt the journal with garbage between valid records.
        let path = dir.path().join("tasks.jsonl");
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("{not json}\n");
        fs::write(&path, contents).unwrap();

        let reopened = open(&dir);
        assert!(reopened.get(&id).is_some());
    }

    #[test]
    fn kill_room_kills_once() {
        let dir = TempDir::new().unwrap();
        let journal = open(&dir);
        let task = journal.create("room-x", "123", "sleep 100");
        journal.update_status(&task.id, TaskStatus::Running, None);

        assert!(journal.kill_room("room-x"));
        let killed = journal.get(&task.id).unwrap();
        assert_eq!(killed.status, TaskStatus::Killed);
        assert!(killed.completed_at.is_some());

        // Second call finds no active task.
        assert!(!journal.kill_room("room-x"));
    }

    #[test]
    fn terminal_transition_stamps_completed_at_once() {
        let dir = TempDir::new().unwrap();
        let journal = open(&dir);
        let task = journal.create("rio", "123", "ls");

        journal.update_status(&task.id, TaskStatus::Complete, None);
        let first = journal.get(&task.id).unwrap();
        let stamp = first.completed_at.unwrap();

        // Idempotence: a second identical transition leaves the record as-is.
        journal.update_status(&task.id, TaskStatus::Complete, None);
        let second = journal.get(&task.id).unwrap();
        assert_eq!(second.completed_at.unwrap(), stamp);
        assert_eq!(second.status, first.status);
        assert_eq!(second.output, first.output);
    }

    #[test]
    fn append_output_accumulates_in_order() {
        let dir = TempDir::new().unwrap();
        let journal = open(&dir);
        let task = journal.create("rio", "123", "make");

        journal.append_output(&task.id, "line one\n");
        journal.append_output(&task.id, "line two\n");

        let task = journal.get(&task.id).unwrap();
        assert_eq!(task.output, "line one\nline two\n");
        assert_eq!(task.last_output_length, task.output.len());
        assert!(task.last_output_at.is_some());
    }

    #[test]
    fn running_for_room_sees_at_most_one() {
        let dir = TempDir::new().unwrap();
        let journal = open(&dir);
        let a = journal.create("rio", "123", "first");
        journal.create("rio", "123", "second");
        journal.update_status(&a.id, TaskStatus::Dispatched, None);

        let running = journal.running_for_room("rio").unwrap();
        assert_eq!(running.id, a.id);
        assert!(journal.running_for_room("kitty").is_none());
    }

    #[test]
    fn recent_orders_newest_first() {
        let dir = TempDir::new().unwrap();
        let journal = open(&dir);
        for i in 0..5 {
            journal.create("rio", "123", &format!("task {i}"));
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let recent = journal.recent(3);
        assert_eq!(recent.len(), 3);
        assert!(recent[0].created_at >= recent[1].created_at);
        assert!(recent[1].created_at >= recent[2].created_at);
    }

    #[test]
    fn baseline_and_message_id_round_trip() {
        let dir = TempDir::new().unwrap();
        let id = {
            let journal = open(&dir);
            let task = journal.create("rio", "123", "make");
            journal.set_baseline(&task.id, "$ make\n");
            journal.set_discord_message_id(&task.id, "msg-42");
            task.id
        };
        let reopened = open(&dir);
        let task = reopened.get(&id).unwrap();
        assert_eq!(task.baseline, "$ make\n");
        assert_eq!(task.discord_message_id.as_deref(), Some("msg-42"));
    }
}
