use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use sovereign_core::gateway::ChatGateway;
use sovereign_core::Result;

/// The four channels created alongside the room channels.
pub const EXTRA_CHANNELS: [&str; 4] = ["trust-debt-public", "tesseract-nu", "x-posts", "ops-board"];

/// Rolling context is capped at this many newline-delimited lines per room.
const CONTEXT_MAX_LINES: usize = 50;

const CHANNEL_MAP_FILE: &str = "channel-map.json";
const CONTEXT_DIR: &str = "room-context";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelMapEntry {
    channel_id: String,
    room: String,
}

/// Cognitive-room ↔ chat-channel mapping plus per-room rolling context.
///
/// The maps are built once during `init` and immutable afterwards; context
/// files are last-writer-wins (one writer per room by convention).
pub struct RoomRegistry {
    data_dir: PathBuf,
    rooms: Vec<String>,
    channel_to_room: HashMap<String, String>,
    room_to_channel: HashMap<String, String>,
    /// Extra channel name → channel id.
    extras: HashMap<String, String>,
}

impl RoomRegistry {
    /// Ensure the category, one text channel per room, and the four extra
    /// channels all exist, reusing any mapping persisted from a prior run.
    pub async fn init(
        gateway: &dyn ChatGateway,
        guild_id: &str,
        category: &str,
        room_names: &[String],
        data_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(data_dir.join(CONTEXT_DIR))?;

        let map_path = data_dir.join(CHANNEL_MAP_FILE);
        let mut persisted: HashMap<String, String> = HashMap::new();
        if map_path.exists() {
            match serde_json::from_str::<Vec<ChannelMapEntry>>(&fs::read_to_string(&map_path)?) {
                Ok(entries) => {
                    for e in entries {
                        persisted.insert(e.room, e.channel_id);
                    }
                    debug!(entries = persisted.len(), "loaded channel map");
                }
                Err(e) => warn!(error = %e, "channel map unreadable, rebuilding"),
            }
        }

        // Category creation is deferred until at least one channel is
        // actually missing from the persisted map.
        let mut category_id: Option<String> = None;

        let mut room_to_channel = HashMap::new();
        let mut extras = HashMap::new();
        let mut changed = false;

        for room in room_names {
            let channel_id = match persisted.get(room) {
                Some(id) => id.clone(),
                None => {
                    let cat = match &category_id {
                        Some(id) => id.clone(),
                        None => {
                            let id = gateway.ensure_category(guild_id, category).await?;
                            category_id = Some(id.clone());
                            id
                        }
                    };
                    changed = true;
                    gateway.ensure_text_channel(guild_id, room, &cat).await?
                }
            };
            room_to_channel.insert(room.clone(), channel_id);
        }

        for extra in EXTRA_CHANNELS {
            let channel_id = match persisted.get(extra) {
                Some(id) => id.clone(),
                None => {
                    let cat = match &category_id {
                        Some(id) => id.clone(),
                        None => {
                            let id = gateway.ensure_category(guild_id, category).await?;
                            category_id = Some(id.clone());
                            id
                        }
                    };
                    changed = true;
                    gateway.ensure_text_channel(guild_id, extra, &cat).await?
                }
            };
            extras.insert(extra.to_string(), channel_id);
        }

        let channel_to_room = room_to_channel
            .iter()
            .map(|(room, id)| (id.clone(), room.clone()))
            .collect();

        let registry = Self {
            data_dir,
            rooms: room_names.to_vec(),
            channel_to_room,
            room_to_channel,
            extras,
        };

        if changed || !map_path.exists() {
            registry.persist_channel_map()?;
            info!(rooms = room_names.len(), "channel map persisted");
        }
        Ok(registry)
    }

    /// Rewrite channel-map.json atomically (write-then-rename).
    fn persist_channel_map(&self) -> Result<()> {
        let mut entries: Vec<ChannelMapEntry> = self
            .room_to_channel
            .iter()
            .map(|(room, id)| ChannelMapEntry {
                channel_id: id.clone(),
                room: room.clone(),
            })
            .collect();
        entries.extend(self.extras.iter().map(|(name, id)| ChannelMapEntry {
            channel_id: id.clone(),
            room: name.clone(),
        }));
        entries.sort_by(|a, b| a.room.cmp(&b.room));

        let path = self.data_dir.join(CHANNEL_MAP_FILE);
        let tmp = self.data_dir.join(format!("{CHANNEL_MAP_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(&entries)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn room_names(&self) -> &[String] {
        &self.rooms
    }

    pub fn room_for_channel(&self, channel_id: &str) -> Option<&str> {
        self.channel_to_room.get(channel_id).map(String::as_str)
    }

    pub fn channel_for_room(&self, room: &str) -> Option<&str> {
        self.room_to_channel.get(room).map(String::as_str)
    }

    pub fn is_room_channel(&self, channel_id: &str) -> bool {
        self.channel_to_room.contains_key(channel_id)
    }

    pub fn is_x_posts_channel(&self, channel_id: &str) -> bool {
        self.extras.get("x-posts").is_some_and(|id| id == channel_id)
    }

    pub fn is_ops_board_channel(&self, channel_id: &str) -> bool {
        self.extras.get("ops-board").is_some_and(|id| id == channel_id)
    }

    pub fn trust_debt_channel(&self) -> Option<&str> {
        self.extras.get("trust-debt-public").map(String::as_str)
    }

    pub fn tesseract_channel(&self) -> Option<&str> {
        self.extras.get("tesseract-nu").map(String::as_str)
    }

    pub fn x_posts_channel(&self) -> Option<&str> {
        self.extras.get("x-posts").map(String::as_str)
    }

    pub fn ops_board_channel(&self) -> Option<&str> {
        self.extras.get("ops-board").map(String::as_str)
    }

    // -----------------------------------------------------------------------
    // Rolling context
    // -----------------------------------------------------------------------

    fn context_path(&self, room: &str) -> PathBuf {
        self.data_dir.join(CONTEXT_DIR).join(format!("{room}.txt"))
    }

    /// The room's rolling context; empty if absent.
    pub fn get_room_context(&self, room: &str) -> String {
        fs::read_to_string(self.context_path(room)).unwrap_or_default()
    }

    /// Fold `output` into the room's context, keeping only the last 50
    /// newline-delimited lines.
    pub fn update_room_context(&self, room: &str, output: &str) {
        let mut combined = self.get_room_context(room);
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(output);

        let lines: Vec<&str> = combined.lines().collect();
        let start = lines.len().saturating_sub(CONTEXT_MAX_LINES);
        let trimmed = lines[start..].join("\n");

        if let Err(e) = fs::write(self.context_path(room), trimmed) {
            warn!(room, error = %e, "room context write failed");
        }
    }

    pub fn clear_room_context(&self, room: &str) {
        let path = self.context_path(room);
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!(room, error = %e, "room context clear failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Gateway that mints deterministic channel ids and counts ensure calls.
    #[derive(Default)]
    struct MintingGateway {
        ensures: AtomicUsize,
    }

    #[async_trait]
    impl ChatGateway for MintingGateway {
        async fn send_to_channel(&self, _c: &str, _t: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn edit_message(&self, _c: &str, _m: &str, _t: &str) -> Result<()> {
            Ok(())
        }
        async fn add_reaction(&self, _c: &str, _m: &str, _e: &str) -> Result<()> {
            Ok(())
        }
        async fn send_file(&self, _c: &str, _b: Vec<u8>, _f: &str) -> Result<()> {
            Ok(())
        }
        async fn ensure_category(&self, _g: &str, name: &str) -> Result<String> {
            Ok(format!("cat-{name}"))
        }
        async fn ensure_text_channel(&self, _g: &str, name: &str, _cat: &str) -> Result<String> {
            self.ensures.fetch_add(1, Ordering::SeqCst);
            Ok(format!("chan-{name}"))
        }
    }

    fn rooms() -> Vec<String> {
        vec!["rio".to_string(), "kitty".to_string()]
    }

    #[tokio::test]
    async fn init_creates_rooms_and_extras_then_reuses_map() {
        let dir = TempDir::new().unwrap();
        let gateway = MintingGateway::default();

        let registry = RoomRegistry::init(&gateway, "guild", "sovereign", &rooms(), dir.path())
            .await
            .unwrap();
        assert_eq!(gateway.ensures.load(Ordering::SeqCst), 2 + EXTRA_CHANNELS.len());
        assert_eq!(registry.channel_for_room("rio"), Some("chan-rio"));
        assert_eq!(registry.room_for_channel("chan-kitty"), Some("kitty"));
        assert!(registry.is_room_channel("chan-rio"));
        assert!(registry.is_x_posts_channel("chan-x-posts"));
        assert!(registry.is_ops_board_channel("chan-ops-board"));
        assert_eq!(registry.trust_debt_channel(), Some("chan-trust-debt-public"));
        assert_eq!(registry.tesseract_channel(), Some("chan-tesseract-nu"));

        // Second start: everything comes back from channel-map.json.
        let gateway2 = MintingGateway::default();
        let registry2 = RoomRegistry::init(&gateway2, "guild", "sovereign", &rooms(), dir.path())
            .await
            .unwrap();
        assert_eq!(gateway2.ensures.load(Ordering::SeqCst), 0);
        assert_eq!(registry2.channel_for_room("rio"), Some("chan-rio"));
        assert_eq!(registry2.x_posts_channel(), Some("chan-x-posts"));
    }

    #[tokio::test]
    async fn room_context_keeps_last_50_lines() {
        let dir = TempDir::new().unwrap();
        let gateway = MintingGateway::default();
        let registry = RoomRegistry::init(&gateway, "g", "c", &rooms(), dir.path())
            .await
            .unwrap();

        assert_eq!(registry.get_room_context("rio"), "");

        let sixty: String = (0..60).map(|i| format!("line {i}\n")).collect();
        registry.update_room_context("rio", &sixty);

        let context = registry.get_room_context("rio");
        let lines: Vec<&str> = context.lines().collect();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines[0], "line 10");
        assert_eq!(lines[49], "line 59");

        // Appending keeps the window bounded.
        registry.update_room_context("rio", "fresh output\n");
        let context = registry.get_room_context("rio");
        assert_eq!(context.lines().count(), 50);
        assert!(context.ends_with("fresh output"));

        registry.clear_room_context("rio");
        assert_eq!(registry.get_room_context("rio"), "");
    }
}
