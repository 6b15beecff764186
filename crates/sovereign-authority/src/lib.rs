//! Handle Authority — resolves a chat author into an execution tier.
//!
//! Two lookup indexes are kept consistent at all times: case-insensitive by
//! username and exact-match by external id. Both point at the same record;
//! when a username and an external id match distinct records, the external id
//! wins.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{info, warn};

use sovereign_core::config::{HandleConfig, HandlePolicy, RoomScope};
use sovereign_core::types::Tier;

struct Indexes {
    /// Key: lowercase username.
    by_username: HashMap<String, HandleConfig>,
    /// Key: external id, value: lowercase username of the record.
    by_external_id: HashMap<String, String>,
}

pub struct HandleAuthority {
    indexes: Mutex<Indexes>,
}

impl HandleAuthority {
    /// Build the authority from the configured handle table plus the
    /// privileged admin external ids (usually from the environment). Each
    /// bootstrap id that is not already bound gets an instant-execute,
    /// all-rooms handle keyed by the id itself.
    pub fn new(handles: Vec<HandleConfig>, admin_external_ids: Vec<String>) -> Self {
        let authority = Self {
            indexes: Mutex::new(Indexes {
                by_username: HashMap::new(),
                by_external_id: HashMap::new(),
            }),
        };

        for handle in handles {
            authority.add_handle(handle);
        }
        for id in admin_external_ids {
            if authority.is_authorized_by_id(&id) {
                continue;
            }
            info!(external_id = %id, "bootstrapping admin handle from environment");
            authority.add_handle(HandleConfig {
                username: id.clone(),
                external_id: Some(id),
                policy: HandlePolicy::InstantExecute,
                rooms: RoomScope::all(),
            });
        }
        authority
    }

    // -----------------------------------------------------------------------
    // Predicates
    // -----------------------------------------------------------------------

    pub fn is_authorized(&self, username: &str) -> bool {
        self.indexes
            .lock()
            .unwrap()
            .by_username
            .contains_key(&username.to_lowercase())
    }

    pub fn is_authorized_by_id(&self, external_id: &str) -> bool {
        self.indexes
            .lock()
            .unwrap()
            .by_external_id
            .contains_key(external_id)
    }

    pub fn is_authorized_by_either(&self, username: &str, external_id: Option<&str>) -> bool {
        external_id.is_some_and(|id| self.is_authorized_by_id(id)) || self.is_authorized(username)
    }

    // -----------------------------------------------------------------------
    // Policy lookups
    // -----------------------------------------------------------------------

    pub fn policy_for(&self, username: &str) -> Option<HandlePolicy> {
        self.indexes
            .lock()
            .unwrap()
            .by_username
            .get(&username.to_lowercase())
            .map(|h| h.policy)
    }

    pub fn policy_for_id(&self, external_id: &str) -> Option<HandlePolicy> {
        let indexes = self.indexes.lock().unwrap();
        let username = indexes.by_external_id.get(external_id)?;
        indexes.by_username.get(username).map(|h| h.policy)
    }

    /// Policy by either key; the external id wins when both match distinct
    /// records.
    pub fn policy_for_either(
        &self,
        username: &str,
        external_id: Option<&str>,
    ) -> Option<HandlePolicy> {
        external_id
            .and_then(|id| self.policy_for_id(id))
            .or_else(|| self.policy_for(username))
    }

    /// True only when a handle is found, its policy is instant-execute, and
    /// its room scope covers `room`.
    pub fn can_execute_in_room(
        &self,
        username: &str,
        room: &str,
        external_id: Option<&str>,
    ) -> bool {
        let indexes = self.indexes.lock().unwrap();
        let handle = external_id
            .and_then(|id| indexes.by_external_id.get(id))
            .and_then(|u| indexes.by_username.get(u))
            .or_else(|| indexes.by_username.get(&username.to_lowercase()));
        match handle {
            Some(h) => h.policy == HandlePolicy::InstantExecute && h.rooms.covers(room),
            None => false,
        }
    }

    /// Tier consumed by the steering loop.
    pub fn resolve_tier(&self, username: &str, room: &str, external_id: Option<&str>) -> Tier {
        if self.can_execute_in_room(username, room, external_id) {
            Tier::Admin
        } else if self.is_authorized_by_either(username, external_id) {
            Tier::Trusted
        } else {
            Tier::General
        }
    }

    // -----------------------------------------------------------------------
    // Runtime mutation
    // -----------------------------------------------------------------------

    pub fn add_handle(&self, handle: HandleConfig) {
        let mut indexes = self.indexes.lock().unwrap();
        let key = handle.username.to_lowercase();
        if let Some(id) = &handle.external_id {
            indexes.by_external_id.insert(id.clone(), key.clone());
        }
        if indexes.by_username.insert(key, handle).is_some() {
            warn!("replaced an existing handle record");
        }
    }

    pub fn remove_handle(&self, username: &str) -> bool {
        let mut indexes = self.indexes.lock().unwrap();
        let key = username.to_lowercase();
        match indexes.by_username.remove(&key) {
            Some(handle) => {
                if let Some(id) = &handle.external_id {
                    indexes.by_external_id.remove(id);
                }
                true
            }
            None => false,
        }
    }

    pub fn remove_handle_by_id(&self, external_id: &str) -> bool {
        let mut indexes = self.indexes.lock().unwrap();
        match indexes.by_external_id.remove(external_id) {
            Some(username) => {
                indexes.by_username.remove(&username);
                true
            }
            None => false,
        }
    }
}
