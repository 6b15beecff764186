//! Cross-Channel Router — pluggable adapters forward messages between
//! external transports and the room channels.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use sovereign_core::gateway::ChatGateway;
use sovereign_core::{Result, SovereignError};

use crate::registry::RoomRegistry;

/// Runtime state reported by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    Connected,
    Connecting,
    Disconnected,
    Error,
}

impl fmt::Display for AdapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdapterStatus::Connected => "connected",
            AdapterStatus::Connecting => "connecting",
            AdapterStatus::Disconnected => "disconnected",
            AdapterStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A message arriving from an external transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub source_id: String,
    pub content: String,
    pub author: String,
    pub target_room: String,
}

/// Capability set every external transport adapter exposes. Adapters are
/// trusted and responsible for their own transport.
#[async_trait]
pub trait ExternalAdapter: Send + Sync {
    /// Stable lowercase identifier (e.g. `"telegram"`).
    fn name(&self) -> &str;

    fn status(&self) -> AdapterStatus;

    async fn initialize(&self) -> Result<()>;

    async fn send_message(&self, chat_id: &str, content: &str) -> Result<()>;

    /// Bind the inbound callback. The router installs one that forwards into
    /// `route_message`.
    fn on_message(&self, callback: Arc<dyn Fn(InboundMessage) + Send + Sync>);
}

type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Routes adapter traffic into room channels and back out.
pub struct CrossChannelRouter {
    registry: Arc<RoomRegistry>,
    gateway: Arc<dyn ChatGateway>,
    adapters: Mutex<HashMap<String, Arc<dyn ExternalAdapter>>>,
    /// Custom per-source handlers installed by the host; when present they
    /// replace the default room-channel forwarding.
    handlers: Mutex<HashMap<String, MessageHandler>>,
}

impl CrossChannelRouter {
    pub fn new(registry: Arc<RoomRegistry>, gateway: Arc<dyn ChatGateway>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            gateway,
            adapters: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
        })
    }

    /// Register an adapter and bind its inbound callback to the router.
    pub fn register_adapter(self: &Arc<Self>, adapter: Arc<dyn ExternalAdapter>) {
        let name = adapter.name().to_string();
        info!(adapter = %name, "registering external adapter");

        let router = Arc::clone(self);
        let source = name.clone();
        adapter.on_message(Arc::new(move |msg: InboundMessage| {
            let router = Arc::clone(&router);
            let source = source.clone();
            tokio::spawn(async move {
                router.route_message(&source, msg).await;
            });
        }));

        self.adapters.lock().unwrap().insert(name, adapter);
    }

    /// Install a custom handler for one source, replacing the default
    /// forwarding for that source.
    pub fn register_message_handler(
        &self,
        source: &str,
        handler: impl Fn(InboundMessage) + Send + Sync + 'static,
    ) {
        self.handlers
            .lock()
            .unwrap()
            .insert(source.to_string(), Arc::new(handler));
    }

    /// Forward an inbound adapter message: a custom handler wins; otherwise
    /// the target room's channel receives `[<source>] <author>: <content>`.
    pub async fn route_message(&self, source: &str, msg: InboundMessage) {
        let handler = self.handlers.lock().unwrap().get(source).cloned();
        if let Some(handler) = handler {
            handler(msg);
            return;
        }

        let Some(channel_id) = self.registry.channel_for_room(&msg.target_room) else {
            warn!(source, room = %msg.target_room, "no channel mapped for routed message");
            return;
        };

        let text = format!("[{source}] {}: {}", msg.author, msg.content);
        if let Err(e) = self.gateway.send_to_channel(channel_id, &text).await {
            warn!(source, channel = channel_id, error = %e, "routed message post failed");
        }
    }

    /// Send `text` out through a registered adapter. Fails fast when the
    /// adapter is missing or not connected.
    pub async fn send_to_external_channel(
        &self,
        adapter_name: &str,
        chat_id: &str,
        text: &str,
    ) -> Result<()> {
        let adapter = self.adapters.lock().unwrap().get(adapter_name).cloned();
        let Some(adapter) = adapter else {
            warn!(adapter = adapter_name, "outbound send to unknown adapter");
            return Err(SovereignError::Internal(format!(
                "adapter '{adapter_name}' is not registered"
            )));
        };

        let status = adapter.status();
        if status != AdapterStatus::Connected {
            warn!(adapter = adapter_name, %status, "outbound send while adapter not connected");
            return Err(SovereignError::Internal(format!(
                "adapter '{adapter_name}' is {status}"
            )));
        }

        adapter.send_message(chat_id, text).await
    }

    pub fn adapter_statuses(&self) -> Vec<(String, AdapterStatus)> {
        let mut statuses: Vec<(String, AdapterStatus)> = self
            .adapters
            .lock()
            .unwrap()
            .iter()
            .map(|(name, a)| (name.clone(), a.status()))
            .collect();
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        statuses
    }
}
