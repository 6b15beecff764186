//! The chat gateway seam.
//!
//! The engine never talks to Discord directly; every outbound operation goes
//! through this trait so the coordination core can be driven (and tested)
//! without a live gateway. `sovereign-discord` provides the serenity-backed
//! implementation.

use async_trait::async_trait;

use crate::error::Result;

/// Outbound chat operations required by the engine.
///
/// Implementations must be `Send + Sync`; they are shared behind an `Arc`
/// across the poller, steering loop, registry, drafts, and transparency
/// reporter.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Post `text` to a channel. Returns the new message id when the
    /// transport reports one.
    async fn send_to_channel(&self, channel_id: &str, text: &str) -> Result<Option<String>>;

    /// Replace the content of an existing message.
    async fn edit_message(&self, channel_id: &str, message_id: &str, text: &str) -> Result<()>;

    /// Add a unicode reaction to a message.
    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()>;

    /// Upload `bytes` as a file attachment named `filename`.
    async fn send_file(&self, channel_id: &str, bytes: Vec<u8>, filename: &str) -> Result<()>;

    /// Ensure a channel category exists in the guild; returns its id.
    async fn ensure_category(&self, guild_id: &str, name: &str) -> Result<String>;

    /// Ensure a text channel exists under `category_id`; returns its id.
    async fn ensure_text_channel(
        &self,
        guild_id: &str,
        name: &str,
        category_id: &str,
    ) -> Result<String>;
}

/// Gateway that silently drops everything. Used when a component runs without
/// a chat binding (the transparency reporter tolerates this) and in tests.
#[derive(Debug, Default)]
pub struct NullGateway;

#[async_trait]
impl ChatGateway for NullGateway {
    async fn send_to_channel(&self, _channel_id: &str, _text: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn edit_message(&self, _channel_id: &str, _message_id: &str, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn add_reaction(&self, _channel_id: &str, _message_id: &str, _emoji: &str) -> Result<()> {
        Ok(())
    }

    async fn send_file(&self, _channel_id: &str, _bytes: Vec<u8>, _filename: &str) -> Result<()> {
        Ok(())
    }

    async fn ensure_category(&self, _guild_id: &str, name: &str) -> Result<String> {
        Ok(format!("null-category-{name}"))
    }

    async fn ensure_text_channel(
        &self,
        _guild_id: &str,
        name: &str,
        _category_id: &str,
    ) -> Result<String> {
        Ok(format!("null-channel-{name}"))
    }
}
