//! `ChatGateway` implemented over serenity's REST `Http` client.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::builder::{CreateAttachment, CreateChannel, CreateMessage, EditMessage};
use serenity::http::Http;
use serenity::model::channel::{ChannelType, ReactionType};
use serenity::model::id::{ChannelId, GuildId, MessageId};
use tracing::info;

use sovereign_core::gateway::ChatGateway;
use sovereign_core::{Result, SovereignError};

use crate::send::split_chunks;

/// REST-backed gateway. The `Http` handle stays valid across gateway
/// reconnects, so one instance serves the whole process lifetime.
pub struct DiscordGateway {
    http: Arc<Http>,
}

impl DiscordGateway {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    pub fn from_token(token: &str) -> Self {
        Self {
            http: Arc::new(Http::new(token)),
        }
    }

    pub fn http(&self) -> Arc<Http> {
        Arc::clone(&self.http)
    }
}

fn parse_channel(channel_id: &str) -> Result<ChannelId> {
    channel_id
        .parse::<u64>()
        .map(ChannelId::new)
        .map_err(|_| SovereignError::Gateway(format!("bad channel id: {channel_id}")))
}

fn parse_message(message_id: &str) -> Result<MessageId> {
    message_id
        .parse::<u64>()
        .map(MessageId::new)
        .map_err(|_| SovereignError::Gateway(format!("bad message id: {message_id}")))
}

fn parse_guild(guild_id: &str) -> Result<GuildId> {
    guild_id
        .parse::<u64>()
        .map(GuildId::new)
        .map_err(|_| SovereignError::Gateway(format!("bad guild id: {guild_id}")))
}

fn gateway_err(e: serenity::Error) -> SovereignError {
    SovereignError::Gateway(e.to_string())
}

#[async_trait]
impl ChatGateway for DiscordGateway {
    /// Post `text` in ≤1950-char chunks; returns the first chunk's id.
    async fn send_to_channel(&self, channel_id: &str, text: &str) -> Result<Option<String>> {
        let channel = parse_channel(channel_id)?;
        let mut first_id = None;
        for chunk in split_chunks(text) {
            let message = channel.say(&self.http, &chunk).await.map_err(gateway_err)?;
            if first_id.is_none() {
                first_id = Some(message.id.to_string());
            }
        }
        Ok(first_id)
    }

    async fn edit_message(&self, channel_id: &str, message_id: &str, text: &str) -> Result<()> {
        let channel = parse_channel(channel_id)?;
        let message = parse_message(message_id)?;
        channel
            .edit_message(&self.http, message, EditMessage::new().content(text))
            .await
            .map_err(gateway_err)?;
        Ok(())
    }

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let channel = parse_channel(channel_id)?;
        let message = parse_message(message_id)?;
        self.http
            .create_reaction(channel, message, &ReactionType::Unicode(emoji.to_string()))
            .await
            .map_err(gateway_err)?;
        Ok(())
    }

    async fn send_file(&self, channel_id: &str, bytes: Vec<u8>, filename: &str) -> Result<()> {
        let channel = parse_channel(channel_id)?;
        let attachment = CreateAttachment::bytes(bytes, filename.to_string());
        channel
            .send_files(&self.http, [attachment], CreateMessage::new())
            .await
            .map_err(gateway_err)?;
        Ok(())
    }

    async fn ensure_category(&self, guild_id: &str, name: &str) -> Result<String> {
        let guild = parse_guild(guild_id)?;
        let channels = guild.channels(&self.http).await.map_err(gateway_err)?;
        if let Some((id, _)) = channels
            .iter()
            .find(|(_, c)| c.kind == ChannelType::Category && c.name == name)
        {
            return Ok(id.to_string());
        }

        info!(name, "creating channel category");
        let created = guild
            .create_channel(
                &self.http,
                CreateChannel::new(name).kind(ChannelType::Category),
            )
            .await
            .map_err(gateway_err)?;
        Ok(created.id.to_string())
    }

    async fn ensure_text_channel(
        &self,
        guild_id: &str,
        name: &str,
        category_id: &str,
    ) -> Result<String> {
        let guild = parse_guild(guild_id)?;
        let category = parse_channel(category_id)?;
        let channels = guild.channels(&self.http).await.map_err(gateway_err)?;
        if let Some((id, _)) = channels.iter().find(|(_, c)| {
            c.kind == ChannelType::Text && c.name == name && c.parent_id == Some(category)
        }) {
            return Ok(id.to_string());
        }

        info!(name, "creating text channel");
        let created = guild
            .create_channel(
                &self.http,
                CreateChannel::new(name)
                    .kind(ChannelType::Text)
                    .category(category),
            )
            .await
            .map_err(gateway_err)?;
        Ok(created.id.to_string())
    }
}
