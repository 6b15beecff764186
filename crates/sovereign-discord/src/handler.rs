//! Serenity event handler: forwards gateway events into the host engine.

use std::sync::{Arc, OnceLock};

use serenity::async_trait;
use serenity::model::channel::{Message, Reaction};
use serenity::model::gateway::Ready;
use serenity::model::id::UserId;
use serenity::prelude::{Context, EventHandler};
use tracing::{info, warn};

/// A chat message as the engine sees it.
#[derive(Debug, Clone)]
pub struct InboundChat {
    pub channel_id: String,
    pub author_username: String,
    pub author_id: String,
    pub content: String,
    /// Message this one replies to, when any (drives draft feedback).
    pub referenced_message_id: Option<String>,
    pub attachment_urls: Vec<String>,
}

/// A reaction-added event as the engine sees it.
#[derive(Debug, Clone)]
pub struct InboundReaction {
    pub channel_id: String,
    pub message_id: String,
    pub emoji: String,
    pub reactor_username: String,
    pub reactor_id: String,
    /// Best-effort guild admin-role flag; the engine combines this with its
    /// own handle authority.
    pub is_admin_role: bool,
}

/// What the engine exposes to the Discord binding.
#[async_trait]
pub trait SovereignHost: Send + Sync {
    async fn on_chat_message(&self, message: InboundChat);
    async fn on_reaction(&self, reaction: InboundReaction);
}

/// Serenity event handler wired to the engine.
pub struct DiscordHandler<H: SovereignHost + 'static> {
    pub host: Arc<H>,
    pub bot_id: OnceLock<UserId>,
}

#[async_trait]
impl<H: SovereignHost + 'static> EventHandler for DiscordHandler<H> {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        self.bot_id.set(ready.user.id).ok();
        info!(name = %ready.user.name, "Discord bot connected");
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        if msg.content.trim().is_empty() && msg.attachments.is_empty() {
            return;
        }

        let inbound = InboundChat {
            channel_id: msg.channel_id.to_string(),
            author_username: msg.author.name.clone(),
            author_id: msg.author.id.to_string(),
            content: msg.content.trim().to_string(),
            referenced_message_id: msg.referenced_message.as_ref().map(|m| m.id.to_string()),
            attachment_urls: msg.attachments.iter().map(|a| a.url.clone()).collect(),
        };
        self.host.on_chat_message(inbound).await;
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        let Some(user_id) = reaction.user_id else {
            return;
        };
        if self.bot_id.get() == Some(&user_id) {
            return;
        }

        let (username, is_admin_role) = reactor_identity(&ctx, &reaction, user_id).await;

        let inbound = InboundReaction {
            channel_id: reaction.channel_id.to_string(),
            message_id: reaction.message_id.to_string(),
            emoji: reaction.emoji.to_string(),
            reactor_username: username,
            reactor_id: user_id.to_string(),
            is_admin_role,
        };
        self.host.on_reaction(inbound).await;
    }
}

/// Resolve the reactor's username and a best-effort admin flag from guild
/// member permissions.
async fn reactor_identity(
    ctx: &Context,
    reaction: &Reaction,
    user_id: UserId,
) -> (String, bool) {
    if let Some(guild_id) = reaction.guild_id {
        match guild_id.member(&ctx.http, user_id).await {
            Ok(member) => {
                let is_admin = member
                    .permissions
                    .map(|p| p.administrator())
                    .unwrap_or(false);
                return (member.user.name.clone(), is_admin);
            }
            Err(e) => warn!(error = %e, "member lookup failed for reaction"),
        }
    }
    match user_id.to_user(&ctx.http).await {
        Ok(user) => (user.name, false),
        Err(_) => (user_id.to_string(), false),
    }
}
