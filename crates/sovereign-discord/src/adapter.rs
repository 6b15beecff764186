//! Reconnecting serenity client loop.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serenity::model::gateway::GatewayIntents;
use serenity::Client;
use tracing::{error, info, warn};

use crate::handler::{DiscordHandler, SovereignHost};

/// Discord adapter: wraps a serenity `Client` and drives the event loop for
/// the lifetime of the process, reconnecting whenever the gateway drops.
pub struct DiscordAdapter<H: SovereignHost + 'static> {
    token: String,
    host: Arc<H>,
}

impl<H: SovereignHost + 'static> DiscordAdapter<H> {
    pub fn new(token: &str, host: Arc<H>) -> Self {
        Self {
            token: token.to_string(),
            host,
        }
    }

    /// Connect and keep reconnecting. Never returns.
    pub async fn run(self) {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
            | GatewayIntents::GUILD_MESSAGE_REACTIONS;

        loop {
            let mut client = loop {
                match self.build_client(intents).await {
                    Ok(c) => break c,
                    Err(e) => {
                        error!("Discord: connect failed ({e}), retrying in 30s");
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                }
            };

            info!("Discord: gateway connecting");
            if let Err(e) = client.start().await {
                warn!("Discord: gateway error ({e}), reconnecting in 5s");
            } else {
                info!("Discord: gateway stopped cleanly, reconnecting in 5s");
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    async fn build_client(&self, intents: GatewayIntents) -> Result<Client, serenity::Error> {
        let handler = DiscordHandler {
            host: Arc::clone(&self.host),
            bot_id: OnceLock::new(),
        };
        Client::builder(&self.token, intents)
            .event_handler(handler)
            .await
    }
}
