//! Serenity-backed chat gateway binding.
//!
//! Everything Discord-specific lives here: the `ChatGateway` implementation
//! over the REST `Http` client, the event handler that forwards gateway
//! events into the engine, and the reconnecting adapter loop.

mod adapter;
mod gateway;
mod handler;
mod send;

pub use adapter::DiscordAdapter;
pub use gateway::DiscordGateway;
pub use handler::{InboundChat, InboundReaction, SovereignHost};
pub use send::split_chunks;
