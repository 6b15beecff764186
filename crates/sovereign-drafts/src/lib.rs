//! Draft Queue — outbound message drafts awaiting admin approval via
//! reaction, fed by a local LLM drafting endpoint.

mod llm;
mod queue;

pub use llm::{DraftBrain, LocalDrafter};
pub use queue::{compose_tweet, DraftOrigin, DraftQueue, TweetDraft, TweetPublisher};
