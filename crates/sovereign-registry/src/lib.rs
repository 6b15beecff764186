//! Room/Channel Registry — cognitive-room ↔ chat-channel mapping, per-room
//! rolling context, and the cross-channel router.

mod registry;
mod router;

pub use registry::{RoomRegistry, EXTRA_CHANNELS};
pub use router::{AdapterStatus, CrossChannelRouter, ExternalAdapter, InboundMessage};
