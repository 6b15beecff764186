//! Clipboard Arbiter — a process-wide single-holder lock over the OS
//! clipboard.
//!
//! The clipboard is a physical resource: only one capture path may use it at
//! a time, and a crashed holder must never deadlock the system. Each grant
//! therefore arms a 30 s auto-release, and a queued waiter that has not been
//! granted within 30 s is resolved as if it had acquired. Callers must treat
//! clipboard contents as best-effort and handle an empty read as a capture
//! failure.

mod arbiter;

pub use arbiter::{ClipboardArbiter, ClipboardGuard, AUTO_RELEASE_MS};

use std::sync::OnceLock;

static GLOBAL: OnceLock<ClipboardArbiter> = OnceLock::new();

/// The process-global arbiter instance.
pub fn global() -> &'static ClipboardArbiter {
    GLOBAL.get_or_init(ClipboardArbiter::new)
}
