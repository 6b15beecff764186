use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Auto-release window for a granted lease, and the resolve deadline for a
/// queued waiter.
pub const AUTO_RELEASE_MS: u64 = 30_000;

struct Lease {
    holder_id: String,
    /// Monotonic generation: lets a stale auto-release timer detect that the
    /// lease it armed for has already been released.
    generation: u64,
    auto_release: Option<JoinHandle<()>>,
}

struct Waiter {
    holder_id: String,
    seq: u64,
    tx: oneshot::Sender<()>,
}

#[derive(Default)]
struct ArbiterState {
    holder: Option<Lease>,
    queue: VecDeque<Waiter>,
    next_generation: u64,
    next_seq: u64,
}

/// Single-holder scoped lock with a strict FIFO waiter queue.
///
/// Clone is cheap; all clones share the same state.
#[derive(Clone)]
pub struct ClipboardArbiter {
    state: Arc<Mutex<ArbiterState>>,
}

impl ClipboardArbiter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ArbiterState::default())),
        }
    }

    /// Suspend until the clipboard is held (or the 30 s waiter deadline
    /// resolves this caller without a grant).
    pub async fn acquire(&self, holder_id: &str) {
        let (seq, rx) = {
            let mut st = self.state.lock().unwrap();
            if st.holder.is_none() {
                self.grant_locked(&mut st, holder_id);
                debug!(holder = holder_id, "clipboard acquired immediately");
                return;
            }
            let (tx, rx) = oneshot::channel();
            let seq = st.next_seq;
            st.next_seq += 1;
            st.queue.push_back(Waiter {
                holder_id: holder_id.to_string(),
                seq,
                tx,
            });
            debug!(holder = holder_id, queue = st.queue.len(), "clipboard queued");
            (seq, rx)
        };

        match tokio::time::timeout(Duration::from_millis(AUTO_RELEASE_MS), rx).await {
            Ok(_) => debug!(holder = holder_id, "clipboard granted from queue"),
            Err(_elapsed) => {
                // Deadline hit without a grant: remove ourselves from the
                // queue and resolve anyway. The current holder still holds;
                // the caller must treat the clipboard as best-effort.
                let mut st = self.state.lock().unwrap();
                st.queue.retain(|w| w.seq != seq);
                warn!(
                    holder = holder_id,
                    "clipboard waiter resolved after {AUTO_RELEASE_MS}ms without a grant"
                );
            }
        }
    }

    /// Acquire and return a guard that releases on drop.
    pub async fn scoped(&self, holder_id: &str) -> ClipboardGuard {
        self.acquire(holder_id).await;
        ClipboardGuard {
            arbiter: self.clone(),
            holder_id: holder_id.to_string(),
        }
    }

    /// Release the clipboard. No-op unless the caller is the current holder;
    /// otherwise the lease passes to the head of the queue.
    pub fn release(&self, holder_id: &str) {
        let mut st = self.state.lock().unwrap();
        let is_holder = st
            .holder
            .as_ref()
            .is_some_and(|l| l.holder_id == holder_id);
        if !is_holder {
            debug!(caller = holder_id, "release ignored: not the holder");
            return;
        }

        if let Some(lease) = st.holder.take() {
            if let Some(timer) = lease.auto_release {
                timer.abort();
            }
        }
        self.pass_to_next_locked(&mut st);
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().unwrap().holder.is_some()
    }

    pub fn current_holder(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .holder
            .as_ref()
            .map(|l| l.holder_id.clone())
    }

    pub fn queue_length(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    /// Make `holder_id` the holder and arm its auto-release timer.
    fn grant_locked(&self, st: &mut ArbiterState, holder_id: &str) {
        let generation = st.next_generation;
        st.next_generation += 1;

        let arbiter = self.clone();
        let holder = holder_id.to_string();
        let auto_release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(AUTO_RELEASE_MS)).await;
            arbiter.auto_release(&holder, generation);
        });

        st.holder = Some(Lease {
            holder_id: holder_id.to_string(),
            generation,
            auto_release: Some(auto_release),
        });
    }

    /// Timer path: force-release a lease that was never returned.
    fn auto_release(&self, holder_id: &str, generation: u64) {
        let mut st = self.state.lock().unwrap();
        let stale = !st
            .holder
            .as_ref()
            .is_some_and(|l| l.generation == generation);
        if stale {
            return;
        }
        warn!(holder = holder_id, "clipboard auto-released after {AUTO_RELEASE_MS}ms");
        st.holder = None;
        self.pass_to_next_locked(&mut st);
    }

    /// Grant the head of the queue, skipping waiters whose receiver is gone.
    fn pass_to_next_locked(&self, st: &mut ArbiterState) {
        while let Some(waiter) = st.queue.pop_front() {
            let holder_id = waiter.holder_id.clone();
            if waiter.tx.send(()).is_ok() {
                self.grant_locked(st, &holder_id);
                return;
            }
            // Receiver dropped (caller gave up): try the next waiter.
        }
    }
}

impl Default for ClipboardArbiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped lease: releases the clipboard when dropped, on every exit path.
pub struct ClipboardGuard {
    arbiter: ClipboardArbiter,
    holder_id: String,
}

impl Drop for ClipboardGuard {
    fn drop(&mut self) {
        self.arbiter.release(&self.holder_id);
    }
}
