//! Sovereign Engine — wiring for the whole coordination core.
//!
//! An external entrypoint builds a [`sovereign_core::config::SovereignConfig`],
//! calls [`Engine::launch`], and hands the engine to a
//! [`sovereign_discord::DiscordAdapter`] as its host. The poller, steering
//! timers, drift sweeps, and transparency summaries run as background tasks
//! owned by the engine.

mod engine;
mod executor;

pub use engine::Engine;
pub use executor::TaskExecutor;

/// Install the default structured-log subscriber (`RUST_LOG`-driven).
/// Hosts that bring their own subscriber skip this.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
