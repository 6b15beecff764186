//! Shared foundation for the Sovereign Engine workspace: configuration,
//! error taxonomy, task/tier types, and the chat gateway seam.

pub mod config;
pub mod error;
pub mod gateway;
pub mod types;

pub use error::{Result, SovereignError};
