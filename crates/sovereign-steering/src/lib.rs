//! Steering Loop — Ask-and-Predict timed auto-execution with redirect,
//! abort, and admin-bless.
//!
//! Admin requests execute immediately. Trusted requests post a visible
//! countdown and auto-execute when it expires uncontested. General requests
//! become suggestions that only an admin reaction can execute. The conflict
//! rule throughout is latest-signal-wins: a redirect or bless cancels a
//! pending timer, and a timer that has already begun executing makes any
//! later redirect a no-op.

mod prediction;
mod steering;

pub use prediction::{Prediction, PredictionStatus};
pub use steering::{PredictionExecutor, SovereigntySource, SteeringLoop};
