pub mod gated;
pub mod rate_gate;
pub mod scripted;
pub mod tokens;

pub use gated::GatedClient;
pub use rate_gate::{Admission, QueueState, RateGate};
pub use scripted::ScriptedClient;
