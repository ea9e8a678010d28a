//! Conversational turn orchestration.

pub mod orchestrator;
pub mod plan;

pub use orchestrator::{TurnOrchestrator, TurnOutcome, TurnRequest};
pub use plan::{Plan, PlanTracker};
