pub mod graph;
pub mod heap;
pub mod tool_call;
pub mod turn;

pub use graph::{NodeAgent, NodeAgentExecutor, SharedContext};
pub use heap::{AgentSpecialistRunner, HeapPlanner, HeapRunner, SpecialistRegistry};
pub use tool_call::{extract_tool_calls, strip_structural_tags};
pub use turn::{TurnOrchestrator, TurnOutcome, TurnRequest};
