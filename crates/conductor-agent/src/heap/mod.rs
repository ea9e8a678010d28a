//! Multi-specialist DAG execution ("heap").
//!
//! A priority order of specialist ids and parallel groups is flattened into
//! levels. The `HeapRunner` runs each level concurrently, accumulates a capped
//! context of outcomes, and recursively runs sub-heaps that specialists
//! delegate, up to a depth limit.

pub mod dag;
pub mod planner;
pub mod registry;
pub mod runner;
pub mod specialist;

pub use dag::{build_heap_dag, HeapDag};
pub use planner::{infer_priority_order, parse_priority_order, HeapPlanner};
pub use registry::{SpecialistInfo, SpecialistRegistry};
pub use runner::{HeapOutcome, HeapRunner, NO_SPECIALISTS_SUMMARY, NO_STEPS_SUMMARY};
pub use specialist::AgentSpecialistRunner;
