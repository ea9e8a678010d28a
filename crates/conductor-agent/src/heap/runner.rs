use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use tracing::{debug, info, warn};

use conductor_core::config::HeapConfig;
use conductor_core::error::Result;
use conductor_core::event::EventBus;
use conductor_core::traits::SpecialistRunner;
use conductor_core::types::{AgentEvent, HeapContextSummary, HeapStep};

use super::dag::{build_heap_dag, HeapDag};
use super::registry::SpecialistRegistry;

/// Summary returned when no specialist ran.
pub const NO_STEPS_SUMMARY: &str = "No steps run.";
/// Summary returned when the plan is empty and the registry has nothing to fall back to.
pub const NO_SPECIALISTS_SUMMARY: &str = "No specialists available.";

/// Final state of a heap run.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapOutcome {
    /// The last specialist outcome in execution order, delegated runs included.
    pub summary: String,
    pub context: HeapContextSummary,
    /// Number of specialist invocations, delegated runs included.
    pub runs: usize,
}

struct DagRun {
    last: Option<String>,
    context: HeapContextSummary,
    runs: usize,
}

/// Runs a priority order level by level with bounded recursive delegation.
pub struct HeapRunner {
    config: HeapConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl HeapRunner {
    pub fn new(config: HeapConfig) -> Self {
        Self {
            config,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn publish(&self, event: AgentEvent) {
        if let Some(ref bus) = self.event_bus {
            bus.publish(event);
        }
    }

    /// Run `priority_order` for `task`.
    ///
    /// An empty order falls back to the registry's first top-level specialist.
    /// Specialist errors propagate and end the run.
    pub async fn run(
        &self,
        priority_order: &[HeapStep],
        task: &str,
        runner: &dyn SpecialistRunner,
        registry: &SpecialistRegistry,
    ) -> Result<HeapOutcome> {
        let mut dag = build_heap_dag(priority_order);
        if dag.is_empty() {
            match registry.first_top_level() {
                Some(id) => {
                    debug!(specialist = %id, "Empty priority order, using first top-level specialist");
                    dag = HeapDag::single(id);
                }
                None => {
                    warn!("Empty priority order and no specialists registered");
                    return Ok(HeapOutcome {
                        summary: NO_SPECIALISTS_SUMMARY.to_string(),
                        context: HeapContextSummary::new(self.config.context_cap),
                        runs: 0,
                    });
                }
            }
        }

        info!(levels = dag.levels.len(), specialists = dag.len(), "Running heap");
        let run = self
            .run_dag(
                dag,
                task.to_string(),
                runner,
                HeapContextSummary::new(self.config.context_cap),
                0,
            )
            .await?;

        Ok(HeapOutcome {
            summary: run.last.unwrap_or_else(|| NO_STEPS_SUMMARY.to_string()),
            context: run.context,
            runs: run.runs,
        })
    }

    fn run_dag<'a>(
        &'a self,
        dag: HeapDag,
        task: String,
        runner: &'a dyn SpecialistRunner,
        mut context: HeapContextSummary,
        depth: usize,
    ) -> BoxFuture<'a, Result<DagRun>> {
        Box::pin(async move {
            let mut last = None;
            let mut runs = 0;

            for (level_index, level) in dag.levels.iter().enumerate() {
                debug!(depth, level = level_index, specialists = ?level, "Starting heap level");
                self.publish(AgentEvent::HeapLevelStarted {
                    depth,
                    level: level_index,
                    specialists: level.clone(),
                });

                // Every branch of the level sees the same snapshot.
                let snapshot = context.clone();
                let results =
                    try_join_all(level.iter().map(|id| runner.run(id, &task, &snapshot))).await?;
                runs += results.len();

                for (id, result) in level.iter().zip(results) {
                    context.push(id.clone(), result.summary.clone());
                    last = Some(result.summary.clone());
                    self.publish(AgentEvent::SpecialistCompleted {
                        specialist_id: id.clone(),
                        depth,
                        summary: result.summary.clone(),
                    });

                    let Some(steps) = result.delegate_heap else {
                        continue;
                    };
                    if depth >= self.config.depth_limit {
                        warn!(
                            specialist = %id,
                            depth,
                            limit = self.config.depth_limit,
                            "Delegation depth limit reached, skipping"
                        );
                        self.publish(AgentEvent::DelegationSkipped {
                            specialist_id: id.clone(),
                            depth,
                        });
                        continue;
                    }
                    let sub_dag = build_heap_dag(&steps);
                    if sub_dag.is_empty() {
                        debug!(specialist = %id, "Empty delegation, skipping");
                        continue;
                    }

                    let sub_task = result.delegate_task.unwrap_or_else(|| task.clone());
                    info!(
                        specialist = %id,
                        depth = depth + 1,
                        steps = sub_dag.len(),
                        "Delegating sub-heap"
                    );
                    self.publish(AgentEvent::DelegationStarted {
                        specialist_id: id.clone(),
                        depth: depth + 1,
                    });

                    let sub = self
                        .run_dag(sub_dag, sub_task, runner, context.clone(), depth + 1)
                        .await?;
                    context = sub.context;
                    runs += sub.runs;
                    if sub.last.is_some() {
                        last = sub.last;
                    }
                }
            }

            Ok(DagRun {
                last,
                context,
                runs,
            })
        })
    }
}
