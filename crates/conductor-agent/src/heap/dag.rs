use serde::Serialize;

use conductor_core::types::HeapStep;

/// Levels of specialists. Every id in a level may run concurrently; levels run in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapDag {
    pub levels: Vec<Vec<String>>,
}

impl HeapDag {
    pub fn single(id: impl Into<String>) -> Self {
        Self {
            levels: vec![vec![id.into()]],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Total number of specialist runs across all levels.
    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}

/// Flatten a priority order into levels.
///
/// A single specialist becomes a one-element level and a parallel group becomes
/// one level holding all of its ids. Blank ids and empty groups are dropped.
pub fn build_heap_dag(steps: &[HeapStep]) -> HeapDag {
    let levels = steps
        .iter()
        .filter_map(|step| {
            let ids: Vec<String> = match step {
                HeapStep::Specialist(id) => vec![id.trim().to_string()],
                HeapStep::Parallel { parallel } => {
                    parallel.iter().map(|id| id.trim().to_string()).collect()
                }
            };
            let ids: Vec<String> = ids.into_iter().filter(|id| !id.is_empty()).collect();
            (!ids.is_empty()).then_some(ids)
        })
        .collect();
    HeapDag { levels }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_and_parallel_steps() {
        let steps = vec![
            HeapStep::from("a"),
            HeapStep::parallel(["b", "c"]),
            HeapStep::from("d"),
        ];
        let dag = build_heap_dag(&steps);
        assert_eq!(dag.levels, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
        assert_eq!(dag.len(), 4);
        // Pure: same input, same levels.
        assert_eq!(build_heap_dag(&steps), dag);
    }

    #[test]
    fn blank_ids_and_empty_groups_are_dropped() {
        let steps = vec![
            HeapStep::from(" "),
            HeapStep::parallel(Vec::<String>::new()),
            HeapStep::parallel(["x", ""]),
        ];
        assert_eq!(build_heap_dag(&steps).levels, vec![vec!["x"]]);
        assert!(build_heap_dag(&[]).is_empty());
    }
}
