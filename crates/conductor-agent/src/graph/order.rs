//! Execution order for node-agent graphs.

use std::collections::{HashMap, VecDeque};

use super::agent::Graph;

/// Topological order of the graph's node ids (Kahn's algorithm).
///
/// Ready nodes are taken FIFO, seeded in declaration order, so ties keep the
/// original array order. Edges that name unknown nodes are ignored. Nodes left
/// over because they sit on a cycle are appended in declaration order, so every
/// node appears exactly once.
pub fn execution_order(graph: &Graph) -> Vec<String> {
    let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    if graph.edges.is_empty() {
        return ids.iter().map(|id| id.to_string()).collect();
    }

    let mut in_degree: HashMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &graph.edges {
        let (source, target) = (edge.source.as_str(), edge.target.as_str());
        if !in_degree.contains_key(source) || !in_degree.contains_key(target) {
            continue;
        }
        successors.entry(source).or_default().push(target);
        if let Some(degree) = in_degree.get_mut(target) {
            *degree += 1;
        }
    }

    let mut queue: VecDeque<&str> = ids
        .iter()
        .copied()
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    let mut order: Vec<&str> = Vec::with_capacity(ids.len());

    while let Some(id) = queue.pop_front() {
        order.push(id);
        for &next in successors.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if order.len() < ids.len() {
        for id in &ids {
            if !order.contains(id) {
                order.push(*id);
            }
        }
    }

    order.into_iter().map(String::from).collect()
}

/// Position of each id in `order`.
pub fn positions(order: &[String]) -> HashMap<&str, usize> {
    order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect()
}

/// The direct predecessor of `id` that runs last, if any.
pub fn latest_predecessor<'a>(
    graph: &'a Graph,
    id: &'a str,
    positions: &HashMap<&str, usize>,
) -> Option<&'a str> {
    graph
        .predecessors(id)
        .filter_map(|p| positions.get(p).map(|pos| (p, *pos)))
        .max_by_key(|(_, pos)| *pos)
        .map(|(p, _)| p)
}
