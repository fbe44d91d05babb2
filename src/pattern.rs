//! Subgraph pattern matching
//!
//! Enumerates injective embeddings of a pattern graph into a target
//! graph. Backtracking search with pruning on in/out-degree and
//! attribute compatibility. Worst case is exponential in pattern size;
//! no approximate matching is provided.

use crate::graph::AttrGraph;
use std::collections::BTreeMap;

/// Injective node mapping from a pattern into a target graph
pub type Instance = BTreeMap<String, String>;

/// Enumerate every instance of `pattern` inside `target`.
///
/// An instance maps pattern nodes to distinct target nodes such that
/// every pattern edge has a corresponding target edge and every pattern
/// node/edge attribute set is contained in the target's. Returns an
/// empty vector, never an error, when nothing matches.
pub fn find_matching(target: &AttrGraph, pattern: &AttrGraph) -> Vec<Instance> {
    let mut pattern_nodes: Vec<&String> = pattern.node_ids().collect();
    if pattern_nodes.is_empty() {
        return vec![];
    }
    // Most-constrained-first: higher total degree patterns fail faster
    pattern_nodes.sort_by_key(|n| {
        std::cmp::Reverse(pattern.out_degree(n) + pattern.in_degree(n))
    });

    let mut results = Vec::new();
    let mut partial: Instance = BTreeMap::new();
    let mut used: Vec<String> = Vec::new();
    backtrack(
        target,
        pattern,
        &pattern_nodes,
        0,
        &mut partial,
        &mut used,
        &mut results,
    );
    results
}

fn backtrack(
    target: &AttrGraph,
    pattern: &AttrGraph,
    order: &[&String],
    depth: usize,
    partial: &mut Instance,
    used: &mut Vec<String>,
    results: &mut Vec<Instance>,
) {
    if depth == order.len() {
        results.push(partial.clone());
        return;
    }
    let p_node = order[depth];
    for t_node in target.node_ids() {
        if used.iter().any(|u| u == t_node) {
            continue;
        }
        if !node_compatible(target, pattern, p_node, t_node) {
            continue;
        }
        if !edges_compatible(target, pattern, partial, p_node, t_node) {
            continue;
        }
        partial.insert(p_node.clone(), t_node.clone());
        used.push(t_node.clone());
        backtrack(target, pattern, order, depth + 1, partial, used, results);
        used.pop();
        partial.remove(p_node);
    }
}

/// Degree and attribute pruning before any edge checks
fn node_compatible(target: &AttrGraph, pattern: &AttrGraph, p_node: &str, t_node: &str) -> bool {
    if pattern.out_degree(p_node) > target.out_degree(t_node) {
        return false;
    }
    if pattern.in_degree(p_node) > target.in_degree(t_node) {
        return false;
    }
    // A pattern self-loop can only land on a target self-loop
    if pattern.has_edge(p_node, p_node) && !target.has_edge(t_node, t_node) {
        return false;
    }
    let p_attrs = pattern.node_attrs(p_node).expect("pattern node exists");
    let t_attrs = target.node_attrs(t_node).expect("target node exists");
    p_attrs.is_subset_of(t_attrs)
}

/// Check pattern edges between `p_node` and already-assigned nodes
fn edges_compatible(
    target: &AttrGraph,
    pattern: &AttrGraph,
    partial: &Instance,
    p_node: &str,
    t_node: &str,
) -> bool {
    for (assigned_p, assigned_t) in partial {
        if pattern.has_edge(p_node, assigned_p) {
            if !target.has_edge(t_node, assigned_t) {
                return false;
            }
            let p_attrs = pattern.edge_attrs(p_node, assigned_p).expect("edge checked");
            let t_attrs = target.edge_attrs(t_node, assigned_t).expect("edge checked");
            if !p_attrs.is_subset_of(t_attrs) {
                return false;
            }
        }
        if pattern.has_edge(assigned_p, p_node) {
            if !target.has_edge(assigned_t, t_node) {
                return false;
            }
            let p_attrs = pattern.edge_attrs(assigned_p, p_node).expect("edge checked");
            let t_attrs = target.edge_attrs(assigned_t, t_node).expect("edge checked");
            if !p_attrs.is_subset_of(t_attrs) {
                return false;
            }
        }
    }
    // Self-loop attrs
    if pattern.has_edge(p_node, p_node) {
        let p_attrs = pattern.edge_attrs(p_node, p_node).expect("edge checked");
        match target.edge_attrs(t_node, t_node) {
            Some(t_attrs) => {
                if !p_attrs.is_subset_of(t_attrs) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

/// Re-validate a previously found instance against the current graph
/// state: the embedding must still hold node by node, edge by edge.
pub fn check_instance(
    target: &AttrGraph,
    pattern: &AttrGraph,
    instance: &Instance,
) -> Result<(), crate::error::EngineError> {
    use crate::error::EngineError;
    let mut seen: Vec<&String> = Vec::new();
    for p_node in pattern.node_ids() {
        let t_node = instance.get(p_node).ok_or_else(|| {
            EngineError::MatchNotFound(format!("instance has no image for pattern node '{}'", p_node))
        })?;
        if seen.iter().any(|s| *s == t_node) {
            return Err(EngineError::MatchNotFound(format!(
                "instance is not injective at '{}'",
                t_node
            )));
        }
        seen.push(t_node);
        let t_attrs = target.node_attrs(t_node).ok_or_else(|| {
            EngineError::MatchNotFound(format!(
                "matched node '{}' no longer exists in '{}'",
                t_node, target.label
            ))
        })?;
        let p_attrs = pattern.node_attrs(p_node).expect("pattern node exists");
        if !p_attrs.is_subset_of(t_attrs) {
            return Err(EngineError::MatchNotFound(format!(
                "attributes of matched node '{}' changed",
                t_node
            )));
        }
    }
    for ((u, v), p_attrs) in pattern.edges() {
        let tu = &instance[u];
        let tv = &instance[v];
        let t_attrs = target.edge_attrs(tu, tv).ok_or_else(|| {
            EngineError::MatchNotFound(format!(
                "matched edge '{}'->'{}' no longer exists",
                tu, tv
            ))
        })?;
        if !p_attrs.is_subset_of(t_attrs) {
            return Err(EngineError::MatchNotFound(format!(
                "attributes of matched edge '{}'->'{}' changed",
                tu, tv
            )));
        }
    }
    Ok(())
}
