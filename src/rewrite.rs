//! Rule application on a single graph
//!
//! `apply` runs a fixed phase order: re-validate the instance, delete,
//! clone, merge, add, then attribute updates. The result carries a diff
//! of everything that changed plus the R-node -> target-node instance,
//! which propagation and the compiler both consume.

use crate::attrs::Attrs;
use crate::error::EngineError;
use crate::graph::AttrGraph;
use crate::pattern::{check_instance, Instance};
use crate::rule::Rule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything one rewrite changed in the target graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewriteDiff {
    pub removed_nodes: Vec<String>,
    pub removed_edges: Vec<(String, String)>,
    /// Original target node -> all its copies (original included)
    pub cloned_nodes: BTreeMap<String, Vec<String>>,
    /// Surviving target node -> the group it absorbed
    pub merged_nodes: BTreeMap<String, Vec<String>>,
    pub added_nodes: Vec<String>,
    pub added_edges: Vec<(String, String)>,
    pub node_attrs_removed: Vec<(String, Attrs)>,
    pub node_attrs_added: Vec<(String, Attrs)>,
    pub edge_attrs_removed: Vec<(String, String, Attrs)>,
    pub edge_attrs_added: Vec<(String, String, Attrs)>,
}

/// Outcome of `apply`: the diff and where every R node landed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteResult {
    pub diff: RewriteDiff,
    /// R node -> target graph node
    pub rhs_instance: BTreeMap<String, String>,
}

/// Apply a rule at a previously found instance.
///
/// The instance is re-checked first; a stale one (the graph changed
/// since matching) fails with `MatchNotFound` before any mutation.
pub fn apply(
    graph: &mut AttrGraph,
    rule: &Rule,
    instance: &Instance,
) -> Result<RewriteResult, EngineError> {
    rule.validate()?;
    check_instance(graph, &rule.lhs, instance)?;

    let mut diff = RewriteDiff::default();

    // Phase 1: delete nodes and edges with no preimage in P
    for l_node in rule.removed_nodes() {
        let target = instance[&l_node].clone();
        graph.remove_node(&target)?;
        diff.removed_nodes.push(target);
    }
    for (lu, lv) in rule.removed_edges() {
        let (u, v) = (instance[&lu].clone(), instance[&lv].clone());
        graph.remove_edge(&u, &v)?;
        diff.removed_edges.push((u, v));
    }

    // Phase 2: clone. Track where each P node lives in the target;
    // the first preimage keeps the matched node, the rest get copies.
    let mut p_instance: BTreeMap<String, String> = BTreeMap::new();
    for (p_node, l_node) in &rule.p_lhs {
        p_instance.insert(p_node.clone(), instance[l_node].clone());
    }
    for (l_node, preimages) in rule.cloned_nodes() {
        let origin = instance[&l_node].clone();
        let mut copies = vec![origin.clone()];
        for p_node in preimages.iter().skip(1) {
            let copy = graph.clone_node(&origin, None)?;
            p_instance.insert(p_node.clone(), copy.clone());
            copies.push(copy);
        }
        diff.cloned_nodes.insert(origin, copies);
    }

    // Phase 3: merge. Survivor is the group's first member; later
    // phases address nodes through the remapped p_instance.
    for (_, preimages) in rule.merged_nodes() {
        let mut group: Vec<String> = Vec::new();
        for p_node in &preimages {
            let target = p_instance[p_node].clone();
            if !group.contains(&target) {
                group.push(target);
            }
        }
        if group.len() < 2 {
            continue;
        }
        let survivor = graph.merge_nodes(&group)?;
        for target in p_instance.values_mut() {
            if group.contains(target) {
                *target = survivor.clone();
            }
        }
        diff.merged_nodes.insert(survivor, group);
    }

    // R node -> target node, via any P preimage (all agree after merge)
    let mut rhs_instance: BTreeMap<String, String> = BTreeMap::new();
    for (p_node, r_node) in &rule.p_rhs {
        rhs_instance.insert(r_node.clone(), p_instance[p_node].clone());
    }

    // Phase 4: add nodes and edges new in R
    for r_node in rule.added_nodes() {
        let id = graph.fresh_id(&r_node);
        let attrs = rule
            .rhs
            .node_attrs(&r_node)
            .cloned()
            .unwrap_or_default();
        graph.add_node(&id, attrs)?;
        rhs_instance.insert(r_node, id.clone());
        diff.added_nodes.push(id);
    }
    for (ru, rv) in rule.added_edges() {
        let (u, v) = (rhs_instance[&ru].clone(), rhs_instance[&rv].clone());
        let attrs = rule
            .rhs
            .edge_attrs(&ru, &rv)
            .cloned()
            .unwrap_or_default();
        graph.add_edge(&u, &v, attrs)?;
        diff.added_edges.push((u, v));
    }

    // Phase 5: attribute deltas. Removed = L minus P, added = R minus P.
    for (p_node, l_node) in &rule.p_lhs {
        let target = p_instance[p_node].clone();
        let l_attrs = rule.lhs.node_attrs(l_node).cloned().unwrap_or_default();
        let p_attrs = rule.p.node_attrs(p_node).cloned().unwrap_or_default();
        let removed = l_attrs.difference(&p_attrs);
        if !removed.is_empty() {
            graph.remove_node_attrs(&target, &removed)?;
            diff.node_attrs_removed.push((target.clone(), removed));
        }
        let r_node = &rule.p_rhs[p_node];
        let r_attrs = rule.rhs.node_attrs(r_node).cloned().unwrap_or_default();
        let added = r_attrs.difference(&p_attrs);
        if !added.is_empty() {
            graph.add_node_attrs(&target, &added)?;
            diff.node_attrs_added.push((target, added));
        }
    }
    for ((pu, pv), p_attrs) in rule.p.edges() {
        let (u, v) = (p_instance[pu].clone(), p_instance[pv].clone());
        let (lu, lv) = (&rule.p_lhs[pu], &rule.p_lhs[pv]);
        let l_attrs = rule.lhs.edge_attrs(lu, lv).cloned().unwrap_or_default();
        let removed = l_attrs.difference(p_attrs);
        if !removed.is_empty() && graph.has_edge(&u, &v) {
            graph.remove_edge_attrs(&u, &v, &removed)?;
            diff.edge_attrs_removed.push((u.clone(), v.clone(), removed));
        }
        let (ru, rv) = (&rule.p_rhs[pu], &rule.p_rhs[pv]);
        let r_attrs = rule.rhs.edge_attrs(ru, rv).cloned().unwrap_or_default();
        let added = r_attrs.difference(p_attrs);
        if !added.is_empty() && graph.has_edge(&u, &v) {
            graph.add_edge_attrs(&u, &v, &added)?;
            diff.edge_attrs_added.push((u, v, added));
        }
    }

    Ok(RewriteResult { diff, rhs_instance })
}
