//! Operation compiler: one rewrite, one atomic unit
//!
//! Every rewrite (including its propagation effects in other graphs)
//! compiles into a single `CompiledUnit` of graph-scoped op groups, so
//! the storage collaborator sees one transactional batch per rewrite.
//! Creation ops carry match-or-create semantics keyed by id, so a
//! replayed unit cannot duplicate state.

use crate::attrs::Attrs;
use crate::error::EngineError;
use crate::graph::AttrGraph;
use crate::rewrite::RewriteResult;
use serde::{Deserialize, Serialize};

/// Primitive storage instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreOp {
    /// Create the node unless its id already exists; attrs are unioned in
    MatchOrCreateNode { node: String, attrs: Attrs },
    /// Create the edge unless the (source, target) key exists; attrs unioned
    CreateEdge {
        source: String,
        target: String,
        attrs: Attrs,
    },
    /// Delete a node and its incident edges; missing node is a no-op
    DeleteNode { node: String },
    /// Delete an edge; missing edge is a no-op
    DeleteEdge { source: String, target: String },
    /// Overwrite a node's attribute map
    SetNodeAttrs { node: String, attrs: Attrs },
    /// Overwrite an edge's attribute map
    SetEdgeAttrs {
        source: String,
        target: String,
        attrs: Attrs,
    },
    /// Bulk merge primitive: union attrs onto the survivor, redirect
    /// incident edges, collapse duplicates and self-loops, drop the rest
    ConsolidateNodes {
        survivor: String,
        group: Vec<String>,
    },
}

/// Ops scoped to one graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpGroup {
    pub graph: String,
    pub ops: Vec<StoreOp>,
}

/// One atomic batch: the whole rewrite plus its propagated effects
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompiledUnit {
    pub groups: Vec<OpGroup>,
}

impl CompiledUnit {
    pub fn op_count(&self) -> usize {
        self.groups.iter().map(|g| g.ops.len()).sum()
    }
}

/// How merge consolidation is emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Delegate to the store's opaque bulk primitive
    Bulk,
    /// Synthesize plain ops from the model snapshot
    Explicit,
}

/// Compile the primary graph's rewrite diff. `after` is the model state
/// once the rewrite has been applied; explicit merge emission and all
/// attribute values are read from it.
pub fn compile_rewrite(
    graph: &str,
    result: &RewriteResult,
    after: &AttrGraph,
    strategy: MergeStrategy,
) -> Result<CompiledUnit, EngineError> {
    let diff = &result.diff;
    let mut ops = Vec::new();

    for node in &diff.removed_nodes {
        ops.push(StoreOp::DeleteNode { node: node.clone() });
    }
    for (u, v) in &diff.removed_edges {
        ops.push(StoreOp::DeleteEdge {
            source: u.clone(),
            target: v.clone(),
        });
    }

    // Added nodes go in before clone and merge emission: both scan
    // `after.edges()`, which can reference a node added by this rewrite.
    for node in &diff.added_nodes {
        let attrs = after.node_attrs(node).cloned().unwrap_or_default();
        ops.push(StoreOp::MatchOrCreateNode {
            node: node.clone(),
            attrs,
        });
    }

    // Two passes over clone copies: all nodes first, so an edge between
    // two copies never lands before its endpoint.
    let copies: Vec<&String> = diff
        .cloned_nodes
        .values()
        .flat_map(|c| c.iter().skip(1))
        .collect();
    for copy in &copies {
        let attrs = after.node_attrs(copy).cloned().unwrap_or_default();
        ops.push(StoreOp::MatchOrCreateNode {
            node: (*copy).clone(),
            attrs,
        });
    }
    for copy in &copies {
        for ((u, v), attrs) in after.edges() {
            if u == *copy || v == *copy {
                ops.push(StoreOp::CreateEdge {
                    source: u.clone(),
                    target: v.clone(),
                    attrs: attrs.clone(),
                });
            }
        }
    }

    for (survivor, group) in &diff.merged_nodes {
        match strategy {
            MergeStrategy::Bulk => ops.push(StoreOp::ConsolidateNodes {
                survivor: survivor.clone(),
                group: group.clone(),
            }),
            MergeStrategy::Explicit => {
                // The model already aggregated the union bags; emit the
                // survivor's final state, then drop the absorbed members.
                let attrs = after
                    .node_attrs(survivor)
                    .cloned()
                    .unwrap_or_default();
                ops.push(StoreOp::SetNodeAttrs {
                    node: survivor.clone(),
                    attrs,
                });
                for ((u, v), attrs) in after.edges() {
                    if u == survivor || v == survivor {
                        ops.push(StoreOp::CreateEdge {
                            source: u.clone(),
                            target: v.clone(),
                            attrs: attrs.clone(),
                        });
                        ops.push(StoreOp::SetEdgeAttrs {
                            source: u.clone(),
                            target: v.clone(),
                            attrs: attrs.clone(),
                        });
                    }
                }
                for member in group {
                    if member != survivor {
                        ops.push(StoreOp::DeleteNode {
                            node: member.clone(),
                        });
                    }
                }
            }
        }
    }

    for (u, v) in &diff.added_edges {
        let attrs = after.edge_attrs(u, v).cloned().unwrap_or_default();
        ops.push(StoreOp::CreateEdge {
            source: u.clone(),
            target: v.clone(),
            attrs,
        });
    }

    // Attr deltas compile to absolute final values, so replay is a no-op
    for (node, _) in diff.node_attrs_removed.iter().chain(&diff.node_attrs_added) {
        if let Some(attrs) = after.node_attrs(node) {
            ops.push(StoreOp::SetNodeAttrs {
                node: node.clone(),
                attrs: attrs.clone(),
            });
        }
    }
    for (u, v, _) in diff.edge_attrs_removed.iter().chain(&diff.edge_attrs_added) {
        if let Some(attrs) = after.edge_attrs(u, v) {
            ops.push(StoreOp::SetEdgeAttrs {
                source: u.clone(),
                target: v.clone(),
                attrs: attrs.clone(),
            });
        }
    }

    Ok(CompiledUnit {
        groups: vec![OpGroup {
            graph: graph.to_string(),
            ops,
        }],
    })
}

/// Compile a propagated graph's effects as a state diff. Used for every
/// graph the propagation pass touched; `before` is its state when the
/// rewrite started.
pub fn compile_sync(graph: &str, before: &AttrGraph, after: &AttrGraph) -> OpGroup {
    let mut ops = Vec::new();

    for node in before.node_ids() {
        if !after.has_node(node) {
            ops.push(StoreOp::DeleteNode { node: node.clone() });
        }
    }
    for ((u, v), _) in before.edges() {
        if !after.has_edge(u, v) && after.has_node(u) && after.has_node(v) {
            ops.push(StoreOp::DeleteEdge {
                source: u.clone(),
                target: v.clone(),
            });
        }
    }
    for node in after.node_ids() {
        let attrs = after.node_attrs(node).cloned().unwrap_or_default();
        match before.node_attrs(node) {
            None => ops.push(StoreOp::MatchOrCreateNode {
                node: node.clone(),
                attrs,
            }),
            Some(old) if *old != attrs => ops.push(StoreOp::SetNodeAttrs {
                node: node.clone(),
                attrs,
            }),
            Some(_) => {}
        }
    }
    for ((u, v), attrs) in after.edges() {
        match before.edge_attrs(u, v) {
            None => ops.push(StoreOp::CreateEdge {
                source: u.clone(),
                target: v.clone(),
                attrs: attrs.clone(),
            }),
            Some(old) if old != attrs => ops.push(StoreOp::SetEdgeAttrs {
                source: u.clone(),
                target: v.clone(),
                attrs: attrs.clone(),
            }),
            Some(_) => {}
        }
    }

    OpGroup {
        graph: graph.to_string(),
        ops,
    }
}
