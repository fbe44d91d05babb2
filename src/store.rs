//! Storage collaborator contract and the in-memory reference backend
//!
//! The engine only ever talks to storage through `GraphStore::execute`,
//! one compiled unit at a time, transactional per unit. `MemBackend`
//! stages every touched graph, applies the ops, and commits only when
//! the whole unit succeeded, so a failed unit leaves it untouched. It
//! implements `ConsolidateNodes` natively, which is what makes the two
//! merge strategies comparable in tests.

use crate::attrs::Attrs;
use crate::compiler::{CompiledUnit, StoreOp};
use crate::error::EngineError;
use crate::graph::AttrGraph;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-unit instrumentation, consumed only for logging and tuning
#[derive(Debug, Clone, Copy)]
pub struct ExecReport {
    pub work_units: usize,
    pub elapsed: Duration,
}

/// The storage collaborator contract
pub trait GraphStore: Send + Sync {
    fn execute(&self, unit: &CompiledUnit) -> Result<ExecReport, EngineError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
struct StoredGraph {
    nodes: BTreeMap<String, Attrs>,
    edges: BTreeMap<(String, String), Attrs>,
}

impl StoredGraph {
    fn apply(&mut self, op: &StoreOp) -> Result<(), EngineError> {
        match op {
            StoreOp::MatchOrCreateNode { node, attrs } => {
                match self.nodes.get_mut(node) {
                    Some(existing) => *existing = existing.union(attrs),
                    None => {
                        self.nodes.insert(node.clone(), attrs.clone());
                    }
                }
            }
            StoreOp::CreateEdge {
                source,
                target,
                attrs,
            } => {
                if !self.nodes.contains_key(source) || !self.nodes.contains_key(target) {
                    return Err(EngineError::Storage(format!(
                        "edge '{}'->'{}' references a missing node",
                        source, target
                    )));
                }
                let key = (source.clone(), target.clone());
                match self.edges.get_mut(&key) {
                    Some(existing) => *existing = existing.union(attrs),
                    None => {
                        self.edges.insert(key, attrs.clone());
                    }
                }
            }
            StoreOp::DeleteNode { node } => {
                self.nodes.remove(node);
                self.edges.retain(|(u, v), _| u != node && v != node);
            }
            StoreOp::DeleteEdge { source, target } => {
                self.edges.remove(&(source.clone(), target.clone()));
            }
            StoreOp::SetNodeAttrs { node, attrs } => {
                let existing = self.nodes.get_mut(node).ok_or_else(|| {
                    EngineError::Storage(format!("set attrs on missing node '{}'", node))
                })?;
                *existing = attrs.clone();
            }
            StoreOp::SetEdgeAttrs {
                source,
                target,
                attrs,
            } => {
                let existing = self
                    .edges
                    .get_mut(&(source.clone(), target.clone()))
                    .ok_or_else(|| {
                        EngineError::Storage(format!(
                            "set attrs on missing edge '{}'->'{}'",
                            source, target
                        ))
                    })?;
                *existing = attrs.clone();
            }
            StoreOp::ConsolidateNodes { survivor, group } => self.consolidate(survivor, group),
        }
        Ok(())
    }

    /// Native bulk merge: union attrs onto the survivor, redirect every
    /// incident edge, collapse duplicate keys and intra-group edges into
    /// one self-loop. Missing members are skipped, so replay is a no-op.
    fn consolidate(&mut self, survivor: &str, group: &[String]) {
        let members: Vec<&String> = group.iter().filter(|n| self.nodes.contains_key(*n)).collect();
        if members.is_empty() {
            return;
        }
        let mut merged_attrs = Attrs::new();
        for member in &members {
            merged_attrs = merged_attrs.union(&self.nodes[member.as_str()]);
        }
        let in_group = |n: &str| group.iter().any(|m| m == n);
        let mut redirected: BTreeMap<(String, String), Attrs> = BTreeMap::new();
        for ((u, v), attrs) in std::mem::take(&mut self.edges) {
            let nu = if in_group(&u) { survivor.to_string() } else { u };
            let nv = if in_group(&v) { survivor.to_string() } else { v };
            match redirected.get_mut(&(nu.clone(), nv.clone())) {
                Some(existing) => *existing = existing.union(&attrs),
                None => {
                    redirected.insert((nu, nv), attrs);
                }
            }
        }
        self.edges = redirected;
        for member in members {
            if member != survivor {
                self.nodes.remove(member);
            }
        }
        self.nodes.insert(survivor.to_string(), merged_attrs);
    }
}

/// Concurrent in-memory backend, one entry per graph
#[derive(Debug, Default)]
pub struct MemBackend {
    graphs: DashMap<String, StoredGraph>,
}

impl MemBackend {
    pub fn new() -> Self {
        MemBackend::default()
    }

    /// Seed the backend with a model graph's current state
    pub fn load_graph(&self, graph: &AttrGraph) {
        let mut stored = StoredGraph::default();
        for node in graph.node_ids() {
            stored.nodes.insert(
                node.clone(),
                graph.node_attrs(node).cloned().unwrap_or_default(),
            );
        }
        for ((u, v), attrs) in graph.edges() {
            stored.edges.insert((u.clone(), v.clone()), attrs.clone());
        }
        self.graphs.insert(graph.label.clone(), stored);
    }

    /// Snapshot of a stored graph for assertions and resync checks
    #[allow(clippy::type_complexity)]
    pub fn graph_state(
        &self,
        label: &str,
    ) -> Option<(BTreeMap<String, Attrs>, BTreeMap<(String, String), Attrs>)> {
        self.graphs
            .get(label)
            .map(|g| (g.nodes.clone(), g.edges.clone()))
    }
}

impl GraphStore for MemBackend {
    fn execute(&self, unit: &CompiledUnit) -> Result<ExecReport, EngineError> {
        let started = Instant::now();
        // Stage every touched graph; commit only when the unit succeeds
        let mut staged: BTreeMap<String, StoredGraph> = BTreeMap::new();
        let mut work_units = 0;
        for group in &unit.groups {
            let graph = staged.entry(group.graph.clone()).or_insert_with(|| {
                self.graphs
                    .get(&group.graph)
                    .map(|g| g.value().clone())
                    .unwrap_or_default()
            });
            for op in &group.ops {
                graph.apply(op)?;
                work_units += 1;
            }
        }
        for (label, graph) in staged {
            self.graphs.insert(label, graph);
        }
        let report = ExecReport {
            work_units,
            elapsed: started.elapsed(),
        };
        debug!(work_units = report.work_units, "unit committed");
        Ok(report)
    }
}
