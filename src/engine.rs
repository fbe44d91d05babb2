//! Session handle tying the hierarchy model to a storage collaborator
//!
//! Every operation goes through an explicit `Engine` handle. The model
//! lives behind one `RwLock`; a rewrite mutates it, compiles one atomic
//! unit (primary diff plus a sync group per propagated graph) and
//! dispatches it. A storage failure after the model mutated is returned
//! as `Storage` and leaves the model authoritative; callers must run
//! `validate` before trusting the pair again.

use crate::attrs::Attrs;
use crate::compiler::{compile_rewrite, compile_sync, CompiledUnit, MergeStrategy};
use crate::error::EngineError;
use crate::graph::AttrGraph;
use crate::hierarchy::Hierarchy;
use crate::pattern::{find_matching, Instance};
use crate::propagation::{propagate, RhsTyping};
use crate::rewrite::apply;
use crate::rule::Rule;
use crate::store::GraphStore;
use crate::typing::Typing;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Running counters, read through `Engine::stats`
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub rewrites: u64,
    pub work_units: u64,
    pub propagated_graphs: u64,
}

/// The one handle every caller goes through; no ambient singleton
pub struct Engine {
    hierarchy: RwLock<Hierarchy>,
    store: Arc<dyn GraphStore>,
    merge_strategy: MergeStrategy,
    stats: Mutex<EngineStats>,
}

impl Engine {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Engine {
            hierarchy: RwLock::new(Hierarchy::new()),
            store,
            merge_strategy: MergeStrategy::Bulk,
            stats: Mutex::new(EngineStats::default()),
        }
    }

    /// Switch how merges compile (bulk store primitive vs explicit ops)
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    pub fn add_graph(
        &self,
        label: &str,
        nodes: Vec<(String, Attrs)>,
        edges: Vec<(String, String, Attrs)>,
    ) -> Result<(), EngineError> {
        let mut hierarchy = self.hierarchy.write();
        hierarchy.add_graph(label, nodes, edges)?;
        let seed = CompiledUnit {
            groups: vec![compile_sync(
                label,
                &AttrGraph::new(label),
                hierarchy.graph(label)?,
            )],
        };
        let report = self.store.execute(&seed)?;
        debug!(label, work_units = report.work_units, "graph loaded");
        Ok(())
    }

    pub fn add_typing(
        &self,
        source: &str,
        target: &str,
        typing: Typing,
    ) -> Result<(), EngineError> {
        self.hierarchy.write().add_typing(source, target, typing)
    }

    pub fn remove_graph(&self, label: &str, reconnect: bool) -> Result<(), EngineError> {
        let mut hierarchy = self.hierarchy.write();
        let doomed = hierarchy.graph(label)?.clone();
        hierarchy.remove_graph(label, reconnect)?;
        let unit = CompiledUnit {
            groups: vec![compile_sync(label, &doomed, &AttrGraph::new(label))],
        };
        self.store.execute(&unit)?;
        Ok(())
    }

    pub fn find_matching(
        &self,
        label: &str,
        pattern: &AttrGraph,
    ) -> Result<Vec<Instance>, EngineError> {
        let hierarchy = self.hierarchy.read();
        Ok(find_matching(hierarchy.graph(label)?, pattern))
    }

    /// Apply a rule at an instance and propagate, all as one unit.
    ///
    /// Everything statically checkable fails before the model mutates:
    /// rule validity, instance staleness, and clone disambiguation for
    /// every direct descendant. Returns where each R node landed.
    pub fn rewrite(
        &self,
        label: &str,
        rule: &Rule,
        instance: &Instance,
        rhs_typing: &RhsTyping,
    ) -> Result<BTreeMap<String, String>, EngineError> {
        let mut hierarchy = self.hierarchy.write();
        hierarchy.graph(label)?;
        rule.validate()?;

        // Fail fast on underspecified clone propagation
        let cloned = rule.cloned_nodes();
        if !cloned.is_empty() {
            for target in hierarchy.typings_out_of(label) {
                for (_, preimages) in &cloned {
                    for p_node in preimages.iter().skip(1) {
                        let r_node = &rule.p_rhs[p_node];
                        if rhs_typing.get(&target).and_then(|m| m.get(r_node)).is_none() {
                            return Err(EngineError::AmbiguousDownstreamImage {
                                graph: target.clone(),
                                rhs_node: r_node.clone(),
                            });
                        }
                    }
                }
            }
        }

        let before = hierarchy.clone();
        let result = apply(hierarchy.graph_mut(label)?, rule, instance)?;
        let touched = match propagate(&mut hierarchy, label, &result, rhs_typing) {
            Ok(touched) => touched,
            Err(err) => {
                // Model-level propagation failure: restore the snapshot
                *hierarchy = before;
                return Err(err);
            }
        };

        let mut unit = compile_rewrite(label, &result, hierarchy.graph(label)?, self.merge_strategy)?;
        for graph in &touched {
            unit.groups
                .push(compile_sync(graph, before.graph(graph)?, hierarchy.graph(graph)?));
        }
        let report = self.store.execute(&unit)?;
        info!(
            label,
            ops = unit.op_count(),
            work_units = report.work_units,
            elapsed_us = report.elapsed.as_micros() as u64,
            propagated = touched.len(),
            "rewrite committed"
        );

        let mut stats = self.stats.lock();
        stats.rewrites += 1;
        stats.work_units += report.work_units as u64;
        stats.propagated_graphs += touched.len() as u64;

        Ok(result.rhs_instance)
    }

    /// Pullback of the cospan `b -> d <- c` into a new graph `a`
    pub fn pullback(&self, b: &str, c: &str, d: &str, a: &str) -> Result<(), EngineError> {
        let mut hierarchy = self.hierarchy.write();
        hierarchy.pullback(b, c, d, a)?;
        let seed = CompiledUnit {
            groups: vec![compile_sync(a, &AttrGraph::new(a), hierarchy.graph(a)?)],
        };
        self.store.execute(&seed)?;
        Ok(())
    }

    /// Re-check every typing edge of the model
    pub fn validate(&self) -> Result<(), EngineError> {
        self.hierarchy.read().validate()
    }

    pub fn stats(&self) -> EngineStats {
        *self.stats.lock()
    }

    /// Read access to the model for inspection
    pub fn with_hierarchy<T>(&self, f: impl FnOnce(&Hierarchy) -> T) -> T {
        f(&self.hierarchy.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemBackend;
    use crate::typing::plain_graph;

    fn instance(pairs: &[(&str, &str)]) -> Instance {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn engine_with_backend() -> (Engine, Arc<MemBackend>) {
        let backend = Arc::new(MemBackend::new());
        (Engine::new(backend.clone()), backend)
    }

    fn node_list(ids: &[&str]) -> Vec<(String, Attrs)> {
        ids.iter().map(|id| (id.to_string(), Attrs::new())).collect()
    }

    #[test]
    fn test_rewrite_keeps_model_and_store_in_step() {
        let (engine, backend) = engine_with_backend();
        engine
            .add_graph(
                "g",
                node_list(&["a", "b"]),
                vec![("a".to_string(), "b".to_string(), Attrs::new())],
            )
            .unwrap();

        let mut rule = Rule::identity(plain_graph("pat", &["x"], &[]).unwrap());
        rule.add_node("c", Attrs::from_value("kind", "new")).unwrap();
        rule.add_edge("x", "c", Attrs::new()).unwrap();
        let placed = engine
            .rewrite("g", &rule, &instance(&[("x", "b")]), &RhsTyping::new())
            .unwrap();
        assert_eq!(placed["c"], "c");

        let (nodes, edges) = backend.graph_state("g").unwrap();
        engine.with_hierarchy(|h| {
            let model = h.graph("g").unwrap();
            assert_eq!(nodes.len(), model.node_count());
            assert_eq!(edges.len(), model.edge_count());
        });
    }

    #[test]
    fn test_rewrite_syncs_propagated_graphs() {
        let (engine, backend) = engine_with_backend();
        engine
            .add_graph(
                "instances",
                node_list(&["alice", "party"]),
                vec![("alice".to_string(), "party".to_string(), Attrs::new())],
            )
            .unwrap();
        engine
            .add_graph(
                "model",
                node_list(&["person", "event"]),
                vec![("person".to_string(), "event".to_string(), Attrs::new())],
            )
            .unwrap();
        engine
            .add_typing(
                "instances",
                "model",
                Typing::from_pairs([("alice", "person"), ("party", "event")]),
            )
            .unwrap();

        let mut rule = Rule::identity(plain_graph("pat", &["x", "y"], &[("x", "y")]).unwrap());
        rule.remove_edge("x", "y").unwrap();
        rule.remove_node("y").unwrap();
        engine
            .rewrite(
                "model",
                &rule,
                &instance(&[("x", "person"), ("y", "event")]),
                &RhsTyping::new(),
            )
            .unwrap();

        engine.validate().unwrap();
        let (nodes, _) = backend.graph_state("instances").unwrap();
        assert!(!nodes.contains_key("party"));
        assert_eq!(engine.stats().propagated_graphs, 1);
    }

    #[test]
    fn test_clone_without_disambiguation_fails_before_mutation() {
        let (engine, backend) = engine_with_backend();
        engine.add_graph("low", node_list(&["n"]), vec![]).unwrap();
        engine.add_graph("high", node_list(&["t"]), vec![]).unwrap();
        engine
            .add_typing("low", "high", Typing::from_pairs([("n", "t")]))
            .unwrap();

        let mut rule = Rule::identity(plain_graph("pat", &["x"], &[]).unwrap());
        rule.clone_node("x").unwrap();
        let err = engine
            .rewrite("low", &rule, &instance(&[("x", "n")]), &RhsTyping::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::AmbiguousDownstreamImage { .. }));
        // Neither model nor store moved
        engine.with_hierarchy(|h| {
            assert_eq!(h.graph("low").unwrap().node_count(), 1);
        });
        let (nodes, _) = backend.graph_state("low").unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn test_remove_graph_clears_store() {
        let (engine, backend) = engine_with_backend();
        engine.add_graph("g", node_list(&["a"]), vec![]).unwrap();
        engine.remove_graph("g", false).unwrap();
        let (nodes, edges) = backend.graph_state("g").unwrap();
        assert!(nodes.is_empty());
        assert!(edges.is_empty());
    }

    #[test]
    fn test_find_matching_through_handle() {
        let (engine, _) = engine_with_backend();
        engine
            .add_graph(
                "g",
                node_list(&["a", "b", "c"]),
                vec![
                    ("a".to_string(), "b".to_string(), Attrs::new()),
                    ("b".to_string(), "c".to_string(), Attrs::new()),
                ],
            )
            .unwrap();
        let pattern = plain_graph("pat", &["x", "y"], &[("x", "y")]).unwrap();
        let matches = engine.find_matching("g", &pattern).unwrap();
        assert_eq!(matches.len(), 2);
    }
}
