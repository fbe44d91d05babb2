//! Hierarchy store: a DAG of graphs connected by typing maps
//!
//! Every typing edge is guarded by the homomorphism invariant and by
//! composability: the transitive composition of typings along any path
//! must itself be a valid homomorphism. Reachability queries only see
//! committed typing edges; nothing is exposed mid-validation.

use crate::attrs::Attrs;
use crate::error::EngineError;
use crate::graph::AttrGraph;
use crate::typing::Typing;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// DAG of attributed graphs linked by typings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hierarchy {
    graphs: BTreeMap<String, AttrGraph>,
    typings: BTreeMap<(String, String), Typing>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Hierarchy::default()
    }

    pub fn graph_count(&self) -> usize {
        self.graphs.len()
    }

    pub fn typing_count(&self) -> usize {
        self.typings.len()
    }

    pub fn graph_labels(&self) -> impl Iterator<Item = &String> {
        self.graphs.keys()
    }

    pub fn graph(&self, label: &str) -> Result<&AttrGraph, EngineError> {
        self.graphs
            .get(label)
            .ok_or_else(|| EngineError::UnknownGraph(label.to_string()))
    }

    pub(crate) fn graph_mut(&mut self, label: &str) -> Result<&mut AttrGraph, EngineError> {
        self.graphs
            .get_mut(label)
            .ok_or_else(|| EngineError::UnknownGraph(label.to_string()))
    }

    pub fn typing(&self, source: &str, target: &str) -> Option<&Typing> {
        self.typings
            .get(&(source.to_string(), target.to_string()))
    }

    pub(crate) fn typing_mut(&mut self, source: &str, target: &str) -> Option<&mut Typing> {
        self.typings
            .get_mut(&(source.to_string(), target.to_string()))
    }

    /// Add a graph built from node and edge lists
    pub fn add_graph(
        &mut self,
        label: &str,
        nodes: Vec<(String, Attrs)>,
        edges: Vec<(String, String, Attrs)>,
    ) -> Result<(), EngineError> {
        if self.graphs.contains_key(label) {
            return Err(EngineError::DuplicateGraphLabel(label.to_string()));
        }
        let graph = AttrGraph::from_lists(label, nodes, edges)?;
        self.graphs.insert(label.to_string(), graph);
        Ok(())
    }

    pub(crate) fn insert_graph(&mut self, graph: AttrGraph) -> Result<(), EngineError> {
        if self.graphs.contains_key(&graph.label) {
            return Err(EngineError::DuplicateGraphLabel(graph.label.clone()));
        }
        self.graphs.insert(graph.label.clone(), graph);
        Ok(())
    }

    /// Attach a typing edge after full validation: homomorphism against
    /// the two graphs, acyclicity of the typing DAG, and composability of
    /// every path running through the new edge. All-or-nothing.
    pub fn add_typing(
        &mut self,
        source: &str,
        target: &str,
        typing: Typing,
    ) -> Result<(), EngineError> {
        let src = self.graph(source)?;
        let tgt = self.graph(target)?;
        if source == target {
            return Err(EngineError::InvalidHomomorphism(format!(
                "graph '{}' cannot be typed by itself",
                source
            )));
        }
        if self
            .typings
            .contains_key(&(source.to_string(), target.to_string()))
        {
            return Err(EngineError::InvalidHomomorphism(format!(
                "typing {} -> {} already exists",
                source, target
            )));
        }
        typing.check(src, tgt)?;
        // A typing path target ->* source would close a cycle
        if self.reachable(target).contains(source) {
            return Err(EngineError::InvalidHomomorphism(format!(
                "typing {} -> {} would make the hierarchy cyclic",
                source, target
            )));
        }
        self.check_composability(source, target, &typing)?;
        self.typings
            .insert((source.to_string(), target.to_string()), typing);
        Ok(())
    }

    /// Composability: composition of valid homomorphisms is itself valid,
    /// so what must be enforced is agreement. For each ancestor A of
    /// `source` and descendant D of `target`, the composite A -> D running
    /// through the new edge must coincide with any typing path between A
    /// and D that already exists.
    fn check_composability(
        &self,
        source: &str,
        target: &str,
        typing: &Typing,
    ) -> Result<(), EngineError> {
        let mut upstream: Vec<(String, Typing)> = vec![(source.to_string(), typing.clone())];
        for a in self.ancestors(source)? {
            let composed = self.composed_typing(&a, source)?.compose(typing)?;
            upstream.push((a, composed));
        }

        for (a, through_new) in &upstream {
            let mut downstream: Vec<(String, Typing)> =
                vec![(target.to_string(), through_new.clone())];
            for d in self.descendants(target)? {
                downstream.push((
                    d.clone(),
                    through_new.compose(&self.composed_typing(target, &d)?)?,
                ));
            }
            for (d, full) in downstream {
                let existing = if self.typing(a, &d).is_some()
                    || self.reachable(a).contains(&d)
                {
                    Some(self.composed_typing(a, &d)?)
                } else {
                    None
                };
                if let Some(existing) = existing {
                    if existing.mapping != full.mapping {
                        return Err(EngineError::InvalidHomomorphism(format!(
                            "typing {} -> {} disagrees with the existing path {} -> {}",
                            source, target, a, d
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Composition of typings along some path from `source` to `target`.
    /// Composability guarantees all paths agree, so the first found is used.
    pub fn composed_typing(&self, source: &str, target: &str) -> Result<Typing, EngineError> {
        if let Some(t) = self.typing(source, target) {
            return Ok(t.clone());
        }
        for ((s, mid), first) in &self.typings {
            if s == source && self.reachable(mid).contains(target) {
                let rest = self.composed_typing(mid, target)?;
                return first.compose(&rest);
            }
        }
        Err(EngineError::InvalidHomomorphism(format!(
            "no typing path from '{}' to '{}'",
            source, target
        )))
    }

    /// Remove a graph. With `reconnect`, every pair of typings
    /// A -> label -> B is composed into a direct typing A -> B before
    /// deletion, preserving reachability across the removed level.
    pub fn remove_graph(&mut self, label: &str, reconnect: bool) -> Result<(), EngineError> {
        self.graph(label)?;
        if reconnect {
            let incoming: Vec<(String, Typing)> = self
                .typings
                .iter()
                .filter(|((_, t), _)| t == label)
                .map(|((s, _), typing)| (s.clone(), typing.clone()))
                .collect();
            let outgoing: Vec<(String, Typing)> = self
                .typings
                .iter()
                .filter(|((s, _), _)| s == label)
                .map(|((_, t), typing)| (t.clone(), typing.clone()))
                .collect();
            for (a, into) in &incoming {
                for (b, out_of) in &outgoing {
                    let key = (a.clone(), b.clone());
                    if !self.typings.contains_key(&key) {
                        self.typings.insert(key, into.compose(out_of)?);
                    }
                }
            }
        }
        self.typings
            .retain(|(s, t), _| s != label && t != label);
        self.graphs.remove(label);
        Ok(())
    }

    /// Labels reachable from `label` along typing edges (excluding itself)
    fn reachable(&self, label: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(label.to_string());
        while let Some(current) = queue.pop_front() {
            for ((s, t), _) in &self.typings {
                if s == &current && !seen.contains(t) {
                    seen.insert(t.clone());
                    queue.push_back(t.clone());
                }
            }
        }
        seen
    }

    /// Graphs typed (transitively) into `label`
    pub fn ancestors(&self, label: &str) -> Result<Vec<String>, EngineError> {
        self.graph(label)?;
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(label.to_string());
        while let Some(current) = queue.pop_front() {
            for ((s, t), _) in &self.typings {
                if t == &current && !seen.contains(s) {
                    seen.insert(s.clone());
                    queue.push_back(s.clone());
                }
            }
        }
        Ok(seen.into_iter().collect())
    }

    /// Graphs `label` is typed (transitively) into
    pub fn descendants(&self, label: &str) -> Result<Vec<String>, EngineError> {
        self.graph(label)?;
        Ok(self.reachable(label).into_iter().collect())
    }

    /// Direct typing edges into `label`
    pub fn typings_into(&self, label: &str) -> Vec<String> {
        self.typings
            .keys()
            .filter(|(_, t)| t == label)
            .map(|(s, _)| s.clone())
            .collect()
    }

    /// Direct typing edges out of `label`
    pub fn typings_out_of(&self, label: &str) -> Vec<String> {
        self.typings
            .keys()
            .filter(|(s, _)| s == label)
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Re-check every typing edge. The recovery entry point after a
    /// storage failure left the backend state in doubt.
    pub fn validate(&self) -> Result<(), EngineError> {
        for ((s, t), typing) in &self.typings {
            typing.check(self.graph(s)?, self.graph(t)?)?;
        }
        Ok(())
    }

    /// Pullback of the cospan `b -> d <- c`: builds graph `a` whose nodes
    /// are pairs of b/c nodes sharing an image in d (attributes
    /// intersected), with edges where both projections have one, plus the
    /// projection typings `a -> b` and `a -> c`.
    pub fn pullback(&mut self, b: &str, c: &str, d: &str, a: &str) -> Result<(), EngineError> {
        if self.graphs.contains_key(a) {
            return Err(EngineError::DuplicateGraphLabel(a.to_string()));
        }
        let b_to_d = self
            .typing(b, d)
            .ok_or_else(|| {
                EngineError::InvalidHomomorphism(format!("no typing {} -> {}", b, d))
            })?
            .clone();
        let c_to_d = self
            .typing(c, d)
            .ok_or_else(|| {
                EngineError::InvalidHomomorphism(format!("no typing {} -> {}", c, d))
            })?
            .clone();
        let gb = self.graph(b)?.clone();
        let gc = self.graph(c)?.clone();

        let mut ga = AttrGraph::new(a);
        let mut to_b = BTreeMap::new();
        let mut to_c = BTreeMap::new();
        for nb in gb.node_ids() {
            for nc in gc.node_ids() {
                if b_to_d.image(nb) == c_to_d.image(nc) {
                    let id = format!("{}_{}", nb, nc);
                    let attrs = gb
                        .node_attrs(nb)
                        .expect("node listed by the graph")
                        .intersection(gc.node_attrs(nc).expect("node listed by the graph"));
                    ga.add_node(&id, attrs)?;
                    to_b.insert(id.clone(), nb.clone());
                    to_c.insert(id, nc.clone());
                }
            }
        }
        let pair_ids: Vec<String> = ga.node_ids().cloned().collect();
        for u in &pair_ids {
            for v in &pair_ids {
                let (ub, uc) = (&to_b[u], &to_c[u]);
                let (vb, vc) = (&to_b[v], &to_c[v]);
                if gb.has_edge(ub, vb) && gc.has_edge(uc, vc) {
                    let attrs = gb
                        .edge_attrs(ub, vb)
                        .expect("edge just checked")
                        .intersection(gc.edge_attrs(uc, vc).expect("edge just checked"));
                    ga.add_edge(u, v, attrs)?;
                }
            }
        }

        self.insert_graph(ga)?;
        self.add_typing(a, b, Typing::new(to_b))?;
        self.add_typing(a, c, Typing::new(to_c))?;
        Ok(())
    }
}
