//! Attributed directed graph
//!
//! Nodes and edges carry attribute maps (name -> finite value set).
//! Edges are (source, target) records; self-loops get no special case in
//! the representation. Adjacency indexes are maintained on every mutation
//! for degree pruning and incident-edge walks.

use crate::attrs::Attrs;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Directed graph with attributed nodes and edges
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttrGraph {
    pub label: String,
    nodes: BTreeMap<String, Attrs>,
    edges: BTreeMap<(String, String), Attrs>,
    successors: BTreeMap<String, BTreeSet<String>>,
    predecessors: BTreeMap<String, BTreeSet<String>>,
}

impl AttrGraph {
    pub fn new(label: impl Into<String>) -> Self {
        AttrGraph {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Bulk construction from node and edge lists
    pub fn from_lists(
        label: impl Into<String>,
        nodes: Vec<(String, Attrs)>,
        edges: Vec<(String, String, Attrs)>,
    ) -> Result<Self, EngineError> {
        let mut graph = AttrGraph::new(label);
        for (id, attrs) in nodes {
            graph.add_node(&id, attrs)?;
        }
        for (u, v, attrs) in edges {
            graph.add_edge(&u, &v, attrs)?;
        }
        Ok(graph)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edges
            .contains_key(&(source.to_string(), target.to_string()))
    }

    pub fn node_attrs(&self, id: &str) -> Option<&Attrs> {
        self.nodes.get(id)
    }

    pub fn edge_attrs(&self, source: &str, target: &str) -> Option<&Attrs> {
        self.edges.get(&(source.to_string(), target.to_string()))
    }

    pub fn edges(&self) -> impl Iterator<Item = (&(String, String), &Attrs)> {
        self.edges.iter()
    }

    pub fn successors(&self, id: &str) -> impl Iterator<Item = &String> {
        self.successors.get(id).into_iter().flatten()
    }

    pub fn predecessors(&self, id: &str) -> impl Iterator<Item = &String> {
        self.predecessors.get(id).into_iter().flatten()
    }

    pub fn out_degree(&self, id: &str) -> usize {
        self.successors.get(id).map(|s| s.len()).unwrap_or(0)
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.predecessors.get(id).map(|s| s.len()).unwrap_or(0)
    }

    fn unknown_node(&self, id: &str) -> EngineError {
        EngineError::UnknownNode {
            graph: self.label.clone(),
            node: id.to_string(),
        }
    }

    pub fn add_node(&mut self, id: &str, attrs: Attrs) -> Result<(), EngineError> {
        if self.nodes.contains_key(id) {
            return Err(EngineError::DuplicateNode {
                graph: self.label.clone(),
                node: id.to_string(),
            });
        }
        self.nodes.insert(id.to_string(), attrs);
        self.successors.insert(id.to_string(), BTreeSet::new());
        self.predecessors.insert(id.to_string(), BTreeSet::new());
        Ok(())
    }

    pub fn add_edge(&mut self, source: &str, target: &str, attrs: Attrs) -> Result<(), EngineError> {
        if !self.nodes.contains_key(source) {
            return Err(self.unknown_node(source));
        }
        if !self.nodes.contains_key(target) {
            return Err(self.unknown_node(target));
        }
        let key = (source.to_string(), target.to_string());
        // Re-adding an existing edge unions the attribute bags
        match self.edges.get_mut(&key) {
            Some(existing) => *existing = existing.union(&attrs),
            None => {
                self.edges.insert(key, attrs);
            }
        }
        self.successors
            .get_mut(source)
            .expect("adjacency entry exists for every node")
            .insert(target.to_string());
        self.predecessors
            .get_mut(target)
            .expect("adjacency entry exists for every node")
            .insert(source.to_string());
        Ok(())
    }

    /// Remove a node and every incident edge
    pub fn remove_node(&mut self, id: &str) -> Result<(), EngineError> {
        if !self.nodes.contains_key(id) {
            return Err(self.unknown_node(id));
        }
        let out: Vec<String> = self.successors(id).cloned().collect();
        let inc: Vec<String> = self.predecessors(id).cloned().collect();
        for v in out {
            self.remove_edge(id, &v)?;
        }
        for u in inc {
            if self.has_edge(&u, id) {
                self.remove_edge(&u, id)?;
            }
        }
        self.nodes.remove(id);
        self.successors.remove(id);
        self.predecessors.remove(id);
        Ok(())
    }

    pub fn remove_edge(&mut self, source: &str, target: &str) -> Result<(), EngineError> {
        let key = (source.to_string(), target.to_string());
        if self.edges.remove(&key).is_none() {
            return Err(EngineError::MatchNotFound(format!(
                "edge '{}'->'{}' is not in graph '{}'",
                source, target, self.label
            )));
        }
        if let Some(s) = self.successors.get_mut(source) {
            s.remove(target);
        }
        if let Some(p) = self.predecessors.get_mut(target) {
            p.remove(source);
        }
        Ok(())
    }

    pub fn add_node_attrs(&mut self, id: &str, attrs: &Attrs) -> Result<(), EngineError> {
        let label = self.label.clone();
        let current = self.nodes.get_mut(id).ok_or_else(|| EngineError::UnknownNode {
            graph: label,
            node: id.to_string(),
        })?;
        *current = current.union(attrs);
        Ok(())
    }

    pub fn remove_node_attrs(&mut self, id: &str, attrs: &Attrs) -> Result<(), EngineError> {
        let label = self.label.clone();
        let current = self.nodes.get_mut(id).ok_or_else(|| EngineError::UnknownNode {
            graph: label,
            node: id.to_string(),
        })?;
        *current = current.difference(attrs);
        Ok(())
    }

    pub fn set_node_attrs(&mut self, id: &str, attrs: Attrs) -> Result<(), EngineError> {
        let label = self.label.clone();
        let current = self.nodes.get_mut(id).ok_or_else(|| EngineError::UnknownNode {
            graph: label,
            node: id.to_string(),
        })?;
        *current = attrs;
        Ok(())
    }

    pub fn add_edge_attrs(
        &mut self,
        source: &str,
        target: &str,
        attrs: &Attrs,
    ) -> Result<(), EngineError> {
        let label = self.label.clone();
        let key = (source.to_string(), target.to_string());
        let current = self.edges.get_mut(&key).ok_or_else(|| {
            EngineError::MatchNotFound(format!(
                "edge '{}'->'{}' is not in graph '{}'",
                source, target, label
            ))
        })?;
        *current = current.union(attrs);
        Ok(())
    }

    pub fn remove_edge_attrs(
        &mut self,
        source: &str,
        target: &str,
        attrs: &Attrs,
    ) -> Result<(), EngineError> {
        let label = self.label.clone();
        let key = (source.to_string(), target.to_string());
        let current = self.edges.get_mut(&key).ok_or_else(|| {
            EngineError::MatchNotFound(format!(
                "edge '{}'->'{}' is not in graph '{}'",
                source, target, label
            ))
        })?;
        *current = current.difference(attrs);
        Ok(())
    }

    pub fn set_edge_attrs(
        &mut self,
        source: &str,
        target: &str,
        attrs: Attrs,
    ) -> Result<(), EngineError> {
        let key = (source.to_string(), target.to_string());
        match self.edges.get_mut(&key) {
            Some(current) => {
                *current = attrs;
                Ok(())
            }
            None => Err(EngineError::MatchNotFound(format!(
                "edge '{}'->'{}' is not in graph '{}'",
                source, target, self.label
            ))),
        }
    }

    /// First free id: the requested one, else with a numeric suffix
    pub fn fresh_id(&self, wanted: &str) -> String {
        if !self.nodes.contains_key(wanted) {
            return wanted.to_string();
        }
        let mut count = 1;
        loop {
            let candidate = format!("{}{}", wanted, count);
            if !self.nodes.contains_key(&candidate) {
                return candidate;
            }
            count += 1;
        }
    }

    /// Duplicate a node: full attribute copy plus copies of every
    /// incident edge. A self-loop on the original becomes a self-loop on
    /// the clone. Returns the id of the new node.
    pub fn clone_node(&mut self, id: &str, wanted_id: Option<&str>) -> Result<String, EngineError> {
        let attrs = self
            .nodes
            .get(id)
            .ok_or_else(|| self.unknown_node(id))?
            .clone();
        let clone_id = self.fresh_id(wanted_id.unwrap_or(id));
        self.add_node(&clone_id, attrs)?;

        let out: Vec<(String, Attrs)> = self
            .successors(id)
            .map(|v| (v.clone(), self.edge_attrs(id, v).cloned().unwrap_or_default()))
            .collect();
        let inc: Vec<(String, Attrs)> = self
            .predecessors(id)
            .map(|u| (u.clone(), self.edge_attrs(u, id).cloned().unwrap_or_default()))
            .collect();

        for (v, attrs) in out {
            if v == id {
                // Self-loop transfers onto the clone itself
                self.add_edge(&clone_id, &clone_id, attrs)?;
            } else {
                self.add_edge(&clone_id, &v, attrs)?;
            }
        }
        for (u, attrs) in inc {
            if u != id {
                self.add_edge(&u, &clone_id, attrs)?;
            }
        }
        Ok(clone_id)
    }

    /// Collapse a group of nodes into the first one listed (id continuity).
    ///
    /// Survivor attributes are the union of all members' attributes. Every
    /// incident edge is redirected onto the survivor; edges that end up
    /// sharing a (source, target) pair collapse by attribute union, and
    /// every edge between group members (either direction, including
    /// pre-existing self-loops) collapses into exactly one self-loop.
    pub fn merge_nodes(&mut self, group: &[String]) -> Result<String, EngineError> {
        if group.is_empty() {
            return Err(EngineError::MatchNotFound(
                "merge group is empty".to_string(),
            ));
        }
        for n in group {
            if !self.nodes.contains_key(n) {
                return Err(self.unknown_node(n));
            }
        }
        let survivor = group[0].clone();
        if group.len() == 1 {
            return Ok(survivor);
        }
        let members: BTreeSet<&String> = group.iter().collect();

        // Accumulate: survivor attrs, redirected out/in edges, self-loop bag
        let mut merged_attrs = Attrs::new();
        let mut out_edges: BTreeMap<String, Attrs> = BTreeMap::new();
        let mut in_edges: BTreeMap<String, Attrs> = BTreeMap::new();
        let mut loop_attrs: Option<Attrs> = None;

        for n in group {
            merged_attrs = merged_attrs.union(self.nodes.get(n).expect("checked above"));
            let out: Vec<(String, Attrs)> = self
                .successors(n)
                .map(|v| (v.clone(), self.edge_attrs(n, v).cloned().unwrap_or_default()))
                .collect();
            for (v, attrs) in out {
                if members.contains(&v) {
                    let acc = loop_attrs.get_or_insert_with(Attrs::new);
                    *acc = acc.union(&attrs);
                } else {
                    let acc = out_edges.entry(v).or_default();
                    *acc = acc.union(&attrs);
                }
            }
            let inc: Vec<(String, Attrs)> = self
                .predecessors(n)
                .map(|u| (u.clone(), self.edge_attrs(u, n).cloned().unwrap_or_default()))
                .collect();
            for (u, attrs) in inc {
                // Edges inside the group were already picked up above
                if !members.contains(&u) {
                    let acc = in_edges.entry(u).or_default();
                    *acc = acc.union(&attrs);
                }
            }
        }

        // Drop the non-survivors, then rewrite the survivor's incidences
        for n in &group[1..] {
            self.remove_node(n)?;
        }
        let stale_out: Vec<String> = self.successors(&survivor).cloned().collect();
        for v in stale_out {
            self.remove_edge(&survivor, &v)?;
        }
        let stale_in: Vec<String> = self.predecessors(&survivor).cloned().collect();
        for u in stale_in {
            if self.has_edge(&u, &survivor) {
                self.remove_edge(&u, &survivor)?;
            }
        }

        self.set_node_attrs(&survivor, merged_attrs)?;
        for (v, attrs) in out_edges {
            self.add_edge(&survivor, &v, attrs)?;
        }
        for (u, attrs) in in_edges {
            self.add_edge(&u, &survivor, attrs)?;
        }
        if let Some(attrs) = loop_attrs {
            self.add_edge(&survivor, &survivor, attrs)?;
        }
        Ok(survivor)
    }
}
