//! Typing maps between graphs
//!
//! A typing is a total node map attached to a directed edge between two
//! graphs of the hierarchy. Validation is all-or-nothing: the maps are
//! checked for totality, edge preservation and attribute containment
//! before anything is committed.

use crate::attrs::Attrs;
use crate::error::EngineError;
use crate::graph::AttrGraph;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Total node map from a source graph to a target graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Typing {
    pub mapping: BTreeMap<String, String>,
}

impl Typing {
    pub fn new(mapping: BTreeMap<String, String>) -> Self {
        Typing { mapping }
    }

    pub fn from_pairs<'a, I: IntoIterator<Item = (&'a str, &'a str)>>(pairs: I) -> Self {
        Typing {
            mapping: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn image(&self, node: &str) -> Option<&String> {
        self.mapping.get(node)
    }

    /// Nodes of the source mapping onto the given target node
    pub fn preimages(&self, target_node: &str) -> Vec<String> {
        self.mapping
            .iter()
            .filter(|(_, v)| v.as_str() == target_node)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Validate the homomorphism property against concrete graphs.
    ///
    /// Checks, in order: totality over source nodes, image node existence,
    /// node attribute containment, edge preservation, edge attribute
    /// containment. The first violation is reported.
    pub fn check(&self, source: &AttrGraph, target: &AttrGraph) -> Result<(), EngineError> {
        for node in source.node_ids() {
            let image = self.mapping.get(node).ok_or_else(|| {
                EngineError::InvalidHomomorphism(format!(
                    "typing {} -> {} has no image for node '{}'",
                    source.label, target.label, node
                ))
            })?;
            let image_attrs = target.node_attrs(image).ok_or_else(|| {
                EngineError::InvalidHomomorphism(format!(
                    "typing {} -> {} maps '{}' to missing node '{}'",
                    source.label, target.label, node, image
                ))
            })?;
            let attrs = source.node_attrs(node).expect("node listed by the graph");
            if !attrs.is_subset_of(image_attrs) {
                return Err(EngineError::InvalidHomomorphism(format!(
                    "attributes of node '{}' in '{}' exceed those of its image '{}' in '{}'",
                    node, source.label, image, target.label
                )));
            }
        }
        for ((u, v), attrs) in source.edges() {
            let iu = &self.mapping[u];
            let iv = &self.mapping[v];
            let image_attrs = target.edge_attrs(iu, iv).ok_or_else(|| {
                EngineError::InvalidHomomorphism(format!(
                    "edge '{}'->'{}' of '{}' has no image edge '{}'->'{}' in '{}'",
                    u, v, source.label, iu, iv, target.label
                ))
            })?;
            if !attrs.is_subset_of(image_attrs) {
                return Err(EngineError::InvalidHomomorphism(format!(
                    "attributes of edge '{}'->'{}' in '{}' exceed those of its image in '{}'",
                    u, v, source.label, target.label
                )));
            }
        }
        Ok(())
    }

    /// Map composition: `self` then `other`
    pub fn compose(&self, other: &Typing) -> Result<Typing, EngineError> {
        let mut mapping = BTreeMap::new();
        for (node, mid) in &self.mapping {
            let image = other.mapping.get(mid).ok_or_else(|| {
                EngineError::InvalidHomomorphism(format!(
                    "composition undefined: intermediate node '{}' has no image",
                    mid
                ))
            })?;
            mapping.insert(node.clone(), image.clone());
        }
        Ok(Typing { mapping })
    }
}

/// Helper for tests and bulk loads: attrs-free node list graph
pub fn plain_graph(
    label: &str,
    nodes: &[&str],
    edges: &[(&str, &str)],
) -> Result<AttrGraph, EngineError> {
    AttrGraph::from_lists(
        label,
        nodes.iter().map(|n| (n.to_string(), Attrs::new())).collect(),
        edges
            .iter()
            .map(|(u, v)| (u.to_string(), v.to_string(), Attrs::new()))
            .collect(),
    )
}
