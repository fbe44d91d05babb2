//! Rewrite rules as spans L <- P -> R
//!
//! `lhs` is the pattern to match, `p` the preserved core, `rhs` the
//! replacement. `p_lhs` is total on P nodes; L nodes outside its image
//! are deleted and a non-injective `p_lhs` encodes cloning. `p_rhs` is
//! total on P nodes and a non-injective `p_rhs` encodes merging.
//!
//! Builder primitives mutate the span in place and append to an op-log,
//! so a rule records exactly how it was assembled. The dangling-edge
//! application condition is checked statically, at build time.

use crate::attrs::Attrs;
use crate::error::EngineError;
use crate::graph::AttrGraph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One recorded builder primitive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RuleOp {
    RemoveNode { node: String },
    RemoveEdge { source: String, target: String },
    RemoveNodeAttrs { node: String, attrs: Attrs },
    RemoveEdgeAttrs { source: String, target: String, attrs: Attrs },
    CloneNode { node: String, clone: String },
    MergeNodes { nodes: Vec<String>, merged: String },
    AddNode { node: String, attrs: Attrs },
    AddEdge { source: String, target: String, attrs: Attrs },
    AddNodeAttrs { node: String, attrs: Attrs },
    AddEdgeAttrs { source: String, target: String, attrs: Attrs },
}

/// Double-pushout-style rewrite rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub lhs: AttrGraph,
    pub p: AttrGraph,
    pub rhs: AttrGraph,
    /// Total on P nodes; non-injective = clone
    pub p_lhs: BTreeMap<String, String>,
    /// Total on P nodes; non-injective = merge
    pub p_rhs: BTreeMap<String, String>,
    ops: Vec<RuleOp>,
}

impl Rule {
    /// Identity rule over a pattern: P and R start as copies of L
    pub fn identity(pattern: AttrGraph) -> Self {
        let mut p = pattern.clone();
        p.label = format!("{}_p", pattern.label);
        let mut rhs = pattern.clone();
        rhs.label = format!("{}_rhs", pattern.label);
        let id_map: BTreeMap<String, String> = pattern
            .node_ids()
            .map(|n| (n.clone(), n.clone()))
            .collect();
        Rule {
            lhs: pattern,
            p,
            rhs,
            p_lhs: id_map.clone(),
            p_rhs: id_map,
            ops: Vec::new(),
        }
    }

    /// Direct construction from an explicit span, statically validated
    pub fn new(
        lhs: AttrGraph,
        p: AttrGraph,
        rhs: AttrGraph,
        p_lhs: BTreeMap<String, String>,
        p_rhs: BTreeMap<String, String>,
    ) -> Result<Self, EngineError> {
        let rule = Rule {
            lhs,
            p,
            rhs,
            p_lhs,
            p_rhs,
            ops: Vec::new(),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn ops(&self) -> &[RuleOp] {
        &self.ops
    }

    /// Static rule validation: totality of both maps, structure
    /// preservation into L and R, and the dangling-edge condition.
    pub fn validate(&self) -> Result<(), EngineError> {
        for n in self.p.node_ids() {
            let l_img = self.p_lhs.get(n).ok_or_else(|| {
                EngineError::InvalidHomomorphism(format!("p_lhs has no image for P node '{}'", n))
            })?;
            if !self.lhs.has_node(l_img) {
                return Err(EngineError::InvalidHomomorphism(format!(
                    "p_lhs maps '{}' to missing L node '{}'",
                    n, l_img
                )));
            }
            let r_img = self.p_rhs.get(n).ok_or_else(|| {
                EngineError::InvalidHomomorphism(format!("p_rhs has no image for P node '{}'", n))
            })?;
            if !self.rhs.has_node(r_img) {
                return Err(EngineError::InvalidHomomorphism(format!(
                    "p_rhs maps '{}' to missing R node '{}'",
                    n, r_img
                )));
            }
        }
        for ((u, v), _) in self.p.edges() {
            let (lu, lv) = (&self.p_lhs[u], &self.p_lhs[v]);
            if !self.lhs.has_edge(lu, lv) {
                return Err(EngineError::InvalidHomomorphism(format!(
                    "P edge '{}'->'{}' has no L image edge",
                    u, v
                )));
            }
            let (ru, rv) = (&self.p_rhs[u], &self.p_rhs[v]);
            if !self.rhs.has_edge(ru, rv) {
                return Err(EngineError::InvalidHomomorphism(format!(
                    "P edge '{}'->'{}' has no R image edge",
                    u, v
                )));
            }
        }
        // Dangling condition: a preserved edge must not touch a deleted
        // L node via an endpoint with no preimage in P.
        let p_image: BTreeSet<&String> = self.p_lhs.values().collect();
        for ((u, v), _) in self.lhs.edges() {
            let u_deleted = !p_image.contains(u);
            let v_deleted = !p_image.contains(v);
            if (u_deleted || v_deleted) && self.edge_has_preimage(u, v) {
                let node = if u_deleted { u } else { v };
                return Err(EngineError::DanglingEdgeCondition {
                    node: node.clone(),
                    source: u.clone(),
                    target: v.clone(),
                });
            }
        }
        Ok(())
    }

    fn edge_has_preimage(&self, lu: &str, lv: &str) -> bool {
        self.p.edges().any(|((u, v), _)| {
            self.p_lhs.get(u).map(String::as_str) == Some(lu)
                && self.p_lhs.get(v).map(String::as_str) == Some(lv)
        })
    }

    /// Preimages of an L node in P
    pub fn p_preimages_of_lhs(&self, l_node: &str) -> Vec<String> {
        self.p_lhs
            .iter()
            .filter(|(_, v)| v.as_str() == l_node)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Preimages of an R node in P
    pub fn p_preimages_of_rhs(&self, r_node: &str) -> Vec<String> {
        self.p_rhs
            .iter()
            .filter(|(_, v)| v.as_str() == r_node)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// L nodes deleted by the rule (no preimage in P)
    pub fn removed_nodes(&self) -> Vec<String> {
        let image: BTreeSet<&String> = self.p_lhs.values().collect();
        self.lhs
            .node_ids()
            .filter(|n| !image.contains(n))
            .cloned()
            .collect()
    }

    /// L edges deleted by the rule (no preimage edge in P, both
    /// endpoints surviving; edges on deleted nodes go with their node)
    pub fn removed_edges(&self) -> Vec<(String, String)> {
        let image: BTreeSet<&String> = self.p_lhs.values().collect();
        self.lhs
            .edges()
            .filter(|((u, v), _)| {
                image.contains(u) && image.contains(v) && !self.edge_has_preimage(u, v)
            })
            .map(|((u, v), _)| (u.clone(), v.clone()))
            .collect()
    }

    /// L nodes cloned by the rule: (L node, its P preimages), k > 1
    pub fn cloned_nodes(&self) -> Vec<(String, Vec<String>)> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (p_node, l_node) in &self.p_lhs {
            groups.entry(l_node.clone()).or_default().push(p_node.clone());
        }
        groups.into_iter().filter(|(_, ps)| ps.len() > 1).collect()
    }

    /// R nodes merging several P nodes: (R node, its P preimages), k > 1
    pub fn merged_nodes(&self) -> Vec<(String, Vec<String>)> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (p_node, r_node) in &self.p_rhs {
            groups.entry(r_node.clone()).or_default().push(p_node.clone());
        }
        groups.into_iter().filter(|(_, ps)| ps.len() > 1).collect()
    }

    /// R nodes added by the rule (no preimage in P)
    pub fn added_nodes(&self) -> Vec<String> {
        let image: BTreeSet<&String> = self.p_rhs.values().collect();
        self.rhs
            .node_ids()
            .filter(|n| !image.contains(n))
            .cloned()
            .collect()
    }

    /// R edges added by the rule (no preimage edge in P)
    pub fn added_edges(&self) -> Vec<(String, String)> {
        self.rhs
            .edges()
            .filter(|((ru, rv), _)| {
                !self.p.edges().any(|((u, v), _)| {
                    self.p_rhs.get(u).map(String::as_str) == Some(ru.as_str())
                        && self.p_rhs.get(v).map(String::as_str) == Some(rv.as_str())
                })
            })
            .map(|((u, v), _)| (u.clone(), v.clone()))
            .collect()
    }

    // ---- builder primitives ----

    /// Schedule deletion of an L node: drop its preimages from P and R.
    ///
    /// Fails with `DanglingEdgeCondition` when a rule edge incident to
    /// those preimages would survive; callers remove edges first.
    pub fn remove_node(&mut self, node: &str) -> Result<(), EngineError> {
        if !self.lhs.has_node(node) {
            return Err(EngineError::UnknownNode {
                graph: self.lhs.label.clone(),
                node: node.to_string(),
            });
        }
        let preimages = self.p_preimages_of_lhs(node);
        for p_node in &preimages {
            if let Some(((u, v), _)) = self
                .p
                .edges()
                .find(|((u, v), _)| u == p_node || v == p_node)
            {
                return Err(EngineError::DanglingEdgeCondition {
                    node: node.to_string(),
                    source: self.p_lhs[u].clone(),
                    target: self.p_lhs[v].clone(),
                });
            }
        }
        for p_node in preimages {
            let r_node = self.p_rhs[&p_node].clone();
            self.p.remove_node(&p_node)?;
            self.p_lhs.remove(&p_node);
            self.p_rhs.remove(&p_node);
            // The R image goes too unless another P node still maps to it
            if self.p_preimages_of_rhs(&r_node).is_empty() && self.rhs.has_node(&r_node) {
                if self
                    .rhs
                    .edges()
                    .any(|((u, v), _)| u == &r_node || v == &r_node)
                {
                    return Err(EngineError::DanglingEdgeCondition {
                        node: node.to_string(),
                        source: r_node.clone(),
                        target: r_node.clone(),
                    });
                }
                self.rhs.remove_node(&r_node)?;
            }
        }
        self.ops.push(RuleOp::RemoveNode {
            node: node.to_string(),
        });
        Ok(())
    }

    /// Schedule deletion of an L edge: drop its preimages from P and R
    pub fn remove_edge(&mut self, source: &str, target: &str) -> Result<(), EngineError> {
        if !self.lhs.has_edge(source, target) {
            return Err(EngineError::MatchNotFound(format!(
                "edge '{}'->'{}' is not in the pattern",
                source, target
            )));
        }
        let preimage_edges: Vec<(String, String)> = self
            .p
            .edges()
            .filter(|((u, v), _)| {
                self.p_lhs[u].as_str() == source && self.p_lhs[v].as_str() == target
            })
            .map(|((u, v), _)| (u.clone(), v.clone()))
            .collect();
        for (u, v) in preimage_edges {
            let (ru, rv) = (self.p_rhs[&u].clone(), self.p_rhs[&v].clone());
            self.p.remove_edge(&u, &v)?;
            if self.rhs.has_edge(&ru, &rv) && !self.p_edge_maps_to_rhs(&ru, &rv) {
                self.rhs.remove_edge(&ru, &rv)?;
            }
        }
        self.ops.push(RuleOp::RemoveEdge {
            source: source.to_string(),
            target: target.to_string(),
        });
        Ok(())
    }

    fn p_edge_maps_to_rhs(&self, ru: &str, rv: &str) -> bool {
        self.p.edges().any(|((u, v), _)| {
            self.p_rhs[u].as_str() == ru && self.p_rhs[v].as_str() == rv
        })
    }

    /// Schedule removal of node attributes (kept in L, dropped from P/R)
    pub fn remove_node_attrs(&mut self, node: &str, attrs: &Attrs) -> Result<(), EngineError> {
        if !self.lhs.has_node(node) {
            return Err(EngineError::UnknownNode {
                graph: self.lhs.label.clone(),
                node: node.to_string(),
            });
        }
        for p_node in self.p_preimages_of_lhs(node) {
            let r_node = self.p_rhs[&p_node].clone();
            self.p.remove_node_attrs(&p_node, attrs)?;
            self.rhs.remove_node_attrs(&r_node, attrs)?;
        }
        self.ops.push(RuleOp::RemoveNodeAttrs {
            node: node.to_string(),
            attrs: attrs.clone(),
        });
        Ok(())
    }

    /// Schedule removal of edge attributes
    pub fn remove_edge_attrs(
        &mut self,
        source: &str,
        target: &str,
        attrs: &Attrs,
    ) -> Result<(), EngineError> {
        if !self.lhs.has_edge(source, target) {
            return Err(EngineError::MatchNotFound(format!(
                "edge '{}'->'{}' is not in the pattern",
                source, target
            )));
        }
        let preimage_edges: Vec<(String, String)> = self
            .p
            .edges()
            .filter(|((u, v), _)| {
                self.p_lhs[u].as_str() == source && self.p_lhs[v].as_str() == target
            })
            .map(|((u, v), _)| (u.clone(), v.clone()))
            .collect();
        for (u, v) in preimage_edges {
            let (ru, rv) = (self.p_rhs[&u].clone(), self.p_rhs[&v].clone());
            self.p.remove_edge_attrs(&u, &v, attrs)?;
            self.rhs.remove_edge_attrs(&ru, &rv, attrs)?;
        }
        self.ops.push(RuleOp::RemoveEdgeAttrs {
            source: source.to_string(),
            target: target.to_string(),
            attrs: attrs.clone(),
        });
        Ok(())
    }

    /// Clone an L node: a second preimage appears in P (and R), both
    /// inheriting every incident rule edge. Returns the new P/R id.
    pub fn clone_node(&mut self, node: &str) -> Result<String, EngineError> {
        if !self.lhs.has_node(node) {
            return Err(EngineError::UnknownNode {
                graph: self.lhs.label.clone(),
                node: node.to_string(),
            });
        }
        let preimages = self.p_preimages_of_lhs(node);
        let origin = preimages.first().ok_or_else(|| {
            EngineError::MatchNotFound(format!("node '{}' was already removed from P", node))
        })?;
        let p_clone = self.p.clone_node(origin, None)?;
        let r_origin = self.p_rhs[origin].clone();
        let r_clone = self.rhs.clone_node(&r_origin, Some(&p_clone))?;
        self.p_lhs.insert(p_clone.clone(), node.to_string());
        self.p_rhs.insert(p_clone.clone(), r_clone);
        self.ops.push(RuleOp::CloneNode {
            node: node.to_string(),
            clone: p_clone.clone(),
        });
        Ok(p_clone)
    }

    /// Merge several L nodes into one R node. Returns the new R id.
    pub fn merge_nodes(&mut self, nodes: &[String]) -> Result<String, EngineError> {
        if nodes.len() < 2 {
            return Err(EngineError::MatchNotFound(
                "merge needs at least two nodes".to_string(),
            ));
        }
        let mut r_targets: Vec<String> = Vec::new();
        for n in nodes {
            if !self.lhs.has_node(n) {
                return Err(EngineError::UnknownNode {
                    graph: self.lhs.label.clone(),
                    node: n.clone(),
                });
            }
            for p_node in self.p_preimages_of_lhs(n) {
                let r = self.p_rhs[&p_node].clone();
                if !r_targets.contains(&r) {
                    r_targets.push(r);
                }
            }
        }
        let merged = self.rhs.merge_nodes(&r_targets)?;
        for (_, r_node) in self.p_rhs.iter_mut() {
            if r_targets.contains(r_node) {
                *r_node = merged.clone();
            }
        }
        self.ops.push(RuleOp::MergeNodes {
            nodes: nodes.to_vec(),
            merged: merged.clone(),
        });
        Ok(merged)
    }

    /// Add a fresh node to R
    pub fn add_node(&mut self, node: &str, attrs: Attrs) -> Result<(), EngineError> {
        self.rhs.add_node(node, attrs.clone())?;
        self.ops.push(RuleOp::AddNode {
            node: node.to_string(),
            attrs,
        });
        Ok(())
    }

    /// Add an edge to R (between any two R nodes)
    pub fn add_edge(&mut self, source: &str, target: &str, attrs: Attrs) -> Result<(), EngineError> {
        self.rhs.add_edge(source, target, attrs.clone())?;
        self.ops.push(RuleOp::AddEdge {
            source: source.to_string(),
            target: target.to_string(),
            attrs,
        });
        Ok(())
    }

    /// Schedule addition of node attributes (applied on rewrite)
    pub fn add_node_attrs(&mut self, node: &str, attrs: &Attrs) -> Result<(), EngineError> {
        self.rhs.add_node_attrs(node, attrs)?;
        self.ops.push(RuleOp::AddNodeAttrs {
            node: node.to_string(),
            attrs: attrs.clone(),
        });
        Ok(())
    }

    /// Schedule addition of edge attributes (applied on rewrite)
    pub fn add_edge_attrs(
        &mut self,
        source: &str,
        target: &str,
        attrs: &Attrs,
    ) -> Result<(), EngineError> {
        self.rhs.add_edge_attrs(source, target, attrs)?;
        self.ops.push(RuleOp::AddEdgeAttrs {
            source: source.to_string(),
            target: target.to_string(),
            attrs: attrs.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typing::plain_graph;

    fn pattern() -> AttrGraph {
        plain_graph("pat", &["x", "y", "z"], &[("x", "y"), ("y", "z")]).unwrap()
    }

    #[test]
    fn test_identity_rule_changes_nothing() {
        let rule = Rule::identity(pattern());
        rule.validate().unwrap();
        assert!(rule.removed_nodes().is_empty());
        assert!(rule.removed_edges().is_empty());
        assert!(rule.added_nodes().is_empty());
        assert!(rule.cloned_nodes().is_empty());
        assert!(rule.merged_nodes().is_empty());
    }

    #[test]
    fn test_remove_node_rejects_surviving_edge() {
        let mut rule = Rule::identity(pattern());
        // x->y survives in P, so removing x must fail at build time
        let err = rule.remove_node("x").unwrap_err();
        assert!(matches!(err, EngineError::DanglingEdgeCondition { .. }));

        rule.remove_edge("x", "y").unwrap();
        rule.remove_node("x").unwrap();
        rule.validate().unwrap();
        assert_eq!(rule.removed_nodes(), vec!["x".to_string()]);
    }

    #[test]
    fn test_direct_construction_rejects_dangling_edge() {
        // P keeps edge x->y while x has no preimage: dangling by construction
        let lhs = plain_graph("l", &["x", "y"], &[("x", "y")]).unwrap();
        let p = plain_graph("p", &["py"], &[]).unwrap();
        let rhs = plain_graph("r", &["ry"], &[]).unwrap();
        let p_lhs = BTreeMap::from([("py".to_string(), "y".to_string())]);
        let p_rhs = BTreeMap::from([("py".to_string(), "ry".to_string())]);
        // No P edge maps onto x->y, so x's deletion silently drops the edge
        let rule = Rule::new(lhs, p, rhs, p_lhs, p_rhs).unwrap();
        assert_eq!(rule.removed_nodes(), vec!["x".to_string()]);

        // Now a span where a preserved edge touches the deleted node
        let lhs = plain_graph("l", &["x", "y"], &[("x", "y")]).unwrap();
        let p = plain_graph("p", &["px", "py"], &[("px", "py")]).unwrap();
        let rhs = plain_graph("r", &["ry"], &[]).unwrap();
        let p_lhs = BTreeMap::from([
            ("px".to_string(), "x".to_string()),
            ("py".to_string(), "y".to_string()),
        ]);
        let p_rhs = BTreeMap::from([
            ("px".to_string(), "ry".to_string()),
            ("py".to_string(), "ry".to_string()),
        ]);
        // P edge px->py needs R image edge ry->ry which is absent
        assert!(Rule::new(lhs, p, rhs, p_lhs, p_rhs).is_err());
    }

    #[test]
    fn test_clone_records_second_preimage() {
        let mut rule = Rule::identity(pattern());
        let clone = rule.clone_node("y").unwrap();
        assert_eq!(clone, "y1");
        let cloned = rule.cloned_nodes();
        assert_eq!(cloned.len(), 1);
        assert_eq!(cloned[0].0, "y");
        assert_eq!(cloned[0].1.len(), 2);
        // Both preimages inherit the incident edges in P
        assert!(rule.p.has_edge("x", "y1"));
        assert!(rule.p.has_edge("y1", "z"));
        rule.validate().unwrap();
    }

    #[test]
    fn test_merge_retargets_p_rhs() {
        let mut rule = Rule::identity(pattern());
        let merged = rule
            .merge_nodes(&["x".to_string(), "z".to_string()])
            .unwrap();
        assert_eq!(merged, "x");
        let groups = rule.merged_nodes();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.len(), 2);
        // R collapsed x and z; the chain x->y->z folds onto the merged node
        assert!(rule.rhs.has_edge("x", "y"));
        assert!(rule.rhs.has_edge("y", "x"));
        rule.validate().unwrap();
    }

    #[test]
    fn test_add_primitives_extend_rhs_only() {
        let mut rule = Rule::identity(pattern());
        rule.add_node("w", Attrs::from_value("kind", "new")).unwrap();
        rule.add_edge("z", "w", Attrs::new()).unwrap();
        assert_eq!(rule.added_nodes(), vec!["w".to_string()]);
        assert_eq!(rule.added_edges(), vec![("z".to_string(), "w".to_string())]);
        assert!(!rule.lhs.has_node("w"));
        assert!(!rule.p.has_node("w"));
        rule.validate().unwrap();
    }

    #[test]
    fn test_attr_deltas_recorded() {
        let mut rule = Rule::identity(pattern());
        rule.add_node_attrs("x", &Attrs::from_value("state", "active"))
            .unwrap();
        rule.remove_node_attrs("y", &Attrs::from_value("old", "1"))
            .unwrap();
        assert_eq!(rule.ops().len(), 2);
    }
}
