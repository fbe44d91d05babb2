//! Consistency propagation across the hierarchy
//!
//! After a rewrite of one graph, every typing edge touching it must be
//! made a valid homomorphism again. Upward (into the rewritten graph)
//! that means restriction: drop nodes and edges whose images vanished
//! and intersect attributes. Downward (out of it) it means extension:
//! create images for additions, force merges of images, and retype
//! clones with caller-supplied disambiguation. Both passes recurse
//! until the roots and leaves of the hierarchy are reached.

use crate::attrs::Attrs;
use crate::error::EngineError;
use crate::hierarchy::Hierarchy;
use crate::rewrite::RewriteResult;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Per-descendant clone/add disambiguation: graph label -> (R node -> image)
pub type RhsTyping = BTreeMap<String, BTreeMap<String, String>>;

/// Changes in one graph that its neighbours must absorb
#[derive(Debug, Clone, Default)]
struct Delta {
    removed_nodes: Vec<String>,
    /// survivor -> full group
    merged: BTreeMap<String, Vec<String>>,
    /// origin -> copies (origin first)
    cloned: BTreeMap<String, Vec<String>>,
    /// clone copy -> the R node that produced it
    copy_rhs: BTreeMap<String, String>,
    /// added node -> the R node that produced it, when one exists
    added_nodes: BTreeMap<String, Option<String>>,
    added_edges: Vec<(String, String)>,
    node_attrs_added: Vec<(String, Attrs)>,
    edge_attrs_added: Vec<(String, String, Attrs)>,
}

impl Delta {
    fn from_rewrite(result: &RewriteResult) -> Self {
        let mut delta = Delta {
            removed_nodes: result.diff.removed_nodes.clone(),
            merged: result.diff.merged_nodes.clone(),
            cloned: result.diff.cloned_nodes.clone(),
            added_edges: result.diff.added_edges.clone(),
            node_attrs_added: result.diff.node_attrs_added.clone(),
            edge_attrs_added: result.diff.edge_attrs_added.clone(),
            ..Delta::default()
        };
        let copies: BTreeSet<&String> = result
            .diff
            .cloned_nodes
            .values()
            .flat_map(|c| c.iter().skip(1))
            .collect();
        let added: BTreeSet<&String> = result.diff.added_nodes.iter().collect();
        for (r_node, id) in &result.rhs_instance {
            if copies.contains(id) {
                delta.copy_rhs.insert(id.clone(), r_node.clone());
            }
            if added.contains(id) {
                delta.added_nodes.insert(id.clone(), Some(r_node.clone()));
            }
        }
        delta
    }

    fn is_empty(&self) -> bool {
        self.removed_nodes.is_empty()
            && self.merged.is_empty()
            && self.cloned.is_empty()
            && self.added_nodes.is_empty()
            && self.added_edges.is_empty()
            && self.node_attrs_added.is_empty()
            && self.edge_attrs_added.is_empty()
    }
}

/// Restore the homomorphism invariant everywhere after a rewrite of
/// `graph`. Returns the labels of every other graph that was touched.
///
/// Clone propagation is fail-closed: when `graph` has descendants and
/// the rewrite cloned nodes, every clone needs an `rhs_typing` image in
/// each direct descendant, checked before any mutation.
pub fn propagate(
    hierarchy: &mut Hierarchy,
    graph: &str,
    result: &RewriteResult,
    rhs_typing: &RhsTyping,
) -> Result<Vec<String>, EngineError> {
    let delta = Delta::from_rewrite(result);

    // Fail-closed pre-check, before anything mutates
    for target in hierarchy.typings_out_of(graph) {
        for r_node in delta.copy_rhs.values() {
            let image = rhs_typing
                .get(&target)
                .and_then(|m| m.get(r_node))
                .ok_or_else(|| EngineError::AmbiguousDownstreamImage {
                    graph: target.clone(),
                    rhs_node: r_node.clone(),
                })?;
            if !hierarchy.graph(&target)?.has_node(image) {
                return Err(EngineError::UnknownNode {
                    graph: target.clone(),
                    node: image.clone(),
                });
            }
        }
    }

    let mut touched = Vec::new();
    for source in hierarchy.typings_into(graph) {
        restrict(hierarchy, &source, graph, &delta.merged, &mut touched)?;
    }
    for target in hierarchy.typings_out_of(graph) {
        extend(hierarchy, graph, &target, &delta, rhs_typing, &mut touched)?;
    }
    Ok(touched)
}

/// Upward pass: make the typing `source -> child` valid again by
/// shrinking `source`, then recurse to `source`'s own sources.
fn restrict(
    hierarchy: &mut Hierarchy,
    source: &str,
    child: &str,
    merged: &BTreeMap<String, Vec<String>>,
    touched: &mut Vec<String>,
) -> Result<(), EngineError> {
    debug!(source, child, "restricting ancestor");
    let child_graph = hierarchy.graph(child)?.clone();

    // Retarget mappings of merged child nodes onto the survivor
    {
        let typing = hierarchy
            .typing_mut(source, child)
            .ok_or_else(|| EngineError::UnknownGraph(source.to_string()))?;
        for (survivor, group) in merged {
            for image in typing.mapping.values_mut() {
                if image != survivor && group.contains(image) {
                    *image = survivor.clone();
                }
            }
        }
    }

    // Nodes whose image vanished go, cascading their edges
    let dead: Vec<String> = {
        let typing = hierarchy
            .typing(source, child)
            .ok_or_else(|| EngineError::UnknownGraph(source.to_string()))?;
        typing
            .mapping
            .iter()
            .filter(|(_, image)| !child_graph.has_node(image))
            .map(|(node, _)| node.clone())
            .collect()
    };
    if !dead.is_empty() {
        for node in &dead {
            hierarchy.graph_mut(source)?.remove_node(node)?;
        }
        let typing = hierarchy
            .typing_mut(source, child)
            .ok_or_else(|| EngineError::UnknownGraph(source.to_string()))?;
        for node in &dead {
            typing.mapping.remove(node);
        }
        // Deleted nodes also leave every other outgoing typing of source
        for other in hierarchy.typings_out_of(source) {
            if other == child {
                continue;
            }
            if let Some(t) = hierarchy.typing_mut(source, &other) {
                for node in &dead {
                    t.mapping.remove(node);
                }
            }
        }
    }

    let mapping = hierarchy
        .typing(source, child)
        .ok_or_else(|| EngineError::UnknownGraph(source.to_string()))?
        .mapping
        .clone();

    // Edges whose image edge vanished
    let stale_edges: Vec<(String, String)> = hierarchy
        .graph(source)?
        .edges()
        .filter(|((u, v), _)| !child_graph.has_edge(&mapping[u], &mapping[v]))
        .map(|((u, v), _)| (u.clone(), v.clone()))
        .collect();
    for (u, v) in &stale_edges {
        hierarchy.graph_mut(source)?.remove_edge(u, v)?;
    }

    // Attribute restriction: intersect with the (possibly shrunk) image
    let node_ids: Vec<String> = hierarchy.graph(source)?.node_ids().cloned().collect();
    for node in node_ids {
        let image_attrs = child_graph
            .node_attrs(&mapping[&node])
            .cloned()
            .unwrap_or_default();
        let graph = hierarchy.graph_mut(source)?;
        let current = graph
            .node_attrs(&node)
            .cloned()
            .unwrap_or_default();
        let restricted = current.intersection(&image_attrs);
        if restricted != current {
            graph.set_node_attrs(&node, restricted)?;
        }
    }
    let edge_keys: Vec<(String, String)> = hierarchy
        .graph(source)?
        .edges()
        .map(|((u, v), _)| (u.clone(), v.clone()))
        .collect();
    for (u, v) in edge_keys {
        let image_attrs = child_graph
            .edge_attrs(&mapping[&u], &mapping[&v])
            .cloned()
            .unwrap_or_default();
        let graph = hierarchy.graph_mut(source)?;
        let current = graph.edge_attrs(&u, &v).cloned().unwrap_or_default();
        let restricted = current.intersection(&image_attrs);
        if restricted != current {
            graph.set_edge_attrs(&u, &v, restricted)?;
        }
    }

    if !touched.contains(&source.to_string()) {
        touched.push(source.to_string());
    }
    for grand in hierarchy.typings_into(source) {
        restrict(hierarchy, &grand, source, &BTreeMap::new(), touched)?;
    }
    Ok(())
}

/// Downward pass: make the typing `graph -> target` valid again by
/// growing `target`, then recurse with `target`'s own delta.
fn extend(
    hierarchy: &mut Hierarchy,
    graph: &str,
    target: &str,
    delta: &Delta,
    rhs_typing: &RhsTyping,
    touched: &mut Vec<String>,
) -> Result<(), EngineError> {
    debug!(graph, target, "extending descendant");
    let mut target_delta = Delta::default();

    // Removed nodes simply leave the mapping
    {
        let typing = hierarchy
            .typing_mut(graph, target)
            .ok_or_else(|| EngineError::UnknownGraph(target.to_string()))?;
        for node in &delta.removed_nodes {
            typing.mapping.remove(node);
        }
    }

    // Merges force merges of distinct images
    for (survivor, group) in &delta.merged {
        let mapping = hierarchy
            .typing(graph, target)
            .ok_or_else(|| EngineError::UnknownGraph(target.to_string()))?
            .mapping
            .clone();
        let mut images: Vec<String> = Vec::new();
        for member in group {
            if let Some(image) = mapping.get(member) {
                if !images.contains(image) {
                    images.push(image.clone());
                }
            }
        }
        {
            let typing = hierarchy
                .typing_mut(graph, target)
                .ok_or_else(|| EngineError::UnknownGraph(target.to_string()))?;
            for member in group {
                if member != survivor {
                    typing.mapping.remove(member);
                }
            }
        }
        if images.len() > 1 {
            let image_survivor = hierarchy.graph_mut(target)?.merge_nodes(&images)?;
            // Every typing touching target follows the image merge
            for source in hierarchy.typings_into(target) {
                if let Some(t) = hierarchy.typing_mut(&source, target) {
                    for image in t.mapping.values_mut() {
                        if *image != image_survivor && images.contains(image) {
                            *image = image_survivor.clone();
                        }
                    }
                }
            }
            target_delta
                .merged
                .insert(image_survivor, images);
        }
        // Redirected edges on the survivor (self-loops in particular)
        // may lack image edges when the grouped images coincided
        ensure_incident_image_edges(hierarchy, graph, target, survivor, &mut target_delta)?;
    }

    // Clones retype through the caller-supplied disambiguation; the
    // chosen image absorbs the copy's attributes and incident edges.
    for copies in delta.cloned.values() {
        for copy in copies.iter().skip(1) {
            let r_node = &delta.copy_rhs[copy];
            let image = rhs_typing
                .get(target)
                .and_then(|m| m.get(r_node))
                .ok_or_else(|| EngineError::AmbiguousDownstreamImage {
                    graph: target.to_string(),
                    rhs_node: r_node.clone(),
                })?
                .clone();
            {
                let typing = hierarchy
                    .typing_mut(graph, target)
                    .ok_or_else(|| EngineError::UnknownGraph(target.to_string()))?;
                typing.mapping.insert(copy.clone(), image.clone());
            }
            let copy_attrs = hierarchy
                .graph(graph)?
                .node_attrs(copy)
                .cloned()
                .unwrap_or_default();
            if !copy_attrs.is_empty() {
                hierarchy
                    .graph_mut(target)?
                    .add_node_attrs(&image, &copy_attrs)?;
                target_delta
                    .node_attrs_added
                    .push((image.clone(), copy_attrs));
            }
            ensure_incident_image_edges(hierarchy, graph, target, copy, &mut target_delta)?;
        }
    }

    // Added nodes get images: the rhs_typing one when given, else fresh
    for (node, r_node) in &delta.added_nodes {
        let chosen = r_node
            .as_ref()
            .and_then(|r| rhs_typing.get(target).and_then(|m| m.get(r)))
            .cloned();
        let attrs = hierarchy
            .graph(graph)?
            .node_attrs(node)
            .cloned()
            .unwrap_or_default();
        let image = match chosen {
            Some(image) => {
                if !hierarchy.graph(target)?.has_node(&image) {
                    return Err(EngineError::UnknownNode {
                        graph: target.to_string(),
                        node: image,
                    });
                }
                if !attrs.is_empty() {
                    hierarchy.graph_mut(target)?.add_node_attrs(&image, &attrs)?;
                    target_delta
                        .node_attrs_added
                        .push((image.clone(), attrs));
                }
                image
            }
            None => {
                let fresh = hierarchy.graph(target)?.fresh_id(node);
                hierarchy.graph_mut(target)?.add_node(&fresh, attrs)?;
                target_delta.added_nodes.insert(fresh.clone(), None);
                fresh
            }
        };
        let typing = hierarchy
            .typing_mut(graph, target)
            .ok_or_else(|| EngineError::UnknownGraph(target.to_string()))?;
        typing.mapping.insert(node.clone(), image);
    }

    // Added edges and attribute additions push through to the images
    let mapping = hierarchy
        .typing(graph, target)
        .ok_or_else(|| EngineError::UnknownGraph(target.to_string()))?
        .mapping
        .clone();
    for (u, v) in &delta.added_edges {
        let attrs = hierarchy
            .graph(graph)?
            .edge_attrs(u, v)
            .cloned()
            .unwrap_or_default();
        let (iu, iv) = (mapping[u].clone(), mapping[v].clone());
        let target_graph = hierarchy.graph_mut(target)?;
        if target_graph.has_edge(&iu, &iv) {
            if !attrs.is_empty() {
                target_graph.add_edge_attrs(&iu, &iv, &attrs)?;
                target_delta
                    .edge_attrs_added
                    .push((iu, iv, attrs));
            }
        } else {
            target_graph.add_edge(&iu, &iv, attrs)?;
            target_delta.added_edges.push((iu, iv));
        }
    }
    for (node, attrs) in &delta.node_attrs_added {
        if let Some(image) = mapping.get(node) {
            hierarchy.graph_mut(target)?.add_node_attrs(image, attrs)?;
            target_delta
                .node_attrs_added
                .push((image.clone(), attrs.clone()));
        }
    }
    for (u, v, attrs) in &delta.edge_attrs_added {
        if let (Some(iu), Some(iv)) = (mapping.get(u), mapping.get(v)) {
            hierarchy.graph_mut(target)?.add_edge_attrs(iu, iv, attrs)?;
            target_delta
                .edge_attrs_added
                .push((iu.clone(), iv.clone(), attrs.clone()));
        }
    }

    if !touched.contains(&target.to_string()) {
        touched.push(target.to_string());
    }
    if !target_delta.is_empty() {
        for grand in hierarchy.typings_out_of(target) {
            extend(hierarchy, target, &grand, &target_delta, rhs_typing, touched)?;
        }
    }
    Ok(())
}

/// A retyped clone copy or a merge survivor may carry edges whose
/// images do not exist yet
fn ensure_incident_image_edges(
    hierarchy: &mut Hierarchy,
    graph: &str,
    target: &str,
    node: &str,
    target_delta: &mut Delta,
) -> Result<(), EngineError> {
    let mapping = hierarchy
        .typing(graph, target)
        .ok_or_else(|| EngineError::UnknownGraph(target.to_string()))?
        .mapping
        .clone();
    let source_graph = hierarchy.graph(graph)?.clone();
    let mut wanted: Vec<(String, String, Attrs)> = Vec::new();
    for v in source_graph.successors(node) {
        if let (Some(iu), Some(iv)) = (mapping.get(node), mapping.get(v)) {
            let attrs = source_graph.edge_attrs(node, v).cloned().unwrap_or_default();
            wanted.push((iu.clone(), iv.clone(), attrs));
        }
    }
    for u in source_graph.predecessors(node) {
        if let (Some(iu), Some(iv)) = (mapping.get(u), mapping.get(node)) {
            let attrs = source_graph.edge_attrs(u, node).cloned().unwrap_or_default();
            wanted.push((iu.clone(), iv.clone(), attrs));
        }
    }
    for (iu, iv, attrs) in wanted {
        let target_graph = hierarchy.graph_mut(target)?;
        if target_graph.has_edge(&iu, &iv) {
            if !attrs.is_empty() {
                target_graph.add_edge_attrs(&iu, &iv, &attrs)?;
                target_delta
                    .edge_attrs_added
                    .push((iu, iv, attrs));
            }
        } else {
            target_graph.add_edge(&iu, &iv, attrs)?;
            target_delta.added_edges.push((iu, iv));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::Attrs;
    use crate::graph::AttrGraph;
    use crate::pattern::Instance;
    use crate::rewrite::apply;
    use crate::rule::Rule;
    use crate::typing::{plain_graph, Typing};

    fn instance(pairs: &[(&str, &str)]) -> Instance {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// instances -> model -> schema, one node chain with an edge at each level
    fn three_level() -> Hierarchy {
        let mut h = Hierarchy::new();
        h.add_graph(
            "schema",
            vec![
                ("entity".to_string(), Attrs::from_value("kind", "any")),
                ("relation".to_string(), Attrs::new()),
            ],
            vec![("entity".to_string(), "relation".to_string(), Attrs::new())],
        )
        .unwrap();
        h.add_graph(
            "model",
            vec![
                ("person".to_string(), Attrs::from_value("kind", "any")),
                ("event".to_string(), Attrs::new()),
            ],
            vec![("person".to_string(), "event".to_string(), Attrs::new())],
        )
        .unwrap();
        h.add_graph(
            "instances",
            vec![
                ("alice".to_string(), Attrs::new()),
                ("party".to_string(), Attrs::new()),
            ],
            vec![("alice".to_string(), "party".to_string(), Attrs::new())],
        )
        .unwrap();
        h.add_typing(
            "instances",
            "model",
            Typing::from_pairs([("alice", "person"), ("party", "event")]),
        )
        .unwrap();
        h.add_typing(
            "model",
            "schema",
            Typing::from_pairs([("person", "entity"), ("event", "relation")]),
        )
        .unwrap();
        h
    }

    #[test]
    fn test_delete_restricts_ancestors() {
        let mut h = three_level();
        let mut rule = Rule::identity(plain_graph("pat", &["x", "y"], &[("x", "y")]).unwrap());
        rule.remove_edge("x", "y").unwrap();
        rule.remove_node("y").unwrap();
        let graph = h.graph_mut("model").unwrap();
        let result = apply(graph, &rule, &instance(&[("x", "person"), ("y", "event")])).unwrap();

        let touched = propagate(&mut h, "model", &result, &RhsTyping::new()).unwrap();
        assert!(touched.contains(&"instances".to_string()));
        assert!(!h.graph("instances").unwrap().has_node("party"));
        assert!(h.graph("instances").unwrap().has_node("alice"));
        h.validate().unwrap();
    }

    #[test]
    fn test_attr_removal_intersects_ancestors() {
        let mut h2 = three_level();
        // Give the instance node the attr first so restriction has work
        h2.graph_mut("instances")
            .unwrap()
            .add_node_attrs("alice", &Attrs::from_value("kind", "any"))
            .unwrap();
        let mut pat = AttrGraph::new("pat");
        pat.add_node("x", Attrs::from_value("kind", "any")).unwrap();
        let mut rule = Rule::identity(pat);
        rule.remove_node_attrs("x", &Attrs::from_value("kind", "any"))
            .unwrap();
        let graph = h2.graph_mut("model").unwrap();
        let result = apply(graph, &rule, &instance(&[("x", "person")])).unwrap();

        propagate(&mut h2, "model", &result, &RhsTyping::new()).unwrap();
        let attrs = h2.graph("instances").unwrap().node_attrs("alice").unwrap();
        assert!(!attrs.contains("kind", &"any".into()));
        h2.validate().unwrap();
    }

    #[test]
    fn test_add_extends_descendants() {
        let mut h = three_level();
        let mut rule = Rule::identity(plain_graph("pat", &["x"], &[]).unwrap());
        rule.add_node("gift", Attrs::from_value("kind", "any")).unwrap();
        rule.add_edge("x", "gift", Attrs::new()).unwrap();
        let graph = h.graph_mut("model").unwrap();
        let result = apply(graph, &rule, &instance(&[("x", "person")])).unwrap();

        let touched = propagate(&mut h, "model", &result, &RhsTyping::new()).unwrap();
        assert!(touched.contains(&"schema".to_string()));
        // A fresh image appeared in the schema and the typing covers it
        let mapping = &h.typing("model", "schema").unwrap().mapping;
        let image = &mapping["gift"];
        assert!(h.graph("schema").unwrap().has_node(image));
        h.validate().unwrap();
    }

    #[test]
    fn test_merge_forces_image_merge() {
        let mut h = three_level();
        let mut rule = Rule::identity(plain_graph("pat", &["x", "y"], &[]).unwrap());
        rule.merge_nodes(&["x".to_string(), "y".to_string()]).unwrap();
        let graph = h.graph_mut("model").unwrap();
        let result = apply(
            graph,
            &rule,
            &instance(&[("x", "person"), ("y", "event")]),
        )
        .unwrap();

        propagate(&mut h, "model", &result, &RhsTyping::new()).unwrap();
        // entity and relation collapsed in the schema as well
        let schema = h.graph("schema").unwrap();
        assert_eq!(schema.node_count(), 1);
        h.validate().unwrap();
    }

    #[test]
    fn test_clone_without_rhs_typing_fails_closed() {
        let mut h = three_level();
        let mut rule = Rule::identity(plain_graph("pat", &["x"], &[]).unwrap());
        rule.clone_node("x").unwrap();
        let graph = h.graph_mut("model").unwrap();
        let result = apply(graph, &rule, &instance(&[("x", "person")])).unwrap();

        let schema_before = h.graph("schema").unwrap().clone();
        let err = propagate(&mut h, "model", &result, &RhsTyping::new()).unwrap_err();
        assert!(matches!(err, EngineError::AmbiguousDownstreamImage { .. }));
        // Nothing downstream was touched
        assert_eq!(h.graph("schema").unwrap(), &schema_before);
    }

    #[test]
    fn test_clone_with_rhs_typing_retypes() {
        let mut h = three_level();
        let mut rule = Rule::identity(plain_graph("pat", &["x"], &[]).unwrap());
        rule.clone_node("x").unwrap();
        let graph = h.graph_mut("model").unwrap();
        let result = apply(graph, &rule, &instance(&[("x", "person")])).unwrap();
        let copy = result.diff.cloned_nodes["person"][1].clone();
        let r_node = result
            .rhs_instance
            .iter()
            .find(|(_, id)| **id == copy)
            .map(|(r, _)| r.clone())
            .unwrap();

        let mut rhs_typing = RhsTyping::new();
        rhs_typing.insert(
            "schema".to_string(),
            BTreeMap::from([(r_node, "entity".to_string())]),
        );
        propagate(&mut h, "model", &result, &rhs_typing).unwrap();
        let mapping = &h.typing("model", "schema").unwrap().mapping;
        assert_eq!(mapping[&copy], "entity");
        h.validate().unwrap();
    }
}
