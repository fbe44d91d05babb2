//! Integration Tests - End-to-End Scenarios
//!
//! Tests complete workflows against the full engine: hierarchy setup,
//! matching, rewriting with propagation, and storage sync.

use hierograph::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn instance(pairs: &[(&str, &str)]) -> Instance {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn nodes(list: &[(&str, Attrs)]) -> Vec<(String, Attrs)> {
    list.iter().map(|(id, a)| (id.to_string(), a.clone())).collect()
}

fn edges(list: &[(&str, &str)]) -> Vec<(String, String, Attrs)> {
    list.iter()
        .map(|(u, v)| (u.to_string(), v.to_string(), Attrs::new()))
        .collect()
}

/// Build the action-model hierarchy used across these tests:
/// `world` (concrete agents) -> `kinds` (agent kinds) -> `meta` (schema).
fn action_model(engine: &Engine) {
    engine
        .add_graph(
            "meta",
            nodes(&[
                (
                    "component",
                    Attrs::from_pairs([
                        ("layer", vec!["meta"]),
                        ("family", vec!["receptor", "adaptor"]),
                    ]),
                ),
                ("action", Attrs::new()),
            ]),
            edges(&[
                ("component", "action"),
                ("action", "component"),
                ("component", "component"),
            ]),
        )
        .unwrap();
    engine
        .add_graph(
            "kinds",
            nodes(&[
                (
                    "agent",
                    Attrs::from_pairs([
                        ("layer", vec!["meta"]),
                        ("family", vec!["receptor", "adaptor"]),
                    ]),
                ),
                ("region", Attrs::from_value("layer", "meta")),
                ("binds", Attrs::new()),
            ]),
            edges(&[("region", "agent"), ("agent", "binds"), ("binds", "agent")]),
        )
        .unwrap();
    engine
        .add_graph(
            "world",
            nodes(&[
                ("egfr", Attrs::from_value("family", "receptor")),
                ("egfr_site", Attrs::new()),
                ("grb2", Attrs::from_value("family", "adaptor")),
                ("contact", Attrs::new()),
            ]),
            edges(&[
                ("egfr_site", "egfr"),
                ("egfr", "contact"),
                ("contact", "grb2"),
            ]),
        )
        .unwrap();
    engine
        .add_typing(
            "kinds",
            "meta",
            Typing::from_pairs([
                ("agent", "component"),
                ("region", "component"),
                ("binds", "action"),
            ]),
        )
        .unwrap();
    engine
        .add_typing(
            "world",
            "kinds",
            Typing::from_pairs([
                ("egfr", "agent"),
                ("egfr_site", "region"),
                ("grb2", "agent"),
                ("contact", "binds"),
            ]),
        )
        .unwrap();
}

/// Test: full hierarchy lifecycle with a mid-level rewrite
#[test]
fn test_midlevel_rewrite_propagates_both_ways() {
    init_tracing();
    let backend = Arc::new(MemBackend::new());
    let engine = Engine::new(backend.clone());
    action_model(&engine);
    engine.validate().unwrap();

    // Rewrite the kinds level: retire the binding action node
    let mut pattern = AttrGraph::new("pat");
    pattern.add_node("b", Attrs::new()).unwrap();
    pattern.add_node("a", Attrs::from_value("layer", "meta")).unwrap();
    pattern.add_edge("a", "b", Attrs::new()).unwrap();
    pattern.add_edge("b", "a", Attrs::new()).unwrap();
    let matches = engine.find_matching("kinds", &pattern).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["b"], "binds");

    let mut rule = Rule::identity(pattern);
    rule.remove_edge("a", "b").unwrap();
    rule.remove_edge("b", "a").unwrap();
    rule.remove_node("b").unwrap();
    engine
        .rewrite("kinds", &rule, &matches[0], &RhsTyping::new())
        .unwrap();

    // Upward: the concrete contact disappeared with its action kind
    engine.with_hierarchy(|h| {
        let world = h.graph("world").unwrap();
        assert!(!world.has_node("contact"));
        assert!(world.has_node("egfr"));
        assert!(world.has_node("grb2"));
    });
    // Downward: the meta level kept its action node (mapping just shrank)
    engine.with_hierarchy(|h| {
        assert!(h.graph("meta").unwrap().has_node("action"));
    });
    engine.validate().unwrap();

    // Store mirrors the model for every touched graph
    for label in ["world", "kinds", "meta"] {
        let (stored_nodes, stored_edges) = backend.graph_state(label).unwrap();
        engine.with_hierarchy(|h| {
            let model = h.graph(label).unwrap();
            assert_eq!(stored_nodes.len(), model.node_count(), "{} nodes", label);
            assert_eq!(stored_edges.len(), model.edge_count(), "{} edges", label);
        });
    }

    println!("✓ Mid-level rewrite propagated up and down");
}

/// Test: merge at the bottom forces merges all the way up the chain
#[test]
fn test_merge_cascades_to_every_level() {
    init_tracing();
    let backend = Arc::new(MemBackend::new());
    let engine = Engine::new(backend.clone());
    action_model(&engine);

    let mut pattern = AttrGraph::new("pat");
    pattern.add_node("x", Attrs::new()).unwrap();
    pattern.add_node("y", Attrs::new()).unwrap();
    let mut rule = Rule::identity(pattern);
    rule.merge_nodes(&["x".to_string(), "y".to_string()]).unwrap();

    // Merge a region into an agent at the world level
    engine
        .rewrite(
            "world",
            &rule,
            &instance(&[("x", "egfr"), ("y", "egfr_site")]),
            &RhsTyping::new(),
        )
        .unwrap();

    engine.with_hierarchy(|h| {
        let world = h.graph("world").unwrap();
        assert!(world.has_node("egfr"));
        assert!(!world.has_node("egfr_site"));
        // The forced merge collapsed agent and region in kinds
        let kinds = h.graph("kinds").unwrap();
        assert!(!(kinds.has_node("agent") && kinds.has_node("region")));
    });
    engine.validate().unwrap();
    println!("✓ Merge cascaded through the hierarchy");
}

/// Test: clone with explicit disambiguation keeps every typing valid
#[test]
fn test_clone_with_disambiguation() {
    init_tracing();
    let backend = Arc::new(MemBackend::new());
    let engine = Engine::new(backend);
    action_model(&engine);

    let mut pattern = AttrGraph::new("pat");
    pattern
        .add_node("x", Attrs::from_value("family", "receptor"))
        .unwrap();
    let mut rule = Rule::identity(pattern);
    rule.clone_node("x").unwrap();

    // Without disambiguation the rewrite must fail closed
    let err = engine
        .rewrite("world", &rule, &instance(&[("x", "egfr")]), &RhsTyping::new())
        .unwrap_err();
    assert!(matches!(err, EngineError::AmbiguousDownstreamImage { .. }));

    // The clone's R node is the one the builder returned
    let clone_r = rule
        .p_rhs
        .values()
        .find(|r| r.as_str() != "x")
        .cloned()
        .unwrap();
    let mut rhs_typing = RhsTyping::new();
    rhs_typing.insert(
        "kinds".to_string(),
        BTreeMap::from([(clone_r, "agent".to_string())]),
    );
    engine
        .rewrite("world", &rule, &instance(&[("x", "egfr")]), &rhs_typing)
        .unwrap();

    engine.with_hierarchy(|h| {
        let world = h.graph("world").unwrap();
        assert_eq!(world.node_count(), 5);
        assert!(world.has_node("egfr1"));
        // The copy kept the full attribute set
        assert!(world
            .node_attrs("egfr1")
            .unwrap()
            .contains("family", &"receptor".into()));
    });
    engine.validate().unwrap();
    println!("✓ Clone propagated with explicit disambiguation");
}

/// Test: adding structure at the bottom grows images in every level above
#[test]
fn test_add_grows_type_chain() {
    init_tracing();
    let backend = Arc::new(MemBackend::new());
    let engine = Engine::new(backend.clone());
    action_model(&engine);

    let mut pattern = AttrGraph::new("pat");
    pattern.add_node("x", Attrs::new()).unwrap();
    let mut rule = Rule::identity(pattern);
    rule.add_node("shc", Attrs::from_value("family", "adaptor")).unwrap();
    rule.add_edge("shc", "x", Attrs::new()).unwrap();

    engine
        .rewrite("world", &rule, &instance(&[("x", "egfr")]), &RhsTyping::new())
        .unwrap();

    engine.with_hierarchy(|h| {
        assert!(h.graph("world").unwrap().has_node("shc"));
        // A fresh kind and a fresh meta component were synthesized
        let kinds_typing = &h.typing("world", "kinds").unwrap().mapping;
        let kind = &kinds_typing["shc"];
        assert!(h.graph("kinds").unwrap().has_node(kind));
        let meta_typing = &h.typing("kinds", "meta").unwrap().mapping;
        assert!(h.graph("meta").unwrap().has_node(&meta_typing[kind]));
    });
    engine.validate().unwrap();
    println!("✓ Added structure grew the type chain");
}

/// Test: pullback construction plus graph removal with reconnect
#[test]
fn test_pullback_and_reconnect() {
    init_tracing();
    let backend = Arc::new(MemBackend::new());
    let engine = Engine::new(backend.clone());
    action_model(&engine);

    // Second branch into kinds, sharing images with world
    engine
        .add_graph(
            "other_world",
            nodes(&[("ras", Attrs::new()), ("link", Attrs::new())]),
            edges(&[("ras", "link"), ("link", "ras")]),
        )
        .unwrap();
    engine
        .add_typing(
            "other_world",
            "kinds",
            Typing::from_pairs([("ras", "agent"), ("link", "binds")]),
        )
        .unwrap();

    engine.pullback("world", "other_world", "kinds", "overlap").unwrap();
    engine.with_hierarchy(|h| {
        let overlap = h.graph("overlap").unwrap();
        // agents x agents and binds x binds pair up
        assert!(overlap.has_node("egfr_ras"));
        assert!(overlap.has_node("grb2_ras"));
        assert!(overlap.has_node("contact_link"));
        assert!(h.typing("overlap", "world").is_some());
        assert!(h.typing("overlap", "other_world").is_some());
    });
    let (stored_nodes, _) = backend.graph_state("overlap").unwrap();
    assert!(stored_nodes.contains_key("egfr_ras"));

    // Removing the mid level with reconnect keeps world typed into meta
    engine.remove_graph("kinds", true).unwrap();
    engine.with_hierarchy(|h| {
        let spliced = h.typing("world", "meta").unwrap();
        assert_eq!(spliced.mapping["egfr"], "component");
        assert_eq!(spliced.mapping["contact"], "action");
    });
    engine.validate().unwrap();
    println!("✓ Pullback built and mid level spliced out");
}

/// Test: repeated rewrites keep stats and storage accounting coherent
#[test]
fn test_stats_accumulate() {
    init_tracing();
    let backend = Arc::new(MemBackend::new());
    let engine = Engine::new(backend);
    engine
        .add_graph(
            "g",
            nodes(&[("a", Attrs::new()), ("b", Attrs::new())]),
            edges(&[("a", "b")]),
        )
        .unwrap();

    let mut pattern = AttrGraph::new("pat");
    pattern.add_node("x", Attrs::new()).unwrap();
    for step in 0..3i64 {
        let mut rule = Rule::identity(pattern.clone());
        rule.add_node_attrs("x", &Attrs::from_value("step", step)).unwrap();
        engine
            .rewrite("g", &rule, &instance(&[("x", "a")]), &RhsTyping::new())
            .unwrap();
    }
    let stats = engine.stats();
    assert_eq!(stats.rewrites, 3);
    assert!(stats.work_units >= 3);
    println!("✓ Stats accumulated over {} rewrites", stats.rewrites);
}
