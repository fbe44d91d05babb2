//! Error taxonomy for the rewriting engine
//!
//! Statically determinable violations (dangling edges, malformed typings)
//! are raised at build/declare time; dynamic ones (stale instances,
//! storage conflicts) at apply time. Nothing is silently patched.

/// Engine-wide error type
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A graph with this label already exists in the hierarchy
    DuplicateGraphLabel(String),
    /// Referenced graph label is not in the hierarchy
    UnknownGraph(String),
    /// Referenced node is not in the named graph
    UnknownNode { graph: String, node: String },
    /// A node with this id already exists in the named graph
    DuplicateNode { graph: String, node: String },
    /// Typing mapping is not total, not edge-preserving, not
    /// attribute-preserving, or breaks composability / acyclicity
    InvalidHomomorphism(String),
    /// Rule construction would delete a node while an incident edge
    /// survives in the preserved or replacement graph
    DanglingEdgeCondition {
        node: String,
        source: String,
        target: String,
    },
    /// Instance no longer embeds into the current graph state
    MatchNotFound(String),
    /// Clone propagation lacks an rhs_typing image for a descendant
    AmbiguousDownstreamImage {
        graph: String,
        rhs_node: String,
    },
    /// Attribute value rejected at the boundary (e.g. null)
    InvalidAttrValue(String),
    /// Storage collaborator failure; hierarchy requires re-validation
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::DuplicateGraphLabel(label) => {
                write!(f, "Graph '{}' already exists in the hierarchy", label)
            }
            EngineError::UnknownGraph(label) => {
                write!(f, "Graph '{}' is not in the hierarchy", label)
            }
            EngineError::UnknownNode { graph, node } => {
                write!(f, "Node '{}' is not in graph '{}'", node, graph)
            }
            EngineError::DuplicateNode { graph, node } => {
                write!(f, "Node '{}' already exists in graph '{}'", node, graph)
            }
            EngineError::InvalidHomomorphism(msg) => {
                write!(f, "Invalid homomorphism: {}", msg)
            }
            EngineError::DanglingEdgeCondition {
                node,
                source,
                target,
            } => write!(
                f,
                "Removing node '{}' would orphan surviving edge '{}'->'{}'",
                node, source, target
            ),
            EngineError::MatchNotFound(msg) => {
                write!(f, "Instance is stale or invalid: {}", msg)
            }
            EngineError::AmbiguousDownstreamImage { graph, rhs_node } => write!(
                f,
                "Clone propagation to graph '{}' needs an rhs_typing image for node '{}'",
                graph, rhs_node
            ),
            EngineError::InvalidAttrValue(msg) => {
                write!(f, "Invalid attribute value: {}", msg)
            }
            EngineError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}
