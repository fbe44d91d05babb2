//! Hierograph - Hierarchical Graph Rewriting Engine
//!
//! A hierarchy of typed, attributed directed graphs connected by
//! structure-preserving typing maps, with rule-based rewriting (add,
//! remove, clone, merge, attribute update) at any level and automatic
//! propagation so every typing stays a valid homomorphism.
//!
//! # Architecture
//!
//! - Attribute Layer: multi-valued attribute maps with set algebra
//! - Graph Layer: attributed directed graphs with adjacency indexes
//! - Hierarchy Layer: DAG of graphs linked by validated typings
//! - Matching Layer: backtracking subgraph pattern search
//! - Rewrite Layer: span rules (L <- P -> R) with clone/merge primitives
//! - Propagation Layer: pullback restriction up, pushout extension down
//! - Compiler Layer: one atomic op batch per rewrite
//! - Storage Layer: pluggable collaborator behind `GraphStore`

pub mod attrs;
pub mod graph;
pub mod typing;
pub mod hierarchy;
pub mod pattern;
pub mod error;

// Rewriting modules
pub mod rule;
pub mod rewrite;
pub mod propagation;

// Storage boundary modules
pub mod compiler;
pub mod store;
pub mod engine;

pub use attrs::{AttrSet, AttrValue, Attrs};
pub use graph::AttrGraph;
pub use typing::Typing;
pub use hierarchy::Hierarchy;
pub use pattern::{check_instance, find_matching, Instance};
pub use error::EngineError;

// Rewriting exports
pub use rule::{Rule, RuleOp};
pub use rewrite::{apply, RewriteDiff, RewriteResult};
pub use propagation::{propagate, RhsTyping};

// Storage boundary exports
pub use compiler::{compile_rewrite, compile_sync, CompiledUnit, MergeStrategy, OpGroup, StoreOp};
pub use store::{ExecReport, GraphStore, MemBackend};
pub use engine::{Engine, EngineStats};
