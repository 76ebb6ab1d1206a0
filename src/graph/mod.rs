//! The compiled continuation graph.
//!
//! A [`Graph`] is an immutable arena of [`Node`]s shared by every token of an
//! execution through an `Arc`. It is produced by the compiler (or by tests)
//! through [`GraphBuilder`], which checks that every edge lands on a node.

mod builder;
mod node;

pub use builder::{GraphBuilder, GraphError};
pub use node::{Arg, Def, Node, SourceLocation};

use crate::types::NodeId;

/// Immutable node arena with a designated entry point.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    root: NodeId,
    free_vars: usize,
}

impl Graph {
    /// Entry node of the program.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Number of bindings the initial environment must supply.
    #[must_use]
    pub const fn free_vars(&self) -> usize {
        self.free_vars
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True for a graph without nodes (never produced by the builder).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node at `id`.
    ///
    /// Ids are only minted by the builder that validated this graph, so an
    /// out-of-range id is a bug in the caller.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Looks up `id` without panicking.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }
}
