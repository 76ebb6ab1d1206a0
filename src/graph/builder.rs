//! Incremental construction of a [`Graph`].

use std::sync::Arc;

use super::{Arg, Def, Graph, Node, SourceLocation};
use crate::types::NodeId;

/// Structural problems found when sealing a graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// An edge points past the end of the node arena.
    #[error("node {from} refers to missing node {to}")]
    DanglingEdge {
        /// Node holding the edge.
        from: NodeId,
        /// Missing target.
        to: NodeId,
    },
    /// The entry point does not exist.
    #[error("root {0} is not a node of the graph")]
    MissingRoot(NodeId),
    /// Two definitions in one group share a name.
    #[error("definition `{name}` appears twice in group {defs}")]
    DuplicateDef {
        /// The `Defs` node.
        defs: NodeId,
        /// Repeated name.
        name: Arc<str>,
    },
    /// More nodes than a `NodeId` can address.
    #[error("graph exceeds the addressable node count")]
    TooLarge,
}

/// Appends nodes and hands back their ids.
///
/// Nodes are usually added leaves-first so successors already exist; the
/// check happens once, in [`build`](Self::build).
#[derive(Debug)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    free_vars: usize,
    publish: Option<NodeId>,
    silent: Option<NodeId>,
}

impl GraphBuilder {
    /// Starts a graph whose program expects `free_vars` initial bindings.
    #[must_use]
    pub const fn new(free_vars: usize) -> Self {
        Self {
            nodes: Vec::new(),
            free_vars,
            publish: None,
            silent: None,
        }
    }

    /// Appends `node`.
    pub fn add(&mut self, node: Node) -> NodeId {
        // Oversized graphs are reported by build().
        #[allow(clippy::cast_possible_truncation)]
        let id = NodeId(self.nodes.len().min(u32::MAX as usize) as u32);
        self.nodes.push(node);
        id
    }

    /// Shared `Publish` node.
    pub fn publish(&mut self) -> NodeId {
        if let Some(id) = self.publish {
            return id;
        }
        let id = self.add(Node::Publish);
        self.publish = Some(id);
        id
    }

    /// Shared `Silent` node.
    pub fn silent(&mut self) -> NodeId {
        if let Some(id) = self.silent {
            return id;
        }
        let id = self.add(Node::Silent);
        self.silent = Some(id);
        id
    }

    /// `callee(args)` continuing at `next`.
    pub fn call(&mut self, callee: impl Into<Arg>, args: Vec<Arg>, next: NodeId) -> NodeId {
        self.add(Node::Call {
            callee: callee.into(),
            args,
            next,
            location: None,
        })
    }

    /// `callee(args)` with a source location for error reports.
    pub fn call_at(
        &mut self,
        callee: impl Into<Arg>,
        args: Vec<Arg>,
        next: NodeId,
        location: SourceLocation,
    ) -> NodeId {
        self.add(Node::Call {
            callee: callee.into(),
            args,
            next,
            location: Some(location),
        })
    }

    /// `callee(args)` whose publications are published directly.
    pub fn call_publish(&mut self, callee: impl Into<Arg>, args: Vec<Arg>) -> NodeId {
        let publish = self.publish();
        self.call(callee, args, publish)
    }

    /// `left | right`.
    pub fn fork(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.add(Node::Fork { left, right })
    }

    /// `left >x> right`.
    pub fn push(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.add(Node::Push { left, right })
    }

    /// `left >> right`.
    pub fn pull(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.add(Node::Pull { left, right })
    }

    /// `left ; right` in the run-after-exhaustion sense.
    pub fn semi(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.add(Node::Semi { left, right })
    }

    /// `left ; right` in the fallback sense.
    pub fn otherwise(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.add(Node::Otherwise { left, right })
    }

    /// `body <x< dependency`.
    pub fn pruning(&mut self, body: NodeId, dependency: NodeId, name: Option<&str>) -> NodeId {
        self.add(Node::Pruning {
            body,
            dependency,
            name: name.map(Arc::from),
        })
    }

    /// Definition group scoped over `body`.
    pub fn defs(&mut self, defs: Vec<Def>, body: NodeId) -> NodeId {
        self.add(Node::Defs { defs, body })
    }

    /// Drops `width` bindings before `next`.
    pub fn unwind(&mut self, width: usize, next: NodeId) -> NodeId {
        self.add(Node::Unwind { width, next })
    }

    /// Runs `body` under a nested logical clock.
    pub fn with_clock(&mut self, body: NodeId) -> NodeId {
        self.add(Node::WithClock { body })
    }

    /// Validates every edge and seals the graph.
    pub fn build(self, root: NodeId) -> Result<Graph, GraphError> {
        if u32::try_from(self.nodes.len()).is_err() {
            return Err(GraphError::TooLarge);
        }
        let len = self.nodes.len();
        if root.index() >= len {
            return Err(GraphError::MissingRoot(root));
        }
        for (position, node) in self.nodes.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let from = NodeId(position as u32);
            if let Some(to) = node.successors().into_iter().find(|to| to.index() >= len) {
                return Err(GraphError::DanglingEdge { from, to });
            }
            if let Node::Defs { defs, .. } = node {
                check_unique_names(from, defs)?;
            }
        }
        Ok(Graph {
            nodes: self.nodes,
            root,
            free_vars: self.free_vars,
        })
    }
}

fn check_unique_names(from: NodeId, defs: &[Def]) -> Result<(), GraphError> {
    for (i, def) in defs.iter().enumerate() {
        if defs[..i].iter().any(|other| other.name == def.name) {
            return Err(GraphError::DuplicateDef {
                defs: from,
                name: def.name.clone(),
            });
        }
    }
    Ok(())
}
