//! Identifier types for engine entities.
//!
//! Regions, tokens and logical clocks live in arenas and are named by
//! generation-checked handles. Graph nodes are plain positions in the immutable
//! graph. Future cells and site calls are numbered from the execution's
//! sequence counter.

use crate::util::ArenaIndex;
use core::fmt;
use serde::Serialize;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(pub(crate) ArenaIndex);

        impl $name {
            #[must_use]
            #[allow(dead_code)]
            pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
                Self(index)
            }

            /// Underlying arena handle.
            #[must_use]
            #[allow(dead_code)]
            #[cfg(not(feature = "test-internals"))]
            pub(crate) const fn arena_index(self) -> ArenaIndex {
                self.0
            }

            /// Underlying arena handle.
            #[must_use]
            #[cfg(feature = "test-internals")]
            pub const fn arena_index(self) -> ArenaIndex {
                self.0
            }

            /// Id carried by a record that has not been stored yet.
            #[must_use]
            #[allow(dead_code)]
            pub(crate) const fn detached() -> Self {
                Self(ArenaIndex::new(u32::MAX, u32::MAX))
            }

            /// Builds an id for tests and benches.
            #[doc(hidden)]
            #[must_use]
            pub const fn new_for_test(index: u32, generation: u32) -> Self {
                Self(ArenaIndex::new(index, generation))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!(stringify!($name), "({}:{})"),
                    self.0.index(),
                    self.0.generation()
                )
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0.index())
            }
        }
    };
}

arena_id!(
    /// Handle of a region in the region tree.
    RegionId,
    "R"
);

arena_id!(
    /// Handle of a live token.
    TokenId,
    "T"
);

arena_id!(
    /// Handle of a registered logical clock.
    ClockId,
    "C"
);

/// Position of a node in its [`Graph`](crate::graph::Graph).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Position as a vector index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Number of a future cell, unique within one execution.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize)]
pub struct FutureId(pub(crate) u64);

impl fmt::Display for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Number of a site invocation, unique within one execution.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize)]
pub struct CallId(pub(crate) u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
