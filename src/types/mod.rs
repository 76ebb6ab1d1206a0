//! Core types shared by the graph, the environment and the scheduler.
//!
//! - [`id`]: identifier types (`RegionId`, `TokenId`, `ClockId`, `NodeId`, ...)
//! - [`value`]: resolved runtime values and closures
//! - [`future`]: future cells, bindings and the result of forcing one

pub mod future;
pub mod id;
pub mod value;

pub use future::{Binding, Forced, Future, FutureError};
pub use id::{CallId, ClockId, FutureId, NodeId, RegionId, TokenId};
pub use value::{Closure, Value};
