//! Internal utilities: the record arena and the event sequence counter.

pub mod arena;
pub mod seq;

pub use arena::{Arena, ArenaIndex};
pub use seq::SeqGen;
