//! Execution trace side channel.
//!
//! - [`event`]: event kinds and payloads, serializable as JSON lines
//! - [`buffer`]: bounded ring the scheduler records into

pub mod buffer;
pub mod event;

pub use buffer::TraceBuffer;
pub use event::{DeathCause, TraceData, TraceEvent, TraceEventKind};
