//! Engine records for regions, tokens and logical clocks.
//!
//! Records hold state and enforce local bookkeeping rules. Cross-record
//! protocols (close propagation, migration, clock gating) live in
//! [`runtime::state`](crate::runtime::state).

pub mod clock;
pub mod region;
pub mod token;

pub use clock::{LogicalClock, Released};
pub use region::{RegionError, RegionKind, RegionRecord, RegionState};
pub use token::{Continuation, Frame, TokenRecord, TokenState};
