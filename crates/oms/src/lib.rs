//! # kb-oms
//!
//! Order lifecycle rules and the client-side order projection. The
//! lifecycle table decides which status changes are offered and requested;
//! the projection mirrors the Order Store's collection and merges every
//! pushed event or request response by order id.

pub mod lifecycle;
pub mod projection;

pub use lifecycle::{can_cancel, is_legal, next_statuses, validate_transition, LifecycleError};
pub use projection::{MergeOutcome, OrderProjection};
