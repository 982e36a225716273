//! Domain types shared by every kitchenboard crate.
//!
//! Identifiers are opaque strings assigned by the Order Store; money is
//! fixed-point so totals add up exactly.

pub mod money;
pub mod order;
pub mod product;
pub mod timestamp;

// Re-export primary types for convenient access via `kb_core::types::*`.
pub use money::Money;
pub use order::{
    Customer, CustomerError, LineItem, Order, OrderId, OrderStatus, StatusCounts, PHONE_DIGITS,
};
pub use product::{Product, ProductId};
pub use timestamp::utc_now;
