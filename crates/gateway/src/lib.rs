//! # kb-gateway
//!
//! Access to the Order Store: the [`OrderStore`] contract, the HTTP client
//! used in production, and an in-memory store that enforces the same rules
//! for tests and offline use.

pub mod error;
pub mod memory;
pub mod rest;
pub mod store;

pub use error::GatewayError;
pub use memory::{MemoryOrderStore, StoreEvent};
pub use rest::RestOrderStore;
pub use store::{
    list_all_orders, NewLineItem, NewOrderRequest, OrderPage, OrderQuery, OrderStore, ProductPage,
    ProductQuery, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
