//! Client-side mirror of the order collection.
//!
//! The projection is seeded from a REST load and then kept current by
//! merging pushed events and request responses. Every merge is keyed by
//! order id and replaces the whole entry; fields are never merged.

use std::collections::HashMap;

use kb_core::types::{Order, OrderId, OrderStatus, StatusCounts};
use parking_lot::RwLock;

/// What a merge did to the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new entry was appended.
    Inserted,
    /// An existing entry was replaced wholesale.
    Replaced,
    /// The order was unknown and the update was ignored.
    Dropped,
}

#[derive(Default)]
struct Entries {
    /// Display order: insertion order of first appearance.
    orders: Vec<Order>,
    index: HashMap<OrderId, usize>,
}

impl Entries {
    fn replace(&mut self, order: Order) -> MergeOutcome {
        match self.index.get(&order.id) {
            Some(&pos) => {
                self.orders[pos] = order;
                MergeOutcome::Replaced
            }
            None => MergeOutcome::Dropped,
        }
    }

    fn upsert(&mut self, order: Order) -> MergeOutcome {
        match self.index.get(&order.id) {
            Some(&pos) => {
                self.orders[pos] = order;
                MergeOutcome::Replaced
            }
            None => {
                self.index.insert(order.id.clone(), self.orders.len());
                self.orders.push(order);
                MergeOutcome::Inserted
            }
        }
    }
}

/// Id-keyed, insertion-ordered order cache.
///
/// Thread-safe: all methods take `&self`; writers hold the lock only for
/// the duration of a single merge.
#[derive(Default)]
pub struct OrderProjection {
    inner: RwLock<Entries>,
}

impl OrderProjection {
    /// Create an empty projection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole collection. Later duplicates of an id replace the
    /// earlier entry in place.
    pub fn seed(&self, orders: impl IntoIterator<Item = Order>) {
        let mut fresh = Entries::default();
        for order in orders {
            fresh.upsert(order);
        }
        let count = fresh.orders.len();
        *self.inner.write() = fresh;
        tracing::debug!(count, "projection seeded");
    }

    /// Merge an `ORDER_CREATED` event: append, or replace if the id is
    /// already known (duplicate delivery).
    pub fn apply_created(&self, order: Order) -> MergeOutcome {
        let id = order.id.clone();
        let outcome = self.inner.write().upsert(order);
        if outcome == MergeOutcome::Replaced {
            tracing::debug!(order_id = %id, "created event for known order applied as update");
        }
        outcome
    }

    /// Merge an `ORDER_UPDATED` event. Unknown ids are dropped.
    pub fn apply_updated(&self, order: Order) -> MergeOutcome {
        let id = order.id.clone();
        let outcome = self.inner.write().replace(order);
        if outcome == MergeOutcome::Dropped {
            tracing::debug!(order_id = %id, "update for unknown order dropped");
        }
        outcome
    }

    /// Merge the order returned by a successful request. Same rule as
    /// [`apply_updated`](Self::apply_updated).
    pub fn apply_response(&self, order: Order) -> MergeOutcome {
        let id = order.id.clone();
        let outcome = self.inner.write().replace(order);
        if outcome == MergeOutcome::Dropped {
            tracing::debug!(order_id = %id, "response for unknown order dropped");
        }
        outcome
    }

    /// Current value for `id`.
    pub fn get(&self, id: &OrderId) -> Option<Order> {
        let inner = self.inner.read();
        inner.index.get(id).map(|&pos| inner.orders[pos].clone())
    }

    /// Current status for `id`.
    pub fn status_of(&self, id: &OrderId) -> Option<OrderStatus> {
        let inner = self.inner.read();
        inner.index.get(id).map(|&pos| inner.orders[pos].status)
    }

    /// All entries in display order.
    pub fn snapshot(&self) -> Vec<Order> {
        self.inner.read().orders.clone()
    }

    /// Entries with the given status, or all entries for `None`.
    pub fn filter(&self, status: Option<OrderStatus>) -> Vec<Order> {
        let inner = self.inner.read();
        inner
            .orders
            .iter()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect()
    }

    /// Count of current entries per status.
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::new();
        for order in self.inner.read().orders.iter() {
            counts.increment(order.status);
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.inner.read().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
