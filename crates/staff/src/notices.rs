//! Transient user-facing notices.
//!
//! The board holds at most one notice. Posting replaces the current one;
//! each notice clears itself after the configured TTL unless it has been
//! replaced or dismissed first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

pub const LOAD_ORDERS_FAILED: &str = "Failed to load orders";
pub const UPDATE_STATUS_FAILED: &str = "Failed to update order status";
pub const CANCEL_FAILED: &str = "Failed to cancel order";
pub const LOAD_PRODUCTS_FAILED: &str = "Failed to load products";
pub const CREATE_ORDER_FAILED: &str = "Failed to create order";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub id: u64,
    pub message: String,
}

struct Inner {
    ttl: Duration,
    next_id: AtomicU64,
    current: watch::Sender<Option<Notice>>,
}

/// Single-slot, auto-expiring notice board. Cheap to clone.
#[derive(Clone)]
pub struct NoticeBoard {
    inner: Arc<Inner>,
}

impl NoticeBoard {
    pub fn new(ttl: Duration) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                ttl,
                next_id: AtomicU64::new(1),
                current,
            }),
        }
    }

    /// Show `message`, replacing any current notice. Returns the notice id.
    ///
    /// Auto-clear needs a tokio runtime; outside one the notice stays until
    /// dismissed or replaced.
    pub fn post(&self, message: impl Into<String>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let notice = Notice {
            id,
            message: message.into(),
        };
        tracing::warn!(notice_id = id, message = %notice.message, "notice posted");
        self.inner.current.send_replace(Some(notice));

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move {
                    tokio::time::sleep(inner.ttl).await;
                    clear_if_current(&inner, id);
                });
            }
            Err(_) => tracing::debug!(notice_id = id, "no runtime; notice will not auto-clear"),
        }
        id
    }

    /// Clear the current notice, whatever it is.
    pub fn dismiss(&self) {
        self.inner.current.send_if_modified(|current| current.take().is_some());
    }

    /// Clear notice `id` if it is still showing.
    pub fn dismiss_id(&self, id: u64) {
        clear_if_current(&self.inner, id);
    }

    pub fn current(&self) -> Option<Notice> {
        self.inner.current.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<Notice>> {
        self.inner.current.subscribe()
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }
}

fn clear_if_current(inner: &Inner, id: u64) {
    inner.current.send_if_modified(|current| {
        if current.as_ref().is_some_and(|n| n.id == id) {
            *current = None;
            true
        } else {
            false
        }
    });
}
