//! Live staff session.
//!
//! Wires the Order Store, the notification channel and the projection
//! together: seed from the store, merge every pushed event, and expose the
//! current view.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use kb_channel::{ChannelEvent, ChannelState, EventHandler, NotificationChannel, Subscription};
use kb_core::types::{Order, OrderStatus, StatusCounts};
use kb_gateway::{list_all_orders, GatewayError, OrderStore};
use kb_oms::OrderProjection;

use crate::controller::LifecycleController;
use crate::notices::{NoticeBoard, LOAD_ORDERS_FAILED};

/// One staff board connected to the Order Store and its push channel.
pub struct StaffSession {
    store: Arc<dyn OrderStore>,
    channel: Arc<NotificationChannel>,
    projection: Arc<OrderProjection>,
    stats: Arc<RwLock<Option<StatusCounts>>>,
    notices: NoticeBoard,
    controller: LifecycleController,
    subscription: Subscription,
    role: String,
    page_limit: u32,
}

impl StaffSession {
    /// Seed the projection, subscribe the merge handler, then connect.
    ///
    /// A failed initial load posts a notice and leaves the projection empty;
    /// the session still connects so pushed events keep arriving.
    pub async fn start(
        store: Arc<dyn OrderStore>,
        channel: Arc<NotificationChannel>,
        notices: NoticeBoard,
        role: impl Into<String>,
        page_limit: u32,
    ) -> Self {
        let role = role.into();
        let projection = Arc::new(OrderProjection::new());
        let stats = Arc::new(RwLock::new(None));

        if let Err(e) = seed(store.as_ref(), &projection, page_limit).await {
            tracing::error!(error = %e, "initial order load failed");
            notices.post(LOAD_ORDERS_FAILED);
        }

        match store.statistics().await {
            Ok(counts) => *stats.write() = Some(counts),
            Err(e) => tracing::debug!(error = %e, "initial statistics unavailable"),
        }

        let subscription = channel.subscribe(merge_handler(Arc::clone(&projection), Arc::clone(&stats)));
        channel.connect(&role);

        let controller = LifecycleController::new(Arc::clone(&store), Arc::clone(&projection), notices.clone());
        tracing::info!(role = %role, orders = projection.len(), "staff session started");

        Self {
            store,
            channel,
            projection,
            stats,
            notices,
            controller,
            subscription,
            role,
            page_limit,
        }
    }

    /// Replace the projection with a fresh copy from the store.
    ///
    /// On failure the current projection is kept and a notice is posted.
    pub async fn reload(&self) -> Result<usize, GatewayError> {
        match seed(self.store.as_ref(), &self.projection, self.page_limit).await {
            Ok(count) => Ok(count),
            Err(e) => {
                tracing::warn!(error = %e, "order reload failed");
                self.notices.post(LOAD_ORDERS_FAILED);
                Err(e)
            }
        }
    }

    /// Orders in display order (as loaded, then as created), optionally
    /// only those with `status`.
    pub fn orders(&self, status: Option<OrderStatus>) -> Vec<Order> {
        self.projection.filter(status)
    }

    /// Last statistics the store reported, initially or via the channel.
    pub fn latest_stats(&self) -> Option<StatusCounts> {
        self.stats.read().clone()
    }

    /// Counts computed from the local projection.
    pub fn local_counts(&self) -> StatusCounts {
        self.projection.counts()
    }

    /// Stop receiving events and close the channel intentionally.
    pub async fn shutdown(&self) {
        self.subscription.unsubscribe();
        self.channel.disconnect().await;
        tracing::info!(role = %self.role, "staff session stopped");
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn watch_channel(&self) -> watch::Receiver<ChannelState> {
        self.channel.watch_state()
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    pub fn projection(&self) -> &Arc<OrderProjection> {
        &self.projection
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    pub fn role(&self) -> &str {
        &self.role
    }
}

async fn seed(store: &dyn OrderStore, projection: &OrderProjection, page_limit: u32) -> Result<usize, GatewayError> {
    let orders = list_all_orders(store, None, page_limit).await?;
    let count = orders.len();
    projection.seed(orders);
    tracing::info!(count, "projection seeded");
    Ok(count)
}

fn merge_handler(projection: Arc<OrderProjection>, stats: Arc<RwLock<Option<StatusCounts>>>) -> EventHandler {
    Arc::new(move |event: &ChannelEvent| -> anyhow::Result<()> {
        match event {
            ChannelEvent::OrderCreated(order) => {
                projection.apply_created(order.clone());
            }
            ChannelEvent::OrderUpdated(order) => {
                projection.apply_updated(order.clone());
            }
            ChannelEvent::StatsUpdated(counts) => {
                *stats.write() = Some(counts.clone());
            }
            ChannelEvent::Error(message) => {
                tracing::warn!(%message, "server reported channel error");
            }
        }
        Ok(())
    })
}
