//! Order lifecycle controller.
//!
//! Offers only legal next statuses, rejects illegal requests before any
//! network call, and reconciles the projection from what the Order Store
//! returns. The projection is never changed to the requested status on the
//! client's own authority.

use std::sync::Arc;

use kb_core::types::{Order, OrderId, OrderStatus};
use kb_gateway::{GatewayError, OrderStore};
use kb_oms::lifecycle::{self, LifecycleError};
use kb_oms::OrderProjection;

use crate::notices::{NoticeBoard, CANCEL_FAILED, UPDATE_STATUS_FAILED};

/// Why a transition request failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The order is not in the projection.
    #[error("order {0} is not known")]
    UnknownOrder(OrderId),

    /// The target is not a legal successor of the current status.
    #[error(transparent)]
    Illegal(#[from] LifecycleError),

    /// The Order Store refused or could not be reached.
    #[error("order store: {0}")]
    Store(#[from] GatewayError),
}

impl TransitionError {
    /// Only transport failures and server-side errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::UnknownOrder(_) | Self::Illegal(_) => false,
        }
    }
}

/// Validates and requests status changes.
#[derive(Clone)]
pub struct LifecycleController {
    store: Arc<dyn OrderStore>,
    projection: Arc<OrderProjection>,
    notices: NoticeBoard,
}

impl LifecycleController {
    pub fn new(store: Arc<dyn OrderStore>, projection: Arc<OrderProjection>, notices: NoticeBoard) -> Self {
        Self {
            store,
            projection,
            notices,
        }
    }

    /// Legal next statuses for the order's current known status. Empty for
    /// unknown orders and terminal statuses.
    pub fn offered_transitions(&self, id: &OrderId) -> Vec<OrderStatus> {
        self.projection
            .status_of(id)
            .map(|status| lifecycle::next_statuses(status).to_vec())
            .unwrap_or_default()
    }

    pub fn can_cancel(&self, id: &OrderId) -> bool {
        self.projection
            .status_of(id)
            .is_some_and(lifecycle::can_cancel)
    }

    /// Ask the store to move `id` to `target`.
    ///
    /// On success the returned order replaces the projection entry. On a
    /// store failure a notice is posted; when the store's view differs from
    /// ours the entry is refreshed from the store.
    pub async fn request_transition(&self, id: &OrderId, target: OrderStatus) -> Result<Order, TransitionError> {
        let current = self
            .projection
            .status_of(id)
            .ok_or_else(|| TransitionError::UnknownOrder(id.clone()))?;
        lifecycle::validate_transition(id, current, target)?;

        match self.store.update_status(id, target).await {
            Ok(order) => {
                tracing::info!(order_id = %id, from = %current, to = %order.status, "transition confirmed");
                self.projection.apply_response(order.clone());
                Ok(order)
            }
            Err(e) => {
                tracing::warn!(
                    order_id = %id,
                    to = %target,
                    error = %e,
                    retryable = e.is_retryable(),
                    "transition failed"
                );
                self.notices.post(if target == OrderStatus::Cancelled {
                    CANCEL_FAILED
                } else {
                    UPDATE_STATUS_FAILED
                });
                if e.is_stale_view() {
                    self.refresh(id).await;
                }
                Err(TransitionError::Store(e))
            }
        }
    }

    /// Transition to CANCELLED.
    pub async fn cancel(&self, id: &OrderId) -> Result<Order, TransitionError> {
        self.request_transition(id, OrderStatus::Cancelled).await
    }

    /// Replace the entry with the store's copy. Best effort.
    async fn refresh(&self, id: &OrderId) {
        match self.store.get_order(id).await {
            Ok(order) => {
                tracing::debug!(order_id = %id, status = %order.status, "entry refreshed from store");
                self.projection.apply_response(order);
            }
            Err(e) => tracing::debug!(order_id = %id, error = %e, "refresh failed"),
        }
    }
}
