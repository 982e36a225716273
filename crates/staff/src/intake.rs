//! New order submission.
//!
//! Checks what can be checked locally before the request goes out. The
//! store remains the authority on products, prices and totals.

use kb_core::types::{CustomerError, Order, ProductId};
use kb_gateway::{GatewayError, NewOrderRequest, OrderStore};

use crate::notices::{NoticeBoard, CREATE_ORDER_FAILED};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeError {
    #[error("invalid customer: {0}")]
    Customer(CustomerError),

    #[error("order has no items")]
    NoItems,

    #[error("quantity for product {0} must be at least 1")]
    ZeroQuantity(ProductId),

    #[error("order store: {0}")]
    Store(#[from] GatewayError),
}

/// Local checks, no network.
pub fn validate(request: &NewOrderRequest) -> Result<(), IntakeError> {
    request.customer.validate().map_err(IntakeError::Customer)?;
    if request.items.is_empty() {
        return Err(IntakeError::NoItems);
    }
    if let Some(item) = request.items.iter().find(|i| i.quantity == 0) {
        return Err(IntakeError::ZeroQuantity(item.product_id.clone()));
    }
    Ok(())
}

/// Validate, then create the order. A store failure posts a notice;
/// validation failures are returned to the caller only.
pub async fn submit_order(
    store: &dyn OrderStore,
    request: &NewOrderRequest,
    notices: &NoticeBoard,
) -> Result<Order, IntakeError> {
    validate(request)?;

    match store.create_order(request).await {
        Ok(order) => {
            tracing::info!(order_id = %order.id, items = order.items.len(), total = %order.total, "order submitted");
            Ok(order)
        }
        Err(e) => {
            tracing::error!(error = %e, "order submission failed");
            notices.post(CREATE_ORDER_FAILED);
            Err(IntakeError::Store(e))
        }
    }
}
