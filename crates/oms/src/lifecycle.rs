//! Order status state machine.
//!
//! ```text
//! NEW → CONFIRMED → PREPARING → READY → COMPLETED
//!  └──────┴────────────┴─────────┴──→ CANCELLED
//! ```
//!
//! COMPLETED and CANCELLED are terminal. The Order Store enforces the same
//! table authoritatively; the client uses it to offer only legal choices and
//! to reject illegal requests before they reach the network.

use kb_core::types::{OrderId, OrderStatus};

/// Lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// `to` is not a legal successor of `from`.
    #[error("invalid transition from {from} to {to} for order {order_id}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },
}

/// Legal successor statuses: forward step first, then cancellation.
pub fn next_statuses(from: OrderStatus) -> &'static [OrderStatus] {
    match from {
        OrderStatus::New => &[OrderStatus::Confirmed, OrderStatus::Cancelled],
        OrderStatus::Confirmed => &[OrderStatus::Preparing, OrderStatus::Cancelled],
        OrderStatus::Preparing => &[OrderStatus::Ready, OrderStatus::Cancelled],
        OrderStatus::Ready => &[OrderStatus::Completed, OrderStatus::Cancelled],
        OrderStatus::Completed | OrderStatus::Cancelled => &[],
    }
}

/// Returns `true` if `from → to` is in the transition table.
pub fn is_legal(from: OrderStatus, to: OrderStatus) -> bool {
    next_statuses(from).contains(&to)
}

/// Returns `true` if an order in `status` may still be cancelled.
pub fn can_cancel(status: OrderStatus) -> bool {
    is_legal(status, OrderStatus::Cancelled)
}

/// Validate that a transition from `from` to `to` is allowed.
pub fn validate_transition(
    order_id: &OrderId,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<(), LifecycleError> {
    if is_legal(from, to) {
        Ok(())
    } else {
        tracing::error!(
            order_id = %order_id,
            from = %from,
            to = %to,
            "invalid order state transition"
        );
        Err(LifecycleError::InvalidTransition {
            order_id: order_id.clone(),
            from,
            to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn test_transition_table() {
        assert_eq!(next_statuses(New), &[Confirmed, Cancelled]);
        assert_eq!(next_statuses(Confirmed), &[Preparing, Cancelled]);
        assert_eq!(next_statuses(Preparing), &[Ready, Cancelled]);
        assert_eq!(next_statuses(Ready), &[Completed, Cancelled]);
        assert!(next_statuses(Completed).is_empty());
        assert!(next_statuses(Cancelled).is_empty());
    }

    #[test]
    fn test_terminal_statuses_have_no_successors() {
        for status in OrderStatus::ALL {
            assert_eq!(status.is_terminal(), next_statuses(status).is_empty());
        }
    }

    #[test]
    fn test_happy_path_is_legal() {
        let path = [New, Confirmed, Preparing, Ready, Completed];
        for pair in path.windows(2) {
            assert!(is_legal(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        assert!(!is_legal(New, Completed));
        assert!(!is_legal(New, Preparing));
        assert!(!is_legal(Ready, Confirmed));
        assert!(!is_legal(Preparing, New));
        assert!(!is_legal(New, New));
    }

    #[test]
    fn test_cancel_rules() {
        for status in [New, Confirmed, Preparing, Ready] {
            assert!(can_cancel(status), "{status} should be cancellable");
        }
        assert!(!can_cancel(Completed));
        // No re-cancellation.
        assert!(!can_cancel(Cancelled));
    }

    #[test]
    fn test_validate_transition_error() {
        let id = OrderId::new("A");
        assert!(validate_transition(&id, New, Confirmed).is_ok());

        let err = validate_transition(&id, New, Completed).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidTransition {
                order_id: id,
                from: New,
                to: Completed,
            }
        );
        assert_eq!(
            err.to_string(),
            "invalid transition from NEW to COMPLETED for order A"
        );
    }

    #[test]
    fn test_invalid_from_terminal() {
        let id = OrderId::new("B");
        for to in OrderStatus::ALL {
            assert!(validate_transition(&id, Completed, to).is_err());
            assert!(validate_transition(&id, Cancelled, to).is_err());
        }
    }
}
