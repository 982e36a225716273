//! End-to-end staff board flow without a network.
//!
//! An in-memory Order Store publishes every change through the loopback
//! transport, the way the real service pushes over WebSocket. Two staff
//! sessions watch the same store; paused time drives reconnects.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use kb_channel::{ChannelState, LoopbackConnector, NotificationChannel};
use kb_core::config::ReconnectConfig;
use kb_core::types::{Customer, OrderStatus, ProductId};
use kb_gateway::{MemoryOrderStore, NewLineItem, NewOrderRequest, OrderStore, ProductQuery};
use kb_staff::app::{bridge_store_events, demo_catalog};
use kb_staff::notices::NoticeBoard;
use kb_staff::{load_catalog, submit_order, StaffSession};

struct Kitchen {
    store: Arc<MemoryOrderStore>,
    connector: LoopbackConnector,
    cancel: CancellationToken,
}

impl Kitchen {
    fn new() -> Self {
        let store = Arc::new(MemoryOrderStore::with_products(demo_catalog()));
        let connector = LoopbackConnector::new();
        let cancel = CancellationToken::new();
        bridge_store_events(store.subscribe(), connector.clone(), cancel.clone());
        Self {
            store,
            connector,
            cancel,
        }
    }

    async fn session(&self, role: &str) -> StaffSession {
        let channel = Arc::new(NotificationChannel::new(
            "ws://kitchen.test",
            ReconnectConfig::default(),
            Duration::ZERO,
            Arc::new(self.connector.clone()),
        ));
        StaffSession::start(
            self.store.clone(),
            channel,
            NoticeBoard::new(Duration::from_secs(5)),
            role,
            100,
        )
        .await
    }
}

impl Drop for Kitchen {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn new_order(name: &str, product: &str, quantity: u32) -> NewOrderRequest {
    NewOrderRequest {
        customer: Customer {
            name: name.into(),
            phone: "+998901234567".into(),
            email: "guest@example.com".into(),
            address: None,
        },
        items: vec![NewLineItem {
            product_id: ProductId::new(product),
            quantity,
            special_requests: None,
        }],
        notes: None,
        delivery_address: None,
        delivery_time: None,
    }
}

/// Poll `check` while letting background tasks run.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

// ── Full lifecycle ──

#[tokio::test(start_paused = true)]
async fn test_order_flows_to_every_board() {
    let kitchen = Kitchen::new();
    let front = kitchen.session("staff").await;
    let back = kitchen.session("admin").await;
    eventually("both channels open", || {
        front.channel_state() == ChannelState::Open && back.channel_state() == ChannelState::Open
    })
    .await;

    let notices = NoticeBoard::new(Duration::from_secs(5));
    let created = submit_order(kitchen.store.as_ref(), &new_order("Aziza", "plov", 2), &notices)
        .await
        .unwrap();
    eventually("created order on both boards", || {
        front.projection().get(&created.id).is_some() && back.projection().get(&created.id).is_some()
    })
    .await;

    // Walk the order through the lifecycle from the front board.
    for target in [
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::Completed,
    ] {
        assert!(front.controller().offered_transitions(&created.id).contains(&target));
        front.controller().request_transition(&created.id, target).await.unwrap();
        eventually("back board follows", || {
            back.projection().status_of(&created.id) == Some(target)
        })
        .await;
    }

    assert!(front.controller().offered_transitions(&created.id).is_empty());
    assert!(!back.controller().can_cancel(&created.id));
    eventually("statistics pushed", || {
        back.latest_stats()
            .is_some_and(|s| s.get(OrderStatus::Completed) == 1)
    })
    .await;

    front.shutdown().await;
    back.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_boards_lost_race() {
    let kitchen = Kitchen::new();
    let a = kitchen.session("staff").await;
    let b = kitchen.session("staff").await;
    eventually("channels open", || {
        a.channel_state() == ChannelState::Open && b.channel_state() == ChannelState::Open
    })
    .await;

    let notices = NoticeBoard::new(Duration::from_secs(5));
    let order = submit_order(kitchen.store.as_ref(), &new_order("Timur", "lagman", 1), &notices)
        .await
        .unwrap();
    eventually("order known to both", || {
        a.projection().get(&order.id).is_some() && b.projection().get(&order.id).is_some()
    })
    .await;

    // Another board cancels; board B tries to confirm before hearing about it.
    kitchen.store.cancel_order(&order.id).await.unwrap();
    let result = b
        .controller()
        .request_transition(&order.id, OrderStatus::Confirmed)
        .await;

    match result {
        // B saw the cancellation first and never sent the request.
        Err(kb_staff::TransitionError::Illegal(_)) => {}
        // B sent it and the store refused; B's view is refreshed.
        Err(kb_staff::TransitionError::Store(_)) => {
            assert_eq!(b.notices().current().unwrap().message, "Failed to update order status");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    eventually("both boards show the cancellation", || {
        a.projection().status_of(&order.id) == Some(OrderStatus::Cancelled)
            && b.projection().status_of(&order.id) == Some(OrderStatus::Cancelled)
    })
    .await;
}

// ── Connection loss ──

#[tokio::test(start_paused = true)]
async fn test_reconnect_then_reload_recovers_missed_events() {
    let kitchen = Kitchen::new();
    let board = kitchen.session("staff").await;
    eventually("open", || board.channel_state() == ChannelState::Open).await;

    kitchen.connector.latest_peer().unwrap().drop_connection();
    eventually("reconnecting", || {
        matches!(board.channel_state(), ChannelState::Reconnecting { .. })
    })
    .await;

    // Placed while the board is offline: the push is lost.
    let notices = NoticeBoard::new(Duration::from_secs(5));
    let missed = submit_order(kitchen.store.as_ref(), &new_order("Malika", "samsa", 3), &notices)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    eventually("reopened", || board.channel_state() == ChannelState::Open).await;
    assert_eq!(kitchen.connector.connect_count(), 2);
    assert!(board.projection().get(&missed.id).is_none());

    assert_eq!(board.reload().await.unwrap(), 1);
    assert_eq!(board.projection().status_of(&missed.id), Some(OrderStatus::New));

    // Live again.
    let next = submit_order(kitchen.store.as_ref(), &new_order("Malika", "plov", 1), &notices)
        .await
        .unwrap();
    eventually("live event after reconnect", || board.projection().get(&next.id).is_some()).await;
}

#[tokio::test(start_paused = true)]
async fn test_channel_gives_up_after_max_retries() {
    let kitchen = Kitchen::new();
    let board = kitchen.session("staff").await;
    eventually("open", || board.channel_state() == ChannelState::Open).await;

    kitchen.connector.refuse_all(true);
    kitchen.connector.latest_peer().unwrap().drop_connection();

    // 1 + 2 + 4 + 8 + 16 seconds of backoff.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(board.channel_state(), ChannelState::Failed { attempts: 5 });
    assert_eq!(kitchen.connector.connect_count(), 6);

    // REST still works; the board can be refreshed by hand.
    let notices = NoticeBoard::new(Duration::from_secs(5));
    submit_order(kitchen.store.as_ref(), &new_order("Olim", "plov", 1), &notices)
        .await
        .unwrap();
    assert_eq!(board.reload().await.unwrap(), 1);
}

// ── Catalog ──

#[tokio::test]
async fn test_catalog_hides_unavailable_when_asked() {
    let kitchen = Kitchen::new();
    let notices = NoticeBoard::new(Duration::from_secs(5));

    let all = load_catalog(kitchen.store.as_ref(), &ProductQuery::default(), &notices).await;
    let available = load_catalog(
        kitchen.store.as_ref(),
        &ProductQuery {
            available_only: true,
            ..Default::default()
        },
        &notices,
    )
    .await;
    assert_eq!(all.len(), available.len() + 1);
    assert!(available.iter().all(|p| p.is_available));
    assert!(!available.iter().any(|p| p.id.0 == "shashlik"));

    let err = submit_order(kitchen.store.as_ref(), &new_order("Olim", "shashlik", 1), &notices).await;
    assert!(err.is_err());
    assert_eq!(kitchen.store.order_count(), 0);
}
