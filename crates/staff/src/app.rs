//! Staff application: wires all components and manages lifecycle.
//!
//! [`StaffApp`] picks the Order Store and transport (HTTP + WebSocket, or
//! in-process for `--offline`), starts the [`StaffSession`], loads the
//! catalog, serves the console and waits for SIGINT.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kb_channel::{ChannelEvent, ChannelState, Connector, LoopbackConnector, NotificationChannel, TungsteniteConnector};
use kb_core::config::AppConfig;
use kb_core::types::{Money, Product, ProductId};
use kb_gateway::{MemoryOrderStore, OrderStore, ProductQuery, RestOrderStore, StoreEvent};

use crate::catalog;
use crate::notices::NoticeBoard;
use crate::server::{self, ConsoleState};
use crate::session::StaffSession;

/// The staff application.
pub struct StaffApp {
    config: AppConfig,
    offline: bool,
    cancel: CancellationToken,
}

impl StaffApp {
    pub fn new(config: AppConfig, offline: bool) -> Self {
        Self {
            config,
            offline,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until SIGINT or cancellation.
    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        let cancel = self.cancel.clone();

        // ── Store and transport ──────────────────────────────────
        let store: Arc<dyn OrderStore>;
        let connector: Arc<dyn Connector>;
        if self.offline {
            let memory = Arc::new(MemoryOrderStore::with_products(demo_catalog()));
            let loopback = LoopbackConnector::new();
            bridge_store_events(memory.subscribe(), loopback.clone(), cancel.clone());
            tracing::info!("offline mode: in-memory store and loopback channel");
            store = memory;
            connector = Arc::new(loopback);
        } else {
            store = Arc::new(RestOrderStore::from_config(&config.api)?);
            connector = Arc::new(TungsteniteConnector);
        }

        let channel = Arc::new(NotificationChannel::new(
            config.channel.ws_url.clone(),
            config.channel.reconnect.clone(),
            Duration::from_millis(config.channel.ping_interval_ms),
            connector,
        ));
        let notices = NoticeBoard::new(config.notice_ttl());

        tracing::info!(
            api = %config.api.base_url,
            ws = %channel.endpoint(&config.channel.role),
            role = %config.channel.role,
            "staff app starting"
        );

        // ── 1. Session ───────────────────────────────────────────
        let session = Arc::new(
            StaffSession::start(
                Arc::clone(&store),
                channel,
                notices.clone(),
                config.channel.role.clone(),
                config.api.page_limit,
            )
            .await,
        );

        // ── 2. Catalog ───────────────────────────────────────────
        let query = ProductQuery {
            available_only: true,
            ..Default::default()
        };
        let products = catalog::load_catalog(store.as_ref(), &query, &notices).await;
        tracing::info!(
            products = products.len(),
            categories = ?catalog::categories(&products),
            "catalog ready"
        );

        // ── 3. Channel state monitor ─────────────────────────────
        let mut states = session.watch_channel();
        let monitor_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = states.borrow_and_update().clone();
                        match state {
                            ChannelState::Failed { attempts } => {
                                tracing::error!(attempts, "notification channel gave up; restart to reconnect");
                            }
                            other => tracing::info!(state = other.label(), "notification channel"),
                        }
                    }
                    _ = monitor_cancel.cancelled() => break,
                }
            }
        });

        // ── 4. Console ───────────────────────────────────────────
        let router = server::console_router(Arc::new(ConsoleState {
            session: Arc::clone(&session),
        }));
        let bind_addr = config.console.bind_addr.clone();
        let console_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = server::run_console(router, &bind_addr, console_cancel).await {
                tracing::error!(error = %e, "staff console failed");
            }
        });

        // ── Shutdown signal ──────────────────────────────────────
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = cancel.cancelled() => {
                tracing::info!("cancellation token triggered");
            }
        }

        cancel.cancel();
        session.shutdown().await;

        tracing::info!("staff app stopped");
        Ok(())
    }
}

/// Forward every change of an in-memory store to all loopback peers, the
/// way the Order Store pushes to its WebSocket clients.
pub fn bridge_store_events(
    mut events: broadcast::Receiver<StoreEvent>,
    connector: LoopbackConnector,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = events.recv() => received,
                _ = cancel.cancelled() => break,
            };
            match event {
                Ok(event) => connector.broadcast(&channel_event(event)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "store event bridge lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn channel_event(event: StoreEvent) -> ChannelEvent {
    match event {
        StoreEvent::Created(order) => ChannelEvent::OrderCreated(order),
        StoreEvent::Updated(order) => ChannelEvent::OrderUpdated(order),
        StoreEvent::Statistics(counts) => ChannelEvent::StatsUpdated(counts),
    }
}

/// Menu used by `--offline`.
pub fn demo_catalog() -> Vec<Product> {
    let dish = |id: &str, name: &str, price: Money, category: &str, available: bool| Product {
        id: ProductId::new(id),
        name: name.to_string(),
        price,
        category: category.to_string(),
        description: None,
        is_available: available,
    };
    vec![
        dish("plov", "Plov", Money::from_minor(4550), "Main", true),
        dish("lagman", "Lagman", Money::from_units(38), "Main", true),
        dish("samsa", "Samsa", Money::from_units(12), "Starters", true),
        dish("shashlik", "Shashlik", Money::from_units(55), "Main", false),
        dish("green-tea", "Green tea", Money::from_units(8), "Drinks", true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_catalog_ids_unique() {
        let products = demo_catalog();
        let mut ids: Vec<_> = products.iter().map(|p| p.id.clone()).collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        ids.dedup();
        assert_eq!(ids.len(), products.len());
        assert!(products.iter().any(|p| !p.is_available));
    }

    #[test]
    fn test_store_events_map_to_channel_events() {
        let counts = kb_core::types::StatusCounts::new();
        assert_eq!(
            channel_event(StoreEvent::Statistics(counts.clone())),
            ChannelEvent::StatsUpdated(counts)
        );
    }
}
