//! In-process Order Store.
//!
//! Behaves like the HTTP service: assigns ids, snapshots product name and
//! price into line items, computes totals, enforces the lifecycle table and
//! publishes a [`StoreEvent`] for every change. Used by tests and by the
//! offline mode of the staff binary.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use kb_core::types::{utc_now, LineItem, Money, Order, OrderId, OrderStatus, Product, StatusCounts};
use kb_oms::lifecycle::validate_transition;

use crate::error::GatewayError;
use crate::store::{
    NewOrderRequest, OrderPage, OrderQuery, OrderStore, ProductPage, ProductQuery, DEFAULT_PAGE_LIMIT,
    MAX_PAGE_LIMIT,
};

const EVENT_CAPACITY: usize = 256;

/// A change published by [`MemoryOrderStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Created(Order),
    Updated(Order),
    Statistics(StatusCounts),
}

/// Authoritative order store held in memory.
pub struct MemoryOrderStore {
    products: RwLock<Vec<Product>>,
    /// Insertion order; newest last.
    orders: RwLock<Vec<Order>>,
    events: broadcast::Sender<StoreEvent>,
    outage: Mutex<Option<GatewayError>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::with_products(Vec::new())
    }

    pub fn with_products(products: Vec<Product>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            products: RwLock::new(products),
            orders: RwLock::new(Vec::new()),
            events,
            outage: Mutex::new(None),
        }
    }

    /// Receive every change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Fail every call with `error` until cleared with `None`.
    pub fn set_outage(&self, error: Option<GatewayError>) {
        *self.outage.lock() = error;
    }

    pub fn add_product(&self, product: Product) {
        self.products.write().push(product);
    }

    /// Insert a fully formed order as-is. Publishes nothing.
    pub fn insert_order(&self, order: Order) {
        self.orders.write().push(order);
    }

    pub fn order_count(&self) -> usize {
        self.orders.read().len()
    }

    fn check_outage(&self) -> Result<(), GatewayError> {
        match self.outage.lock().as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn publish(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::new();
        for order in self.orders.read().iter() {
            counts.increment(order.status);
        }
        counts
    }

    fn build_items(&self, request: &NewOrderRequest) -> Result<Vec<LineItem>, GatewayError> {
        let products = self.products.read();
        request
            .items
            .iter()
            .map(|item| {
                let product = products
                    .iter()
                    .find(|p| p.id == item.product_id)
                    .ok_or_else(|| GatewayError::Rejected {
                        status: 400,
                        detail: format!("Product {} not found", item.product_id),
                    })?;
                if !product.is_available {
                    return Err(GatewayError::Rejected {
                        status: 400,
                        detail: format!("Product {} is not available", product.name),
                    });
                }
                Ok(LineItem {
                    product_id: product.id.clone(),
                    name: product.name.clone(),
                    quantity: item.quantity,
                    price: product.price,
                    special_requests: item.special_requests.clone(),
                })
            })
            .collect()
    }
}

impl Default for MemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

fn page_bounds(page: Option<u32>, limit: Option<u32>) -> (usize, usize) {
    let page = page.unwrap_or(1).max(1) as usize;
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT) as usize;
    ((page - 1) * limit, limit)
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn list_products(&self, query: &ProductQuery) -> Result<ProductPage, GatewayError> {
        self.check_outage()?;
        let products = self.products.read();
        let matching: Vec<&Product> = products
            .iter()
            .filter(|p| query.category.as_ref().map_or(true, |c| &p.category == c))
            .filter(|p| !query.available_only || p.is_available)
            .collect();
        let (skip, take) = page_bounds(query.page, query.limit);
        Ok(ProductPage {
            total: matching.len() as u64,
            products: matching.into_iter().skip(skip).take(take).cloned().collect(),
        })
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage, GatewayError> {
        self.check_outage()?;
        let needle = query.customer_name.as_ref().map(|n| n.to_lowercase());
        let orders = self.orders.read();
        let matching: Vec<&Order> = orders
            .iter()
            .rev()
            .filter(|o| query.status.map_or(true, |s| o.status == s))
            .filter(|o| {
                needle
                    .as_ref()
                    .map_or(true, |n| o.customer.name.to_lowercase().contains(n.as_str()))
            })
            .filter(|o| query.date_from.map_or(true, |from| o.created_at >= from))
            .filter(|o| query.date_to.map_or(true, |to| o.created_at <= to))
            .collect();
        let (skip, take) = page_bounds(query.page, query.limit);
        Ok(OrderPage {
            total: matching.len() as u64,
            orders: matching.into_iter().skip(skip).take(take).cloned().collect(),
        })
    }

    async fn get_order(&self, id: &OrderId) -> Result<Order, GatewayError> {
        self.check_outage()?;
        self.orders
            .read()
            .iter()
            .find(|o| &o.id == id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("Order {id} not found")))
    }

    async fn create_order(&self, request: &NewOrderRequest) -> Result<Order, GatewayError> {
        self.check_outage()?;
        request
            .customer
            .validate()
            .map_err(|e| GatewayError::Invalid(e.to_string()))?;
        if request.items.is_empty() {
            return Err(GatewayError::Invalid("order has no items".into()));
        }
        if let Some(item) = request.items.iter().find(|i| i.quantity == 0) {
            return Err(GatewayError::Invalid(format!(
                "quantity for product {} must be at least 1",
                item.product_id
            )));
        }

        let items = self.build_items(request)?;
        let total: Money = items.iter().map(LineItem::line_total).sum();
        let now = utc_now();
        let order = Order {
            id: OrderId::new(uuid::Uuid::new_v4().to_string()),
            customer: request.customer.clone(),
            items,
            status: OrderStatus::New,
            total,
            created_at: now,
            updated_at: Some(now),
            notes: request.notes.clone(),
            delivery_address: request.delivery_address.clone(),
            delivery_time: request.delivery_time,
        };

        self.orders.write().push(order.clone());
        tracing::info!(order_id = %order.id, total = %order.total, "order created");
        self.publish(StoreEvent::Created(order.clone()));
        self.publish(StoreEvent::Statistics(self.counts()));
        Ok(order)
    }

    async fn update_status(&self, id: &OrderId, status: OrderStatus) -> Result<Order, GatewayError> {
        self.check_outage()?;
        let updated = {
            let mut orders = self.orders.write();
            let order = orders
                .iter_mut()
                .find(|o| &o.id == id)
                .ok_or_else(|| GatewayError::NotFound(format!("Order {id} not found")))?;
            validate_transition(id, order.status, status).map_err(|e| GatewayError::Rejected {
                status: 400,
                detail: e.to_string(),
            })?;
            order.status = status;
            order.updated_at = Some(utc_now());
            order.clone()
        };

        tracing::info!(order_id = %id, status = %status, "order status updated");
        self.publish(StoreEvent::Updated(updated.clone()));
        self.publish(StoreEvent::Statistics(self.counts()));
        Ok(updated)
    }

    async fn statistics(&self) -> Result<StatusCounts, GatewayError> {
        self.check_outage()?;
        Ok(self.counts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{list_all_orders, NewLineItem};
    use kb_core::types::{Customer, ProductId};

    fn product(id: &str, price_minor: i64, available: bool) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("dish {id}"),
            price: Money::from_minor(price_minor),
            category: "Main".into(),
            description: None,
            is_available: available,
        }
    }

    fn request(items: Vec<(&str, u32)>) -> NewOrderRequest {
        NewOrderRequest {
            customer: Customer {
                name: "Ivan".into(),
                phone: "+998901234567".into(),
                email: "ivan@example.com".into(),
                address: None,
            },
            items: items
                .into_iter()
                .map(|(id, quantity)| NewLineItem {
                    product_id: ProductId::new(id),
                    quantity,
                    special_requests: None,
                })
                .collect(),
            notes: None,
            delivery_address: None,
            delivery_time: None,
        }
    }

    fn store() -> MemoryOrderStore {
        MemoryOrderStore::with_products(vec![
            product("p-1", 4550, true),
            product("p-2", 1000, true),
            product("p-3", 999, false),
        ])
    }

    // ── Creation ──

    #[tokio::test]
    async fn test_create_snapshots_prices_and_totals() {
        let store = store();
        let order = store.create_order(&request(vec![("p-1", 2), ("p-2", 1)])).await.unwrap();

        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.total, Money::from_minor(10_100));
        assert_eq!(order.items_total(), order.total);
        assert_eq!(order.items[0].name, "dish p-1");

        // Later catalog changes do not touch the snapshot.
        store.products.write()[0].price = Money::from_minor(1);
        let fetched = store.get_order(&order.id).await.unwrap();
        assert_eq!(fetched.items[0].price, Money::from_minor(4550));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_requests() {
        let store = store();
        assert!(matches!(
            store.create_order(&request(vec![("p-3", 1)])).await,
            Err(GatewayError::Rejected { status: 400, .. })
        ));
        assert!(matches!(
            store.create_order(&request(vec![("nope", 1)])).await,
            Err(GatewayError::Rejected { status: 400, .. })
        ));
        assert!(matches!(
            store.create_order(&request(vec![("p-1", 0)])).await,
            Err(GatewayError::Invalid(_))
        ));
        assert!(matches!(store.create_order(&request(vec![])).await, Err(GatewayError::Invalid(_))));

        let mut bad_phone = request(vec![("p-1", 1)]);
        bad_phone.customer.phone = "12345".into();
        assert!(matches!(store.create_order(&bad_phone).await, Err(GatewayError::Invalid(_))));
        assert_eq!(store.order_count(), 0);
    }

    // ── Lifecycle ──

    #[tokio::test]
    async fn test_update_status_enforces_table() {
        let store = store();
        let order = store.create_order(&request(vec![("p-1", 1)])).await.unwrap();

        let err = store.update_status(&order.id, OrderStatus::Completed).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { status: 400, .. }));
        assert_eq!(store.get_order(&order.id).await.unwrap().status, OrderStatus::New);

        for next in [OrderStatus::Confirmed, OrderStatus::Preparing, OrderStatus::Ready, OrderStatus::Completed] {
            let updated = store.update_status(&order.id, next).await.unwrap();
            assert_eq!(updated.status, next);
        }
        assert!(store.cancel_order(&order.id).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_order_not_found() {
        let store = store();
        let id = OrderId::new("ghost");
        assert!(matches!(store.get_order(&id).await, Err(GatewayError::NotFound(_))));
        assert!(matches!(
            store.update_status(&id, OrderStatus::Confirmed).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_events_published() {
        let store = store();
        let mut rx = store.subscribe();

        let order = store.create_order(&request(vec![("p-2", 1)])).await.unwrap();
        store.cancel_order(&order.id).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), StoreEvent::Created(o) if o.id == order.id));
        assert!(matches!(rx.recv().await.unwrap(), StoreEvent::Statistics(s) if s.get(OrderStatus::New) == 1));
        assert!(matches!(
            rx.recv().await.unwrap(),
            StoreEvent::Updated(o) if o.status == OrderStatus::Cancelled
        ));
        match rx.recv().await.unwrap() {
            StoreEvent::Statistics(s) => {
                assert_eq!(s.get(OrderStatus::New), 0);
                assert_eq!(s.get(OrderStatus::Cancelled), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    // ── Queries ──

    #[tokio::test]
    async fn test_list_orders_newest_first_and_filtered() {
        let store = store();
        let first = store.create_order(&request(vec![("p-1", 1)])).await.unwrap();
        let second = store.create_order(&request(vec![("p-2", 1)])).await.unwrap();
        store.update_status(&first.id, OrderStatus::Confirmed).await.unwrap();

        let page = store.list_orders(&OrderQuery::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.orders[0].id, second.id);

        let confirmed = store
            .list_orders(&OrderQuery {
                status: Some(OrderStatus::Confirmed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(confirmed.total, 1);
        assert_eq!(confirmed.orders[0].id, first.id);

        let by_name = store
            .list_orders(&OrderQuery {
                customer_name: Some("IVA".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_name.total, 2);
    }

    #[tokio::test]
    async fn test_list_orders_by_creation_date() {
        let template = store().create_order(&request(vec![("p-1", 1)])).await.unwrap();
        let day = |d: u32| {
            chrono::NaiveDate::from_ymd_opt(2024, 3, d)
                .and_then(|date| date.and_hms_opt(12, 0, 0))
                .unwrap()
        };
        let store = MemoryOrderStore::new();
        for (id, d) in [("mar-1", 1), ("mar-5", 5), ("mar-9", 9)] {
            store.insert_order(Order {
                id: OrderId::new(id),
                created_at: day(d),
                ..template.clone()
            });
        }
        let ids = |page: OrderPage| page.orders.into_iter().map(|o| o.id.0).collect::<Vec<_>>();

        // Both bounds inclusive.
        let window = store
            .list_orders(&OrderQuery {
                date_from: Some(day(5)),
                date_to: Some(day(9)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(window.total, 2);
        assert_eq!(ids(window), vec!["mar-9", "mar-5"]);

        let since = store
            .list_orders(&OrderQuery {
                date_from: Some(day(6)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ids(since), vec!["mar-9"]);

        let until = store
            .list_orders(&OrderQuery {
                date_to: Some(day(1)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ids(until), vec!["mar-1"]);
    }

    #[tokio::test]
    async fn test_list_all_orders_pages() {
        let store = store();
        for _ in 0..7 {
            store.create_order(&request(vec![("p-1", 1)])).await.unwrap();
        }
        let all = list_all_orders(&store, None, 3).await.unwrap();
        assert_eq!(all.len(), 7);
        let new_only = list_all_orders(&store, Some(OrderStatus::Ready), 3).await.unwrap();
        assert!(new_only.is_empty());
    }

    #[tokio::test]
    async fn test_products_filters() {
        let store = store();
        let available = store
            .list_products(&ProductQuery {
                available_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(available.total, 2);

        let paged = store
            .list_products(&ProductQuery {
                page: Some(2),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paged.total, 3);
        assert_eq!(paged.products.len(), 1);
        assert_eq!(paged.products[0].id, ProductId::new("p-3"));
    }

    #[tokio::test]
    async fn test_outage() {
        let store = store();
        store.set_outage(Some(GatewayError::Transport("connection refused".into())));
        assert!(store.statistics().await.unwrap_err().is_retryable());
        store.set_outage(None);
        assert_eq!(store.statistics().await.unwrap().total(), 0);
    }
}
