//! Order Store contract.
//!
//! The [`OrderStore`] trait is the client's view of the server-side
//! authority: it persists orders, assigns ids, computes totals and enforces
//! the lifecycle table. Implementations: [`RestOrderStore`](crate::RestOrderStore)
//! and [`MemoryOrderStore`](crate::MemoryOrderStore).

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use kb_core::types::{Customer, Order, OrderId, OrderStatus, Product, ProductId, StatusCounts};

use crate::error::GatewayError;

/// Largest page the store serves.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Page size when none is requested.
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// Filters for `GET /products/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProductQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub available_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Filters for `GET /orders/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    /// Case-insensitive substring of the customer name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    /// Created at or after.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDateTime>,
    /// Created at or before.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPage {
    pub products: Vec<Product>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
}

/// One requested line of a new order. Name and price are filled in by the
/// store from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_requests: Option<String>,
}

/// Body of `POST /orders/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderRequest {
    pub customer: Customer,
    pub items: Vec<NewLineItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_time: Option<NaiveDateTime>,
}

/// Server-side order authority.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// `GET /products/`.
    async fn list_products(&self, query: &ProductQuery) -> Result<ProductPage, GatewayError>;

    /// `GET /orders/`, newest first.
    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage, GatewayError>;

    /// `GET /orders/{id}`.
    async fn get_order(&self, id: &OrderId) -> Result<Order, GatewayError>;

    /// `POST /orders/`.
    async fn create_order(&self, request: &NewOrderRequest) -> Result<Order, GatewayError>;

    /// `PATCH /orders/{id}/status`. Returns the persisted order.
    async fn update_status(&self, id: &OrderId, status: OrderStatus) -> Result<Order, GatewayError>;

    /// Cancellation is a status update to CANCELLED.
    async fn cancel_order(&self, id: &OrderId) -> Result<Order, GatewayError> {
        self.update_status(id, OrderStatus::Cancelled).await
    }

    /// `GET /orders/statistics/overview`.
    async fn statistics(&self) -> Result<StatusCounts, GatewayError>;
}

/// Fetch every order matching `status`, page by page.
pub async fn list_all_orders(
    store: &dyn OrderStore,
    status: Option<OrderStatus>,
    page_limit: u32,
) -> Result<Vec<Order>, GatewayError> {
    let limit = page_limit.clamp(1, MAX_PAGE_LIMIT);
    let mut orders = Vec::new();
    let mut page = 1;

    loop {
        let query = OrderQuery {
            status,
            page: Some(page),
            limit: Some(limit),
            ..Default::default()
        };
        let batch = store.list_orders(&query).await?;
        let received = batch.orders.len();
        orders.extend(batch.orders);

        if received == 0 || orders.len() as u64 >= batch.total {
            break;
        }
        page += 1;
    }

    tracing::debug!(count = orders.len(), pages = page, "loaded orders");
    Ok(orders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kb_core::types::Money;

    #[test]
    fn test_store_is_object_safe() {
        fn _assert_object_safe(_s: &dyn OrderStore) {}
    }

    #[test]
    fn test_new_order_request_wire_shape() {
        let request = NewOrderRequest {
            customer: Customer {
                name: "Ivan".into(),
                phone: "+998901234567".into(),
                email: "ivan@example.com".into(),
                address: None,
            },
            items: vec![NewLineItem {
                product_id: ProductId::new("p-1"),
                quantity: 2,
                special_requests: Some("extra spicy".into()),
            }],
            notes: None,
            delivery_address: Some("Main st. 1".into()),
            delivery_time: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["items"][0]["product_id"], "p-1");
        assert_eq!(json["items"][0]["quantity"], 2);
        assert_eq!(json["delivery_address"], "Main st. 1");
        assert!(json.get("notes").is_none());
        assert!(json["customer"].get("address").is_none());
    }

    #[test]
    fn test_query_skips_unset_fields() {
        let json = serde_json::to_value(OrderQuery {
            status: Some(OrderStatus::Ready),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"status": "готов"}));

        let from = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let json = serde_json::to_value(OrderQuery {
            date_from: Some(from),
            limit: Some(50),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"date_from": "2024-03-01T00:00:00", "limit": 50}));

        let json = serde_json::to_value(ProductQuery::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn test_product_page_decodes_store_payload() {
        let page: ProductPage = serde_json::from_str(
            r#"{"products": [{"_id": "p-1", "name": "Plov", "price": 45.5,
                "category": "Main", "is_available": true}],
                "total": 1, "page": 1, "limit": 10}"#,
        )
        .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.products[0].price, Money::from_minor(4550));
    }
}
