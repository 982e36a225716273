//! REST client for the Order Store.
//!
//! Reuses a single `reqwest::Client` for connection pooling. Every request
//! carries the configured timeout; non-success responses are mapped through
//! [`GatewayError::from_status`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use kb_core::config::ApiConfig;
use kb_core::types::{Order, OrderId, OrderStatus, StatusCounts};

use crate::error::GatewayError;
use crate::store::{NewOrderRequest, OrderPage, OrderQuery, OrderStore, ProductPage, ProductQuery};

/// Order Store over HTTP.
#[derive(Debug, Clone)]
pub struct RestOrderStore {
    base_url: String,
    client: Client,
}

#[derive(serde::Serialize)]
struct StatusUpdateBody {
    status: OrderStatus,
}

impl RestOrderStore {
    /// Create a client rooted at `base_url` (e.g. `http://localhost:8000/api/v1`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(api: &ApiConfig) -> Result<Self, GatewayError> {
        Self::new(api.base_url.clone(), Duration::from_millis(api.timeout_ms))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send `request`, map failures, and decode the JSON body.
    async fn send<T: DeserializeOwned>(
        &self,
        method: &'static str,
        path: &str,
        request: RequestBuilder,
    ) -> Result<T, GatewayError> {
        debug!(method, path, "order store request");

        let resp = request.send().await.map_err(|e| {
            tracing::warn!(method, path, error = %e, "order store request failed");
            GatewayError::from(e)
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(GatewayError::from)?;

        if !status.is_success() {
            let err = GatewayError::from_status(status.as_u16(), &body);
            tracing::warn!(method, path, status = status.as_u16(), error = %err, "order store error response");
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| GatewayError::Decode(format!("{method} {path}: {e}")))
    }
}

/// Statistics arrive as `{"statistics": {...}}` or as the bare mapping.
fn unwrap_statistics(mut value: serde_json::Value) -> Result<StatusCounts, GatewayError> {
    if let Some(inner) = value.get_mut("statistics") {
        value = inner.take();
    }
    serde_json::from_value(value).map_err(|e| GatewayError::Decode(format!("statistics: {e}")))
}

#[async_trait]
impl OrderStore for RestOrderStore {
    async fn list_products(&self, query: &ProductQuery) -> Result<ProductPage, GatewayError> {
        let path = "/products/";
        let request = self.client.get(self.url(path)).query(query);
        self.send("GET", path, request).await
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage, GatewayError> {
        let path = "/orders/";
        let request = self.client.get(self.url(path)).query(query);
        self.send("GET", path, request).await
    }

    async fn get_order(&self, id: &OrderId) -> Result<Order, GatewayError> {
        let path = format!("/orders/{id}");
        let request = self.client.get(self.url(&path));
        self.send("GET", &path, request).await
    }

    async fn create_order(&self, order: &NewOrderRequest) -> Result<Order, GatewayError> {
        let path = "/orders/";
        let request = self.client.post(self.url(path)).json(order);
        let created: Order = self.send("POST", path, request).await?;
        tracing::info!(order_id = %created.id, total = %created.total, "order created");
        Ok(created)
    }

    async fn update_status(&self, id: &OrderId, status: OrderStatus) -> Result<Order, GatewayError> {
        let path = format!("/orders/{id}/status");
        let request = self
            .client
            .patch(self.url(&path))
            .json(&StatusUpdateBody { status });
        let updated: Order = self.send("PATCH", &path, request).await?;
        tracing::info!(order_id = %id, status = %updated.status, "order status updated");
        Ok(updated)
    }

    async fn statistics(&self) -> Result<StatusCounts, GatewayError> {
        let path = "/orders/statistics/overview";
        let request = self.client.get(self.url(path));
        let value: serde_json::Value = self.send("GET", path, request).await?;
        unwrap_statistics(value)
    }
}
