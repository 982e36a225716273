//! Product catalog loading.

use kb_core::types::Product;
use kb_gateway::{OrderStore, ProductQuery};

use crate::notices::{NoticeBoard, LOAD_PRODUCTS_FAILED};

/// Products matching `query`, or an empty list (with a notice) when the
/// store cannot be reached.
pub async fn load_catalog(store: &dyn OrderStore, query: &ProductQuery, notices: &NoticeBoard) -> Vec<Product> {
    match store.list_products(query).await {
        Ok(page) => {
            tracing::debug!(count = page.products.len(), total = page.total, "catalog loaded");
            page.products
        }
        Err(e) => {
            tracing::error!(error = %e, "catalog load failed");
            notices.post(LOAD_PRODUCTS_FAILED);
            Vec::new()
        }
    }
}

/// Distinct categories in first-seen order.
pub fn categories(products: &[Product]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for product in products {
        if !seen.contains(&product.category) {
            seen.push(product.category.clone());
        }
    }
    seen
}
