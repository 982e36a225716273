//! Local staff console.
//!
//! A small HTTP API over one [`StaffSession`]:
//!
//! - `GET /health` — liveness
//! - `GET /status` — channel state, counts, current notice
//! - `GET /orders?status=<status>` — the projection, optionally filtered
//! - `GET /orders/{id}/transitions` — statuses the order may move to
//! - `PATCH /orders/{id}/status` — request a transition (`{"status": ...}`)
//! - `POST /orders/{id}/cancel` — request cancellation
//!
//! Statuses are accepted as the English label (`READY`) or the wire value.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use kb_core::types::{Order, OrderId, OrderStatus, StatusCounts};

use crate::controller::TransitionError;
use crate::notices::Notice;
use crate::session::StaffSession;

/// Shared state for console handlers.
pub struct ConsoleState {
    pub session: Arc<StaffSession>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub role: String,
    pub channel: String,
    pub orders: usize,
    pub counts: StatusCounts,
    pub server_stats: Option<StatusCounts>,
    pub notice: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransitionsResponse {
    pub order_id: String,
    pub status: String,
    pub transitions: Vec<String>,
    pub can_cancel: bool,
}

#[derive(Debug, Deserialize)]
struct OrdersQuery {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    retryable: bool,
}

fn error(status: StatusCode, message: impl Into<String>, retryable: bool) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            retryable,
        }),
    )
        .into_response()
}

fn parse_status(raw: &str) -> Result<OrderStatus, Response> {
    OrderStatus::parse(raw)
        .ok_or_else(|| error(StatusCode::BAD_REQUEST, format!("unknown status {raw:?}"), false))
}

impl IntoResponse for TransitionError {
    fn into_response(self) -> Response {
        let code = match &self {
            TransitionError::UnknownOrder(_) => StatusCode::NOT_FOUND,
            TransitionError::Illegal(_) => StatusCode::CONFLICT,
            TransitionError::Store(e) if e.is_retryable() => StatusCode::BAD_GATEWAY,
            TransitionError::Store(_) => StatusCode::CONFLICT,
        };
        let retryable = self.is_retryable();
        error(code, self.to_string(), retryable)
    }
}

/// Build the console router.
pub fn console_router(state: Arc<ConsoleState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/orders", get(orders_handler))
        .route("/orders/:id/transitions", get(transitions_handler))
        .route("/orders/:id/status", patch(update_status_handler))
        .route("/orders/:id/cancel", post(cancel_handler))
        .with_state(state)
}

/// `GET /health`.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// `GET /status`.
async fn status_handler(State(state): State<Arc<ConsoleState>>) -> Json<StatusResponse> {
    let session = &state.session;
    Json(StatusResponse {
        role: session.role().to_string(),
        channel: session.channel_state().label().to_string(),
        orders: session.projection().len(),
        counts: session.local_counts(),
        server_stats: session.latest_stats(),
        notice: session.notices().current().map(|Notice { message, .. }| message),
    })
}

/// `GET /orders`.
async fn orders_handler(
    State(state): State<Arc<ConsoleState>>,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<Vec<Order>>, Response> {
    let filter = query.status.as_deref().map(parse_status).transpose()?;
    Ok(Json(state.session.orders(filter)))
}

/// `GET /orders/{id}/transitions`.
async fn transitions_handler(
    State(state): State<Arc<ConsoleState>>,
    Path(id): Path<String>,
) -> Result<Json<TransitionsResponse>, Response> {
    let id = OrderId::new(id);
    let session = &state.session;
    let status = session
        .projection()
        .status_of(&id)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("order {id} is not known"), false))?;
    let controller = session.controller();
    Ok(Json(TransitionsResponse {
        order_id: id.to_string(),
        status: status.label().to_string(),
        transitions: controller
            .offered_transitions(&id)
            .into_iter()
            .map(|s| s.label().to_string())
            .collect(),
        can_cancel: controller.can_cancel(&id),
    }))
}

/// `PATCH /orders/{id}/status`.
async fn update_status_handler(
    State(state): State<Arc<ConsoleState>>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Order>, Response> {
    let target = parse_status(&body.status)?;
    let order = state
        .session
        .controller()
        .request_transition(&OrderId::new(id), target)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(order))
}

/// `POST /orders/{id}/cancel`.
async fn cancel_handler(
    State(state): State<Arc<ConsoleState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, TransitionError> {
    let order = state.session.controller().cancel(&OrderId::new(id)).await?;
    Ok(Json(order))
}

/// Serve the console until `cancel` fires.
pub async fn run_console(router: Router, bind_addr: &str, cancel: CancellationToken) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "staff console listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await?;

    Ok(())
}
