//! Wire envelopes exchanged over the notification channel.
//!
//! Inbound payloads are JSON objects with a `type` discriminator. Both the
//! documented names (`ORDER_CREATED`, `ORDER_UPDATED`, `STATS_UPDATED`,
//! `error`) and the Order Store's own spellings (`new_order`,
//! `order_update`, `statistics_update`) are accepted. Orders travel in
//! `order` or `data`; statistics in `stats` or `data`.

use kb_core::types::{Order, OrderId, StatusCounts};
use serde::{Deserialize, Serialize};

/// An event delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A new order was persisted.
    OrderCreated(Order),
    /// An existing order changed; carries the full order.
    OrderUpdated(Order),
    /// Fresh per-status counts.
    StatsUpdated(StatusCounts),
    /// Server-reported error text.
    Error(String),
}

impl ChannelEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderCreated(_) => "ORDER_CREATED",
            Self::OrderUpdated(_) => "ORDER_UPDATED",
            Self::StatsUpdated(_) => "STATS_UPDATED",
            Self::Error(_) => "error",
        }
    }

    /// Encode as the server-side envelope, e.g.
    /// `{"type":"ORDER_CREATED","order":{...}}`.
    pub fn to_envelope(&self) -> serde_json::Value {
        match self {
            Self::OrderCreated(order) => {
                serde_json::json!({ "type": self.kind(), "order": order })
            }
            Self::OrderUpdated(order) => {
                serde_json::json!({ "type": self.kind(), "order": order })
            }
            Self::StatsUpdated(stats) => {
                serde_json::json!({ "type": self.kind(), "stats": stats })
            }
            Self::Error(message) => serde_json::json!({ "type": self.kind(), "error": message }),
        }
    }
}

/// Channel-level replies that are consumed by the channel itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Reply to a keepalive ping.
    Pong,
    /// Acknowledgement of an order subscription.
    Subscribed(Option<OrderId>),
}

/// Result of decoding one inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Event(ChannelEvent),
    Control(Control),
    /// A well-formed envelope with a `type` this client does not handle.
    Unknown(String),
}

/// Messages the client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keepalive.
    Ping,
    /// Ask for updates about a single order.
    SubscribeOrder { order_id: OrderId },
}

impl ClientMessage {
    pub fn to_text(&self) -> String {
        // Serializing a unit or string-field variant cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Errors decoding an inbound payload.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Not JSON, or no string `type` field.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Known `type` without the payload it requires.
    #[error("{kind} envelope has no payload")]
    MissingPayload { kind: &'static str },
    /// Known `type` whose payload does not decode.
    #[error("{kind} payload is invalid: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    order: Option<serde_json::Value>,
    #[serde(default)]
    stats: Option<serde_json::Value>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    order_id: Option<OrderId>,
}

impl RawEnvelope {
    fn order(&mut self, kind: &'static str) -> Result<Order, EnvelopeError> {
        let value = self
            .order
            .take()
            .or_else(|| self.data.take())
            .ok_or(EnvelopeError::MissingPayload { kind })?;
        serde_json::from_value(value).map_err(|source| EnvelopeError::InvalidPayload { kind, source })
    }

    fn stats(&mut self, kind: &'static str) -> Result<StatusCounts, EnvelopeError> {
        let mut value = self
            .stats
            .take()
            .or_else(|| self.data.take())
            .ok_or(EnvelopeError::MissingPayload { kind })?;
        // The store wraps counts as {"statistics": {...}}.
        if let Some(inner) = value.get_mut("statistics") {
            value = inner.take();
        }
        serde_json::from_value(value).map_err(|source| EnvelopeError::InvalidPayload { kind, source })
    }
}

/// Decode one inbound text payload.
pub fn decode(text: &str) -> Result<Inbound, EnvelopeError> {
    let mut raw: RawEnvelope = serde_json::from_str(text)?;
    let inbound = match raw.kind.as_str() {
        "ORDER_CREATED" | "new_order" => {
            Inbound::Event(ChannelEvent::OrderCreated(raw.order("ORDER_CREATED")?))
        }
        "ORDER_UPDATED" | "order_update" => {
            Inbound::Event(ChannelEvent::OrderUpdated(raw.order("ORDER_UPDATED")?))
        }
        "STATS_UPDATED" | "statistics_update" => {
            Inbound::Event(ChannelEvent::StatsUpdated(raw.stats("STATS_UPDATED")?))
        }
        "error" => {
            let text = raw
                .error
                .take()
                .or_else(|| raw.message.take())
                .unwrap_or_else(|| "unspecified error".to_string());
            Inbound::Event(ChannelEvent::Error(text))
        }
        "pong" => Inbound::Control(Control::Pong),
        "subscribed" => Inbound::Control(Control::Subscribed(raw.order_id.take())),
        _ => Inbound::Unknown(raw.kind),
    };
    Ok(inbound)
}
