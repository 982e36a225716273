//! Order Store error taxonomy.

/// Errors returned by an [`OrderStore`](crate::OrderStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The store refused the request (illegal transition, unavailable
    /// product, bad input). Authoritative; never retried.
    #[error("rejected by order store ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// The referenced order or product does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Another client changed the order first.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request body failed validation.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Server-side failure (5xx).
    #[error("order store unavailable ({status}): {detail}")]
    Unavailable { status: u16, detail: String },

    /// Connection refused, reset, or timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Map a non-success HTTP status and its body.
    ///
    /// The store reports errors as `{"error": ...}` or `{"detail": ...}`;
    /// anything else is kept verbatim.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = error_detail(body);
        match status {
            400 => Self::Rejected { status, detail },
            404 => Self::NotFound(detail),
            409 => Self::Conflict(detail),
            422 => Self::Invalid(detail),
            400..=499 => Self::Rejected { status, detail },
            _ => Self::Unavailable { status, detail },
        }
    }

    /// `true` for failures that may succeed if repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Unavailable { .. })
    }

    /// `true` when the store's view of the order differs from the request's
    /// assumptions, so the caller should refresh its copy.
    pub fn is_stale_view(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. } | Self::Conflict(_) | Self::NotFound(_)
        )
    }
}

fn error_detail(body: &str) -> String {
    let trimmed = body.trim();
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return trimmed.to_string();
    };
    let detail = value.get("error").or_else(|| value.get("detail"));
    match detail {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => trimmed.to_string(),
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), "")
        } else {
            Self::Transport(e.to_string())
        }
    }
}
