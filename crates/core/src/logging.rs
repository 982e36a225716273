//! Logging and tracing initialization for kitchenboard.
//!
//! Provides [`init_tracing`] to configure structured logging with two modes:
//! - **JSON mode** (`json = true`): machine-readable output with nanosecond
//!   timestamps, suitable for log aggregation.
//! - **Pretty mode** (`json = false`): human-readable colored output for
//!   local development.
//!
//! Both modes respect the `RUST_LOG` environment variable for filtering
//! (e.g., `RUST_LOG=kb_channel=debug,kb_staff=trace`).
//!
//! A [`PiiGuard`] layer flags events and spans that carry customer contact
//! details (phone numbers, email addresses). Orders are logged by id, never
//! by customer.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initialize the global tracing subscriber.
///
/// # Panics
///
/// Panics if the global subscriber has already been set.
pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(PiiGuard);

    if json {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(NanosecondTimer)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE);

        registry.with(json_layer).init();
    } else {
        let pretty_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false)
            .with_span_events(FmtSpan::CLOSE);

        registry.with(pretty_layer).init();
    }
}

/// Emits RFC 3339 timestamps with nanosecond precision for JSON logs.
#[derive(Debug, Clone)]
struct NanosecondTimer;

impl tracing_subscriber::fmt::time::FormatTime for NanosecondTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.9fZ"))
    }
}

/// A tracing layer that warns when customer contact details reach a log
/// record.
///
/// Detected:
/// - Fields named `phone`, `email`, `customer_phone`, `customer_email`,
///   `address` or `delivery_address`
/// - String values shaped like an international phone number
///   (`+` and 10 to 15 digits) or an email address
#[derive(Debug, Clone)]
pub struct PiiGuard;

impl<S> Layer<S> for PiiGuard
where
    S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_new_span(
        &self,
        attrs: &span::Attributes<'_>,
        _id: &span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = PiiVisitor::default();
        attrs.record(&mut visitor);
        if visitor.found_pii {
            tracing::warn!("customer contact details recorded in span fields; log order ids instead");
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = PiiVisitor::default();
        event.record(&mut visitor);
        if visitor.found_pii {
            tracing::warn!("customer contact details recorded in event fields; log order ids instead");
        }
    }
}

#[derive(Default)]
struct PiiVisitor {
    found_pii: bool,
}

/// Field names that always carry contact details.
const PII_FIELD_NAMES: &[&str] = &[
    "phone",
    "email",
    "customer_phone",
    "customer_email",
    "address",
    "delivery_address",
];

impl PiiVisitor {
    fn looks_like_phone(value: &str) -> bool {
        value.split_whitespace().any(|word| {
            word.strip_prefix('+').is_some_and(|digits| {
                (10..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
            })
        })
    }

    fn looks_like_email(value: &str) -> bool {
        value.split_whitespace().any(|word| {
            word.split_once('@').is_some_and(|(local, domain)| {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
            })
        })
    }

    fn looks_like_pii(value: &str) -> bool {
        Self::looks_like_phone(value) || Self::looks_like_email(value)
    }
}

impl Visit for PiiVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if PII_FIELD_NAMES.contains(&field.name()) {
            self.found_pii = true;
        } else if field.name() != "message" && Self::looks_like_pii(&format!("{value:?}")) {
            self.found_pii = true;
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if PII_FIELD_NAMES.contains(&field.name()) || Self::looks_like_pii(value) {
            self.found_pii = true;
        }
    }
}
