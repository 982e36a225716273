//! Order-related types: identifiers, status, customer, line items and the
//! order itself, as exchanged with the Order Store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::money::Money;
use super::product::ProductId;

/// Server-assigned order identifier. Opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    /// Create an order id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fulfillment status of an order.
///
/// Wire values are the Order Store's labels; the English names are accepted
/// on input as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Placed, not yet confirmed by staff.
    #[serde(rename = "новый", alias = "NEW")]
    New,
    /// Accepted by staff.
    #[serde(rename = "подтвержден", alias = "CONFIRMED")]
    Confirmed,
    /// In the kitchen.
    #[serde(rename = "готовится", alias = "PREPARING")]
    Preparing,
    /// Ready for pickup or delivery.
    #[serde(rename = "готов", alias = "READY")]
    Ready,
    /// Handed over; terminal.
    #[serde(rename = "выполнен", alias = "COMPLETED")]
    Completed,
    /// Cancelled; terminal.
    #[serde(rename = "отменен", alias = "CANCELLED")]
    Cancelled,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::New,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Label used by the Order Store on the wire.
    pub fn wire_value(&self) -> &'static str {
        match self {
            Self::New => "новый",
            Self::Confirmed => "подтвержден",
            Self::Preparing => "готовится",
            Self::Ready => "готов",
            Self::Completed => "выполнен",
            Self::Cancelled => "отменен",
        }
    }

    /// English label, used in logs and the staff console.
    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Confirmed => "CONFIRMED",
            Self::Preparing => "PREPARING",
            Self::Ready => "READY",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse either the wire value or the English label (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.wire_value() == s || status.label().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Customer contact details attached to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    /// International format: `+` followed by 12 digits.
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Reasons a [`Customer`] is not acceptable for a new order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CustomerError {
    #[error("customer name is required")]
    EmptyName,
    #[error("phone {0:?} must be '+' followed by {} digits", PHONE_DIGITS)]
    InvalidPhone(String),
    #[error("email {0:?} is not a valid address")]
    InvalidEmail(String),
}

/// Number of digits after the leading `+` in a customer phone number.
pub const PHONE_DIGITS: usize = 12;

impl Customer {
    /// Check the contact details before submitting an order.
    pub fn validate(&self) -> Result<(), CustomerError> {
        if self.name.trim().is_empty() {
            return Err(CustomerError::EmptyName);
        }
        if !is_valid_phone(&self.phone) {
            return Err(CustomerError::InvalidPhone(self.phone.clone()));
        }
        if !is_valid_email(&self.email) {
            return Err(CustomerError::InvalidEmail(self.email.clone()));
        }
        Ok(())
    }
}

fn is_valid_phone(phone: &str) -> bool {
    match phone.strip_prefix('+') {
        Some(digits) => digits.len() == PHONE_DIGITS && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

/// One product-and-quantity entry of an order.
///
/// `name` and `price` are snapshots taken when the order was created; later
/// catalog changes do not affect them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Product reference.
    #[serde(rename = "id", alias = "product_id")]
    pub product_id: ProductId,
    #[serde(alias = "product_name")]
    pub name: String,
    pub quantity: u32,
    /// Unit price at creation time.
    #[serde(alias = "unit_price")]
    pub price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_requests: Option<String>,
}

impl LineItem {
    /// Unit price times quantity.
    pub fn line_total(&self) -> Money {
        self.price * self.quantity
    }
}

/// An order as persisted by the Order Store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(alias = "_id")]
    pub id: OrderId,
    pub customer: Customer,
    pub items: Vec<LineItem>,
    pub status: OrderStatus,
    /// Server-computed sum of line totals.
    #[serde(alias = "total_amount")]
    pub total: Money,
    pub created_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_time: Option<NaiveDateTime>,
}

impl Order {
    /// Sum of the line totals. Matches `total` for any order the store
    /// persisted.
    pub fn items_total(&self) -> Money {
        self.items.iter().map(LineItem::line_total).sum()
    }
}

/// Order count per status.
///
/// Every status is present (zero by default). Unknown labels in a server
/// payload are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, u64>", into = "BTreeMap<String, u64>")]
pub struct StatusCounts(BTreeMap<OrderStatus, u64>);

impl StatusCounts {
    /// All statuses at zero.
    pub fn new() -> Self {
        Self(OrderStatus::ALL.into_iter().map(|s| (s, 0)).collect())
    }

    /// Count for one status.
    pub fn get(&self, status: OrderStatus) -> u64 {
        self.0.get(&status).copied().unwrap_or(0)
    }

    /// Increment the count for `status`.
    pub fn increment(&mut self, status: OrderStatus) {
        *self.0.entry(status).or_insert(0) += 1;
    }

    /// Overwrite the count for `status`.
    pub fn set(&mut self, status: OrderStatus, count: u64) {
        self.0.insert(status, count);
    }

    /// Sum over all statuses.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    /// Iterate `(status, count)` in lifecycle order.
    pub fn iter(&self) -> impl Iterator<Item = (OrderStatus, u64)> + '_ {
        self.0.iter().map(|(s, c)| (*s, *c))
    }
}

impl Default for StatusCounts {
    fn default() -> Self {
        Self::new()
    }
}

impl From<BTreeMap<String, u64>> for StatusCounts {
    fn from(raw: BTreeMap<String, u64>) -> Self {
        let mut counts = Self::new();
        for (label, count) in raw {
            if let Some(status) = OrderStatus::parse(&label) {
                counts.set(status, count);
            }
        }
        counts
    }
}

impl From<StatusCounts> for BTreeMap<String, u64> {
    fn from(counts: StatusCounts) -> Self {
        counts
            .0
            .into_iter()
            .map(|(s, c)| (s.wire_value().to_string(), c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> Customer {
        Customer {
            name: "Ivan Petrov".into(),
            phone: "+998901234567".into(),
            email: "ivan.petrov@example.com".into(),
            address: None,
        }
    }

    #[test]
    fn test_status_wire_values() {
        assert_eq!(serde_json::to_string(&OrderStatus::New).unwrap(), "\"новый\"");
        let s: OrderStatus = serde_json::from_str("\"готов\"").unwrap();
        assert_eq!(s, OrderStatus::Ready);
    }

    #[test]
    fn test_status_english_alias() {
        let s: OrderStatus = serde_json::from_str("\"CANCELLED\"").unwrap();
        assert_eq!(s, OrderStatus::Cancelled);
        assert_eq!(OrderStatus::parse("preparing"), Some(OrderStatus::Preparing));
        assert_eq!(OrderStatus::parse("выполнен"), Some(OrderStatus::Completed));
        assert_eq!(OrderStatus::parse("SHIPPED"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<_> = OrderStatus::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![OrderStatus::Completed, OrderStatus::Cancelled]);
    }

    #[test]
    fn test_customer_validate_ok() {
        assert_eq!(customer().validate(), Ok(()));
    }

    #[test]
    fn test_customer_phone_pattern() {
        for bad in ["998901234567", "+99890123456", "+9989012345678", "+99890123456a", ""] {
            let c = Customer {
                phone: bad.into(),
                ..customer()
            };
            assert!(
                matches!(c.validate(), Err(CustomerError::InvalidPhone(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_customer_name_and_email() {
        let c = Customer {
            name: "   ".into(),
            ..customer()
        };
        assert_eq!(c.validate(), Err(CustomerError::EmptyName));

        for bad in ["", "ivan", "@example.com", "ivan@example", "ivan@@example.com", "iv an@example.com"] {
            let c = Customer {
                email: bad.into(),
                ..customer()
            };
            assert!(
                matches!(c.validate(), Err(CustomerError::InvalidEmail(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_customer_error_messages() {
        assert_eq!(CustomerError::EmptyName.to_string(), "customer name is required");
        assert_eq!(
            CustomerError::InvalidPhone("12345".into()).to_string(),
            "phone \"12345\" must be '+' followed by 12 digits"
        );

        let c = Customer {
            email: "ivan".into(),
            ..customer()
        };
        let err: Box<dyn std::error::Error> = c.validate().unwrap_err().into();
        assert_eq!(err.to_string(), "email \"ivan\" is not a valid address");
    }

    #[test]
    fn test_order_deserialize_store_spelling() {
        let json = r#"{
            "_id": "550e8400-e29b-41d4-a716-446655440002",
            "customer": {"name": "Ivan", "phone": "+998901234567", "email": "ivan@example.com"},
            "items": [{
                "id": "550e8400-e29b-41d4-a716-446655440001",
                "name": "Margherita",
                "quantity": 2,
                "price": 450.0,
                "total_price": 900.0,
                "special_requests": "no onion"
            }],
            "status": "новый",
            "total_amount": 900.0,
            "created_at": "2024-01-01T12:00:00",
            "updated_at": "2024-01-01T12:00:00.123456"
        }"#;
        let order: Order = serde_json::from_str(json).unwrap();
        assert_eq!(order.id.as_str(), "550e8400-e29b-41d4-a716-446655440002");
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.total, Money::from_units(900));
        assert_eq!(order.items_total(), order.total);
        assert_eq!(order.items[0].special_requests.as_deref(), Some("no onion"));
        assert!(order.notes.is_none());
    }

    #[test]
    fn test_status_counts_wire_format() {
        let counts: StatusCounts =
            serde_json::from_str(r#"{"новый": 3, "готов": 1, "archived": 9}"#).unwrap();
        assert_eq!(counts.get(OrderStatus::New), 3);
        assert_eq!(counts.get(OrderStatus::Ready), 1);
        assert_eq!(counts.get(OrderStatus::Cancelled), 0);
        assert_eq!(counts.total(), 4);

        let json = serde_json::to_value(&counts).unwrap();
        assert_eq!(json["новый"], 3);
        assert_eq!(json["отменен"], 0);
    }
}
