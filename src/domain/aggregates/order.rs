//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::domain::events::Edge;
use crate::domain::value_objects::{Contact, Money, MoneyError, OrderId, PollHandle, ProcessorReference, ProductId};

/// Persisted order snapshot. Status fields change only through ledger conditional updates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub status_version: i64,
    /// Status before the last committed transition; together with `status` it names that edge.
    pub previous_status: Option<OrderStatus>,
    pub contact: Contact,
    pub fulfillment: Fulfillment,
    pub items: Vec<OrderItem>,
    pub shipping: Money,
    pub total: Money,
    pub poll_handle: Option<PollHandle>,
    pub processor_reference: Option<ProcessorReference>,
    pub shipment: Option<Shipment>,
    /// Processor polls counted by the server since `polling_started_at`.
    pub poll_attempts: u32,
    pub polling_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Line snapshot; the unit price is captured at checkout and never re-read
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem { pub product_id: ProductId, pub name: String, pub quantity: u32, pub unit_price: Money }

impl OrderItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment { pub courier: String, pub tracking_number: Option<String> }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fulfillment { #[default] Delivery, Pickup }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod { MobileWallet, Card, CashOnDelivery }

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::MobileWallet => "mobile_wallet", Self::Card => "card", Self::CashOnDelivery => "cash_on_delivery" }
    }
    pub fn initial_status(&self) -> OrderStatus {
        match self { Self::CashOnDelivery => OrderStatus::PendingCash, _ => OrderStatus::Pending }
    }
    /// Cash orders never have a processor relationship.
    pub fn uses_processor(&self) -> bool { !matches!(self, Self::CashOnDelivery) }
}

impl FromStr for PaymentMethod {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mobile_wallet" => Ok(Self::MobileWallet),
            "card" => Ok(Self::Card),
            "cash_on_delivery" => Ok(Self::CashOnDelivery),
            other => Err(OrderError::UnknownValue(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { Pending, PendingCash, Paid, Shipped, ReadyForPickup, Delivered, Cancelled, Failed }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingCash => "pending_cash",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::ReadyForPickup => "ready_for_pickup",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled | Self::Failed) }
    pub fn customer_status(&self) -> CustomerStatus {
        match self {
            Self::Pending | Self::PendingCash => CustomerStatus::Pending,
            Self::Paid | Self::Shipped | Self::ReadyForPickup | Self::Delivered => CustomerStatus::Paid,
            Self::Cancelled | Self::Failed => CustomerStatus::Failed,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "pending_cash" => Self::PendingCash,
            "paid" => Self::Paid,
            "shipped" => Self::Shipped,
            "ready_for_pickup" => Self::ReadyForPickup,
            "delivered" => Self::Delivered,
            "cancelled" => Self::Cancelled,
            "failed" => Self::Failed,
            other => return Err(OrderError::UnknownValue(other.to_string())),
        })
    }
}

/// The three coarse states customers ever see
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus { Pending, Paid, Failed }

impl Order {
    /// Builds a new order from lines already priced against the catalog.
    pub fn create(payment_method: PaymentMethod, contact: Contact, fulfillment: Fulfillment, items: Vec<OrderItem>, shipping: Money) -> Result<Self, OrderError> {
        if items.is_empty() { return Err(OrderError::NoItems); }
        if items.iter().any(|i| i.quantity == 0) { return Err(OrderError::InvalidQuantity); }
        let shipping = if fulfillment == Fulfillment::Pickup { Money::zero(shipping.currency()) } else { shipping };
        let mut total = Money::zero(shipping.currency());
        for item in &items { total = total.add(&item.line_total())?; }
        let total = total.add(&shipping)?;
        let now = Utc::now();
        Ok(Self {
            id: OrderId::generate(), order_number: order_number(),
            payment_method, status: payment_method.initial_status(), status_version: 0, previous_status: None,
            contact, fulfillment, items, shipping, total,
            poll_handle: None, processor_reference: None, shipment: None,
            poll_attempts: 0, polling_started_at: None,
            created_at: now, updated_at: now,
        })
    }

    /// Draws a fresh order number after the ledger reported the current one taken.
    pub fn renumber(&mut self) { self.order_number = order_number(); }

    /// The edge that produced the current status, if any transition has committed.
    pub fn last_edge(&self) -> Option<Edge> {
        self.previous_status.map(|from| Edge::new(from, self.status))
    }

    pub fn customer_status(&self) -> CustomerStatus { self.status.customer_status() }
}

const ORDER_NUMBER_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// `ORD-` plus eight Crockford base32 characters (40 random bits).
fn order_number() -> String {
    let mut bits: u64 = rand::random::<u64>() >> 24;
    let mut chars = [0u8; 8];
    for c in chars.iter_mut().rev() {
        *c = ORDER_NUMBER_ALPHABET[(bits & 31) as usize];
        bits >>= 5;
    }
    format!("ORD-{}", String::from_utf8_lossy(&chars))
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderError { NoItems, InvalidQuantity, Money(MoneyError), UnknownValue(String) }
impl std::error::Error for OrderError {}
impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoItems => write!(f, "No items"),
            Self::InvalidQuantity => write!(f, "Invalid quantity"),
            Self::Money(e) => write!(f, "{}", e),
            Self::UnknownValue(v) => write!(f, "Unknown value '{}'", v),
        }
    }
}
impl From<MoneyError> for OrderError { fn from(e: MoneyError) -> Self { Self::Money(e) } }
