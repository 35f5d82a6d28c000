//! Domain events
use crate::domain::aggregates::OrderStatus;
use crate::domain::value_objects::{OrderId, ProcessorReference, ProductId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainEvent {
    Product(ProductEvent),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProductEvent {
    Restocked { product_id: ProductId, quantity: u32 },
}

/// Where an observation about an order came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Webhook,
    Poll,
    Operator,
    CollectionScan,
}

impl Source {
    /// Webhook and poll observations originate at the payment processor.
    pub fn is_processor(&self) -> bool { matches!(self, Self::Webhook | Self::Poll) }
    pub fn as_str(&self) -> &'static str {
        match self { Self::Webhook => "webhook", Self::Poll => "poll", Self::Operator => "operator", Self::CollectionScan => "collection_scan" }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A (current -> target) status pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge { pub from: OrderStatus, pub to: OrderStatus }

impl Edge {
    pub fn new(from: OrderStatus, to: OrderStatus) -> Self { Self { from, to } }

    pub fn name(&self) -> String { format!("{}->{}", self.from.as_str(), self.to.as_str()) }

    /// Effects owed by this particular edge. Keyed to the edge, not the resulting state.
    pub fn side_effects(&self) -> Vec<SideEffect> {
        use OrderStatus::*;
        match (self.from, self.to) {
            (Pending | PendingCash, Paid) => vec![SideEffect::PaymentConfirmation, SideEffect::RevenueRecognition],
            (Paid, Shipped) => vec![SideEffect::ShippingNotice],
            (_, ReadyForPickup) => vec![SideEffect::PickupNotice],
            (_, Delivered) => vec![SideEffect::DeliveryConfirmation],
            (Pending, Failed) => vec![SideEffect::PaymentFailedNotice],
            (_, Cancelled) => vec![SideEffect::CancellationNotice],
            _ => vec![],
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}->{}", self.from.as_str(), self.to.as_str()) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    PaymentConfirmation,
    RevenueRecognition,
    ShippingNotice,
    PickupNotice,
    DeliveryConfirmation,
    PaymentFailedNotice,
    CancellationNotice,
}

impl SideEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentConfirmation => "payment_confirmation",
            Self::RevenueRecognition => "revenue_recognition",
            Self::ShippingNotice => "shipping_notice",
            Self::PickupNotice => "pickup_notice",
            Self::DeliveryConfirmation => "delivery_confirmation",
            Self::PaymentFailedNotice => "payment_failed",
            Self::CancellationNotice => "order_cancelled",
        }
    }
}

/// At-most-once key for one effect of one committed edge on one order
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SideEffectKey { pub order_id: OrderId, pub edge: Edge, pub effect: SideEffect }

impl SideEffectKey {
    pub fn new(order_id: OrderId, edge: Edge, effect: SideEffect) -> Self { Self { order_id, edge, effect } }
    /// The per-order flag name persisted by the ledger.
    pub fn flag(&self) -> String { format!("{}#{}", self.edge.name(), self.effect.as_str()) }
}

impl fmt::Display for SideEffectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}:{}", self.order_id, self.flag()) }
}

/// A committed status change
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub order_id: OrderId,
    pub edge: Edge,
    pub source: Source,
    pub version: i64,
    pub processor_reference: Option<ProcessorReference>,
}

impl Transition {
    pub fn side_effect_keys(&self) -> Vec<SideEffectKey> {
        self.edge.side_effects().into_iter().map(|e| SideEffectKey::new(self.order_id, self.edge, e)).collect()
    }
}
