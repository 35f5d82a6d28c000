//! Legal edge table.

use crate::domain::aggregates::OrderStatus;
use crate::domain::events::{Edge, Source};
use crate::payment::RawStatus;

/// Status a processor observation asks for. `Unknown` asks for nothing.
pub fn target_for(raw: RawStatus) -> Option<OrderStatus> {
    match raw {
        RawStatus::Paid | RawStatus::AwaitingCapture => Some(OrderStatus::Paid),
        RawStatus::Cancelled => Some(OrderStatus::Cancelled),
        RawStatus::Failed => Some(OrderStatus::Failed),
        RawStatus::Unknown => None,
    }
}

/// Whether `source` may drive `edge`.
pub fn allows(edge: Edge, source: Source) -> bool {
    use OrderStatus::*;
    use Source::*;
    match (edge.from, edge.to) {
        (Pending, Paid) => matches!(source, Webhook | Poll | Operator),
        (Pending, Failed) => matches!(source, Webhook | Poll),
        (Pending, Cancelled) => matches!(source, Webhook | Poll | Operator),
        (PendingCash, Paid) | (PendingCash, Cancelled) => source == Operator,
        (Paid, Shipped) => source == Operator,
        (Paid | Shipped, ReadyForPickup) => source == Operator,
        (Paid | Shipped | ReadyForPickup, Delivered) => matches!(source, Operator | CollectionScan),
        _ => false,
    }
}
