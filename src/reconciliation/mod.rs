//! Reconciliation engine.
//!
//! Every observation runs the same algorithm: read `(status, version)`, treat
//! a repeat of the current status as a replay, discard edges the source may
//! not drive, then write conditionally. A lost race re-reads and tries once
//! more before giving up. Side effects are dispatched only after a commit.
//!
//! A replay writes no status, but it settles what the committed edge left
//! open: a processor reference the first observation lacked, and any effect
//! of that edge whose flag is still unclaimed.

mod scan;
mod transitions;

pub use scan::parse_collection_code;
pub use transitions::{allows, target_for};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, FireOutcome};
use crate::domain::aggregates::{Order, OrderStatus, Shipment};
use crate::domain::events::{Edge, Source, Transition};
use crate::domain::value_objects::{OrderId, ProcessorReference};
use crate::ledger::{bounded, OrderLedger, OrderUpdate, Precondition, UpdateOutcome};
use crate::payment::RawStatus;
use crate::{Error, Result};

/// Result of one observation. None of these are errors to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Applied(Transition),
    /// Target equals current status. No write, no side effects.
    Replayed,
    Discarded(Discard),
    /// The observation asked for nothing (an `Unknown` status).
    Ignored,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Discard {
    IllegalEdge { edge: Edge, via: Source },
    /// Processor signal about an order that was never sent to the processor.
    NoProcessorRelationship,
    LostRace,
}

impl fmt::Display for Discard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalEdge { edge, via } => write!(f, "{} is not allowed via {}", edge, via),
            Self::NoProcessorRelationship => write!(f, "order has no payment processor relationship"),
            Self::LostRace => write!(f, "order changed concurrently"),
        }
    }
}

/// Operator overrides
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Cash collected for a cash-on-delivery order.
    ConfirmCash,
    /// Processor payment confirmed out of band while the processor is unreachable.
    ForcePayment,
    Ship(Shipment),
    ReadyForPickup,
    Deliver,
    Cancel,
}

impl Command {
    pub fn target(&self) -> OrderStatus {
        match self {
            Self::ConfirmCash | Self::ForcePayment => OrderStatus::Paid,
            Self::Ship(_) => OrderStatus::Shipped,
            Self::ReadyForPickup => OrderStatus::ReadyForPickup,
            Self::Deliver => OrderStatus::Delivered,
            Self::Cancel => OrderStatus::Cancelled,
        }
    }

    /// The only status this command may start from, for commands narrower than the edge table.
    pub fn required_origin(&self) -> Option<OrderStatus> {
        match self {
            Self::ConfirmCash => Some(OrderStatus::PendingCash),
            Self::ForcePayment => Some(OrderStatus::Pending),
            _ => None,
        }
    }
}

struct Request {
    target: OrderStatus,
    source: Source,
    origin: Option<OrderStatus>,
    processor_reference: Option<ProcessorReference>,
    shipment: Option<Shipment>,
}

impl Request {
    fn processor(target: OrderStatus, source: Source, processor_reference: Option<ProcessorReference>) -> Self {
        Self { target, source, origin: None, processor_reference, shipment: None }
    }
}

pub struct Engine {
    ledger: Arc<dyn OrderLedger>,
    dispatcher: Arc<Dispatcher>,
    ledger_timeout: Duration,
}

impl Engine {
    pub fn new(ledger: Arc<dyn OrderLedger>, dispatcher: Arc<Dispatcher>, ledger_timeout: Duration) -> Self {
        Self { ledger, dispatcher, ledger_timeout }
    }

    pub async fn order(&self, id: OrderId) -> Result<Order> {
        bounded(self.ledger_timeout, self.ledger.get_order(id)).await?.ok_or(Error::OrderNotFound(id))
    }

    /// Applies a processor observation from a webhook or a poll.
    pub async fn observe(&self, order_id: OrderId, raw: RawStatus, source: Source, reference: Option<ProcessorReference>) -> Result<Outcome> {
        let Some(target) = target_for(raw) else {
            debug!(order_id = %order_id, source = %source, "unknown status, nothing to apply");
            return Ok(Outcome::Ignored);
        };
        self.drive(order_id, Request::processor(target, source, reference)).await
    }

    pub async fn command(&self, order_id: OrderId, command: Command) -> Result<Outcome> {
        let (target, origin) = (command.target(), command.required_origin());
        let shipment = match command { Command::Ship(s) => Some(s), _ => None };
        self.drive(order_id, Request { target, source: Source::Operator, origin, processor_reference: None, shipment }).await
    }

    /// Marks the order behind a scanned collection code as delivered.
    pub async fn collection_scan(&self, code: &str) -> Result<(OrderId, Outcome)> {
        let order_id = parse_collection_code(code).ok_or_else(|| Error::Validation(format!("unrecognised collection code '{}'", code)))?;
        let request = Request { target: OrderStatus::Delivered, source: Source::CollectionScan, origin: None, processor_reference: None, shipment: None };
        let outcome = self.drive(order_id, request).await?;
        Ok((order_id, outcome))
    }

    /// Polling ran out of attempts without a terminal answer.
    pub async fn expire(&self, order_id: OrderId) -> Result<Outcome> {
        self.drive(order_id, Request::processor(OrderStatus::Failed, Source::Poll, None)).await
    }

    /// Counts one processor poll against the order's polling window.
    pub async fn record_poll(&self, order_id: OrderId) -> Result<Option<u32>> {
        Ok(bounded(self.ledger_timeout, self.ledger.record_poll_attempt(order_id)).await?)
    }

    async fn drive(&self, order_id: OrderId, request: Request) -> Result<Outcome> {
        let source = request.source;
        for attempt in 0..2 {
            let order = self.order(order_id).await?;
            if source.is_processor() && !order.payment_method.uses_processor() {
                warn!(order_id = %order_id, source = %source, "processor signal for a cash order discarded");
                return Ok(Outcome::Discarded(Discard::NoProcessorRelationship));
            }
            if order.status == request.target {
                debug!(order_id = %order_id, status = %order.status, source = %source, "replayed observation");
                self.settle_replay(&order, &request).await?;
                return Ok(Outcome::Replayed);
            }
            let edge = Edge::new(order.status, request.target);
            if !allows(edge, source) || request.origin.is_some_and(|origin| origin != order.status) {
                info!(order_id = %order_id, edge = %edge, source = %source, "illegal edge discarded");
                return Ok(Outcome::Discarded(Discard::IllegalEdge { edge, via: source }));
            }

            let update = OrderUpdate { status: request.target, processor_reference: request.processor_reference.clone(), shipment: request.shipment.clone() };
            match bounded(self.ledger_timeout, self.ledger.conditional_update_order(order_id, Precondition::of(&order), update)).await? {
                UpdateOutcome::Committed(saved) => {
                    let transition = Transition { order_id, edge, source, version: saved.status_version, processor_reference: saved.processor_reference.clone() };
                    info!(order_id = %order_id, edge = %edge, source = %source, version = saved.status_version, "transition committed");
                    self.dispatcher.dispatch(&transition, &saved).await;
                    return Ok(Outcome::Applied(transition));
                }
                UpdateOutcome::Conflict => debug!(order_id = %order_id, edge = %edge, attempt, "conditional update lost"),
            }
        }
        warn!(order_id = %order_id, source = %source, target = %request.target, "lost race twice, observation discarded");
        Ok(Outcome::Discarded(Discard::LostRace))
    }

    /// Claims are set-if-unset, so effects already sent stay sent.
    async fn settle_replay(&self, order: &Order, request: &Request) -> Result<()> {
        let mut order = order.clone();
        if let (None, Some(reference)) = (&order.processor_reference, &request.processor_reference) {
            if bounded(self.ledger_timeout, self.ledger.attach_processor_reference(order.id, reference)).await? {
                info!(order_id = %order.id, reference = %reference.0, "processor reference recorded on replay");
                order.processor_reference = Some(reference.clone());
            }
        }
        if let Some(edge) = order.last_edge() {
            let transition = Transition {
                order_id: order.id, edge, source: request.source, version: order.status_version,
                processor_reference: order.processor_reference.clone(),
            };
            for (key, outcome) in self.dispatcher.dispatch(&transition, &order).await {
                if outcome != FireOutcome::AlreadyFired {
                    info!(key = %key, outcome = ?outcome, "side effect settled on replay");
                }
            }
        }
        Ok(())
    }
}
