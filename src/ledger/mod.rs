//! Order ledger: typed access to the durable store.
//!
//! Every status change goes through [`OrderLedger::conditional_update_order`], a
//! compare-and-swap on `(status, status_version)`. Handlers share no process
//! memory, so this is the only coordination primitive between the webhook, poll
//! and operator paths.

mod memory;
mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus, Product, Shipment, WaitlistEntry};
use crate::domain::events::SideEffectKey;
use crate::domain::value_objects::{OrderId, PollHandle, ProcessorReference, ProductId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("ledger call exceeded {0:?}")]
    Timeout(Duration),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("duplicate record: {0}")]
    Duplicate(String),
}

/// The state a writer observed and expects to still hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Precondition { pub status: OrderStatus, pub version: i64 }

impl Precondition {
    pub fn of(order: &Order) -> Self { Self { status: order.status, version: order.status_version } }
}

/// Fields a transition writes. `None` leaves the stored value untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderUpdate {
    pub status: OrderStatus,
    pub processor_reference: Option<ProcessorReference>,
    pub shipment: Option<Shipment>,
}

impl OrderUpdate {
    pub fn to(status: OrderStatus) -> Self { Self { status, processor_reference: None, shipment: None } }
}

#[derive(Clone, Debug)]
pub enum UpdateOutcome {
    Committed(Order),
    /// The precondition no longer held; someone else wrote first.
    Conflict,
}

#[async_trait]
pub trait OrderLedger: Send + Sync {
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, LedgerError>;

    /// Persists the order together with its items as one unit. A taken order number is `Duplicate`.
    async fn insert_order(&self, order: &Order) -> Result<(), LedgerError>;

    async fn conditional_update_order(&self, id: OrderId, expected: Precondition, update: OrderUpdate) -> Result<UpdateOutcome, LedgerError>;

    /// Records the processor's poll handle and restarts the polling window. Only applies while
    /// the order is still `Pending`.
    async fn attach_poll_handle(&self, id: OrderId, handle: &PollHandle) -> Result<bool, LedgerError>;

    /// Atomic increment of the poll counter while the order is `Pending`. Returns the new count,
    /// or `None` once the order has left `Pending`.
    async fn record_poll_attempt(&self, id: OrderId) -> Result<Option<u32>, LedgerError>;

    /// Fills in a processor reference that no transition recorded. Never overwrites one.
    async fn attach_processor_reference(&self, id: OrderId, reference: &ProcessorReference) -> Result<bool, LedgerError>;

    /// Set-if-unset on the per-(order, edge, effect) flag. `true` means this caller owns the send.
    async fn claim_side_effect(&self, key: &SideEffectKey) -> Result<bool, LedgerError>;

    async fn release_side_effect(&self, key: &SideEffectKey) -> Result<(), LedgerError>;

    async fn sent_side_effects(&self, id: OrderId) -> Result<Vec<String>, LedgerError>;

    async fn get_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, LedgerError>;

    async fn insert_product(&self, product: &Product) -> Result<(), LedgerError>;

    /// Atomic increment; concurrent restocks both count. Overflow is refused.
    async fn add_inventory(&self, id: ProductId, quantity: u32) -> Result<(), LedgerError>;

    async fn insert_waitlist_entry(&self, entry: &WaitlistEntry) -> Result<(), LedgerError>;

    async fn unnotified_waitlist(&self, product_id: ProductId) -> Result<Vec<WaitlistEntry>, LedgerError>;

    /// Flips `notified` from false to true. `true` means this caller owns the send.
    async fn claim_waitlist_entry(&self, id: Uuid) -> Result<bool, LedgerError>;

    async fn release_waitlist_entry(&self, id: Uuid) -> Result<(), LedgerError>;
}

/// Runs a ledger call under a deadline.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, LedgerError>
where
    F: Future<Output = Result<T, LedgerError>>,
{
    tokio::time::timeout(limit, call).await.map_err(|_| LedgerError::Timeout(limit))?
}
