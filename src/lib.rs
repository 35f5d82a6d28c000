//! Storefront order payment reconciliation.
//!
//! Orders move through a small status machine driven by four kinds of
//! observation: signed processor webhooks, client-driven polls, operator
//! overrides and collection scans. None of them share memory; the ledger's
//! conditional update is the only coordination point.
//!
//! ## Components
//! - [`ledger`]: typed store access with compare-and-swap status writes
//! - [`payment`]: processor adapter normalizing every vocabulary to [`payment::RawStatus`]
//! - [`reconciliation`]: the legal edge table and the transition algorithm
//! - [`dispatch`]: at-most-once side effects and restock waitlists
//! - [`checkout`], [`polling`], [`ingress`]: the ways in

pub mod checkout;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod ingress;
pub mod ledger;
pub mod payment;
pub mod polling;
pub mod reconciliation;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;

use crate::domain::value_objects::{OrderId, ProductId};
use crate::ledger::LedgerError;
use crate::payment::AdapterError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum Error {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Order {0} is no longer awaiting payment")]
    NotAwaitingPayment(OrderId),

    #[error("Payment processor error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Storage error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
