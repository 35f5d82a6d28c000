//! Checkout: prices an order from the catalog, persists it, starts payment.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::domain::aggregates::{Fulfillment, Order, OrderStatus, PaymentMethod};
use crate::domain::value_objects::{Contact, Money, OrderId, ProductId};
use crate::ledger::{bounded, LedgerError, OrderLedger};
use crate::payment::{Initiation, PaymentAdapter};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 20))]
    pub phone: Option<String>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub fulfillment: Fulfillment,
    #[validate(length(min = 1, max = 50))]
    pub items: Vec<CheckoutItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutItem {
    pub product_id: ProductId,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: u32,
    /// Refused when present; prices come from the catalog.
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub order_id: OrderId,
    pub order_number: String,
    pub status: OrderStatus,
    pub total: Money,
    pub payment: Option<Initiation>,
    /// Set when initiation failed; the order stays open for a retry.
    pub payment_error: Option<String>,
}

/// Insert attempts before a run of order-number collisions is reported.
const NUMBER_ATTEMPTS: usize = 3;

pub struct Checkout {
    ledger: Arc<dyn OrderLedger>,
    adapter: Arc<PaymentAdapter>,
    ledger_timeout: Duration,
    shipping: Money,
}

impl Checkout {
    pub fn new(ledger: Arc<dyn OrderLedger>, adapter: Arc<PaymentAdapter>, ledger_timeout: Duration, shipping: Money) -> Self {
        Self { ledger, adapter, ledger_timeout, shipping }
    }

    pub async fn place(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        validate(&request)?;
        let contact = Contact { name: request.name.trim().to_string(), email: request.email.trim().to_string(), phone: request.phone.clone() };

        let ids: Vec<ProductId> = request.items.iter().map(|i| i.product_id).collect();
        let catalog: HashMap<ProductId, _> = bounded(self.ledger_timeout, self.ledger.get_products(&ids)).await?
            .into_iter().map(|p| (p.id, p)).collect();
        let mut lines = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = catalog.get(&item.product_id).ok_or(Error::ProductNotFound(item.product_id))?;
            lines.push(product.price_line(item.quantity).map_err(|e| Error::Validation(format!("{}: {}", product.name, e)))?);
        }

        let mut order = Order::create(request.payment_method, contact, request.fulfillment, lines, self.shipping.clone())
            .map_err(|e| Error::Validation(e.to_string()))?;
        self.insert(&mut order).await?;
        info!(order_id = %order.id, order_number = %order.order_number, method = order.payment_method.as_str(), total = %order.total, "order placed");

        let mut receipt = CheckoutReceipt {
            order_id: order.id, order_number: order.order_number.clone(), status: order.status,
            total: order.total.clone(), payment: None, payment_error: None,
        };
        if order.payment_method.uses_processor() {
            match self.initiate(&order).await {
                Ok(init) => receipt.payment = Some(init),
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "payment initiation failed, order left pending");
                    receipt.payment_error = Some(e.to_string());
                }
            }
        }
        Ok(receipt)
    }

    async fn insert(&self, order: &mut Order) -> Result<()> {
        let mut attempt = 1;
        loop {
            match bounded(self.ledger_timeout, self.ledger.insert_order(order)).await {
                Err(LedgerError::Duplicate(number)) if attempt < NUMBER_ATTEMPTS => {
                    debug!(order_id = %order.id, order_number = %number, attempt, "order number taken, drawing another");
                    order.renumber();
                    attempt += 1;
                }
                other => return Ok(other?),
            }
        }
    }

    /// Starts a fresh processor payment for an order still awaiting one.
    pub async fn retry_payment(&self, order_id: OrderId) -> Result<Initiation> {
        let order = bounded(self.ledger_timeout, self.ledger.get_order(order_id)).await?.ok_or(Error::OrderNotFound(order_id))?;
        if order.status != OrderStatus::Pending || !order.payment_method.uses_processor() {
            return Err(Error::NotAwaitingPayment(order_id));
        }
        self.initiate(&order).await
    }

    async fn initiate(&self, order: &Order) -> Result<Initiation> {
        let init = self.adapter.initiate(order).await?;
        if !bounded(self.ledger_timeout, self.ledger.attach_poll_handle(order.id, &init.poll_handle)).await? {
            debug!(order_id = %order.id, "order settled before its poll handle was stored");
        }
        Ok(init)
    }
}

fn validate(request: &CheckoutRequest) -> Result<()> {
    request.validate().map_err(|e| Error::Validation(e.to_string()))?;
    let mut seen = HashSet::new();
    for item in &request.items {
        item.validate().map_err(|e| Error::Validation(e.to_string()))?;
        if item.unit_price.is_some() {
            return Err(Error::Validation("prices are set by the catalog, unit_price must not be sent".into()));
        }
        if !seen.insert(item.product_id) {
            return Err(Error::Validation(format!("product {} listed twice", item.product_id)));
        }
    }
    let has_phone = request.phone.as_deref().is_some_and(|p| !p.trim().is_empty());
    if request.payment_method == PaymentMethod::MobileWallet && !has_phone {
        return Err(Error::Validation("mobile wallet payments need a phone number".into()));
    }
    Ok(())
}
