//! Side-effect dispatcher.
//!
//! Each effect of a committed edge is guarded by a set-if-unset flag in the
//! ledger; only the caller that flips the flag sends. Restock waitlists reuse
//! the same claim-then-send pattern per entry.

mod messenger;

pub use messenger::{LogMessenger, MessageError, Messenger, NatsMessenger};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::aggregates::{Order, Product};
use crate::domain::events::{SideEffect, SideEffectKey, Transition};
use crate::ledger::{bounded, LedgerError, OrderLedger};

pub const RETRY_GUIDANCE: &str = "We could not confirm your payment. Please retry from your order page or choose a different payment method.";

/// When the sent flag is committed relative to the send.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryPolicy {
    /// Flag set before sending and kept even if the send fails.
    #[default]
    AtMostOnce,
    /// Flag released when the send fails, so a later dispatch can try again.
    AtLeastOnce,
}

impl FromStr for DeliveryPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "at-most-once" => Ok(Self::AtMostOnce),
            "at-least-once" => Ok(Self::AtLeastOnce),
            other => Err(format!("unknown delivery policy '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FireOutcome {
    Sent,
    /// Someone already owns this key.
    AlreadyFired,
    SendFailed,
}

pub struct Dispatcher {
    ledger: Arc<dyn OrderLedger>,
    messenger: Arc<dyn Messenger>,
    policy: DeliveryPolicy,
    ledger_timeout: Duration,
    accounting_recipient: String,
}

impl Dispatcher {
    pub fn new(ledger: Arc<dyn OrderLedger>, messenger: Arc<dyn Messenger>, policy: DeliveryPolicy, ledger_timeout: Duration) -> Self {
        Self { ledger, messenger, policy, ledger_timeout, accounting_recipient: "accounting".to_string() }
    }

    pub fn with_accounting_recipient(mut self, recipient: impl Into<String>) -> Self { self.accounting_recipient = recipient.into(); self }

    /// Fires every effect owed by a committed transition. Failures are logged, never raised:
    /// the transition itself already stands.
    pub async fn dispatch(&self, transition: &Transition, order: &Order) -> Vec<(SideEffectKey, FireOutcome)> {
        let mut results = Vec::new();
        for key in transition.side_effect_keys() {
            match self.fire(&key, order).await {
                Ok(outcome) => results.push((key, outcome)),
                Err(e) => error!(key = %key, error = %e, "could not claim side effect"),
            }
        }
        results
    }

    pub async fn fire(&self, key: &SideEffectKey, order: &Order) -> Result<FireOutcome, LedgerError> {
        if !bounded(self.ledger_timeout, self.ledger.claim_side_effect(key)).await? {
            debug!(key = %key, "side effect already fired");
            return Ok(FireOutcome::AlreadyFired);
        }
        let (recipient, vars) = self.message_for(key, order);
        match self.messenger.send_message(key.effect.as_str(), &recipient, &vars).await {
            Ok(()) => {
                info!(order_id = %key.order_id, edge = %key.edge, effect = key.effect.as_str(), "side effect sent");
                Ok(FireOutcome::Sent)
            }
            Err(e) => {
                warn!(key = %key, error = %e, policy = ?self.policy, "side effect send failed");
                if self.policy == DeliveryPolicy::AtLeastOnce {
                    bounded(self.ledger_timeout, self.ledger.release_side_effect(key)).await?;
                }
                Ok(FireOutcome::SendFailed)
            }
        }
    }

    fn message_for(&self, key: &SideEffectKey, order: &Order) -> (String, Value) {
        let mut vars = json!({
            "order_id": order.id,
            "order_number": order.order_number,
            "customer_name": order.contact.name,
            "total": order.total.amount().to_string(),
            "currency": order.total.currency(),
            "status": order.status,
        });
        match key.effect {
            SideEffect::ShippingNotice => if let Some(s) = &order.shipment {
                vars["courier"] = json!(s.courier);
                vars["tracking_number"] = json!(s.tracking_number);
            },
            SideEffect::PaymentFailedNotice => vars["retry_guidance"] = json!(RETRY_GUIDANCE),
            SideEffect::RevenueRecognition => vars["payment_method"] = json!(order.payment_method),
            _ => {}
        }
        let recipient = match key.effect {
            SideEffect::RevenueRecognition => self.accounting_recipient.clone(),
            _ => order.contact.email.clone(),
        };
        (recipient, vars)
    }

    /// Tells everyone waiting on a product that it is back. Each entry is notified once.
    pub async fn flush_waitlist(&self, product: &Product) -> Result<usize, LedgerError> {
        let entries = bounded(self.ledger_timeout, self.ledger.unnotified_waitlist(product.id)).await?;
        let mut sent = 0;
        for entry in entries {
            if !bounded(self.ledger_timeout, self.ledger.claim_waitlist_entry(entry.id)).await? { continue; }
            let vars = json!({ "product_name": product.name, "sku": product.sku.as_str(), "customer_name": entry.contact.name });
            match self.messenger.send_message("back_in_stock", &entry.contact.email, &vars).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(entry_id = %entry.id, product_id = %product.id, error = %e, "waitlist notice failed");
                    if self.policy == DeliveryPolicy::AtLeastOnce {
                        bounded(self.ledger_timeout, self.ledger.release_waitlist_entry(entry.id)).await?;
                    }
                }
            }
        }
        info!(product_id = %product.id, sent, "waitlist flushed");
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Fulfillment, OrderItem, OrderStatus, PaymentMethod, WaitlistEntry};
    use crate::domain::events::{Edge, Source};
    use crate::domain::value_objects::{Contact, Money, ProductId, Sku};
    use crate::ledger::MemoryLedger;
    use crate::testing::RecordingMessenger;
    use rust_decimal::Decimal;

    fn setup(policy: DeliveryPolicy) -> (Arc<MemoryLedger>, Arc<RecordingMessenger>, Dispatcher) {
        let ledger = Arc::new(MemoryLedger::new());
        let messenger = Arc::new(RecordingMessenger::new());
        let dispatcher = Dispatcher::new(ledger.clone(), messenger.clone(), policy, Duration::from_secs(1));
        (ledger, messenger, dispatcher)
    }

    fn paid_order() -> Order {
        let item = OrderItem { product_id: ProductId::generate(), name: "Lamp".into(), quantity: 1, unit_price: Money::usd(Decimal::new(2000, 2)) };
        let contact = Contact { name: "Ben".into(), email: "ben@example.com".into(), phone: None };
        let mut order = Order::create(PaymentMethod::Card, contact, Fulfillment::Delivery, vec![item], Money::usd(Decimal::ZERO)).unwrap();
        order.status = OrderStatus::Paid;
        order
    }

    fn paid_transition(order: &Order) -> Transition {
        Transition { order_id: order.id, edge: Edge::new(OrderStatus::Pending, OrderStatus::Paid), source: Source::Webhook, version: 1, processor_reference: None }
    }

    #[tokio::test]
    async fn test_dispatch_fires_each_effect_once() {
        let (ledger, messenger, dispatcher) = setup(DeliveryPolicy::AtMostOnce);
        let order = paid_order();
        let t = paid_transition(&order);

        let first = dispatcher.dispatch(&t, &order).await;
        assert!(first.iter().all(|(_, o)| *o == FireOutcome::Sent));
        let again = dispatcher.dispatch(&t, &order).await;
        assert!(again.iter().all(|(_, o)| *o == FireOutcome::AlreadyFired));

        assert_eq!(messenger.sent_templates(), vec!["payment_confirmation", "revenue_recognition"]);
        assert_eq!(messenger.recipients(), vec!["ben@example.com", "accounting"]);
        assert_eq!(ledger.sent_side_effects(order.id).await.unwrap(), vec!["pending->paid#payment_confirmation", "pending->paid#revenue_recognition"]);
    }

    #[tokio::test]
    async fn test_concurrent_fires_send_once() {
        let (_ledger, messenger, dispatcher) = setup(DeliveryPolicy::AtMostOnce);
        let dispatcher = Arc::new(dispatcher);
        let order = paid_order();
        let key = SideEffectKey::new(order.id, Edge::new(OrderStatus::Pending, OrderStatus::Paid), SideEffect::PaymentConfirmation);

        let handles: Vec<_> = (0..8).map(|_| {
            let (d, k, o) = (dispatcher.clone(), key.clone(), order.clone());
            tokio::spawn(async move { d.fire(&k, &o).await.unwrap() })
        }).collect();
        let mut sent = 0;
        for h in handles { if h.await.unwrap() == FireOutcome::Sent { sent += 1; } }
        assert_eq!(sent, 1);
        assert_eq!(messenger.sent_templates().len(), 1);
    }

    #[tokio::test]
    async fn test_at_most_once_keeps_flag_after_failed_send() {
        let (_ledger, messenger, dispatcher) = setup(DeliveryPolicy::AtMostOnce);
        let order = paid_order();
        let key = SideEffectKey::new(order.id, Edge::new(OrderStatus::Pending, OrderStatus::Paid), SideEffect::PaymentConfirmation);
        messenger.fail_next(1);
        assert_eq!(dispatcher.fire(&key, &order).await.unwrap(), FireOutcome::SendFailed);
        assert_eq!(dispatcher.fire(&key, &order).await.unwrap(), FireOutcome::AlreadyFired);
        assert!(messenger.sent_templates().is_empty());
    }

    #[tokio::test]
    async fn test_at_least_once_releases_flag_after_failed_send() {
        let (_ledger, messenger, dispatcher) = setup(DeliveryPolicy::AtLeastOnce);
        let order = paid_order();
        let key = SideEffectKey::new(order.id, Edge::new(OrderStatus::Pending, OrderStatus::Paid), SideEffect::PaymentConfirmation);
        messenger.fail_next(1);
        assert_eq!(dispatcher.fire(&key, &order).await.unwrap(), FireOutcome::SendFailed);
        assert_eq!(dispatcher.fire(&key, &order).await.unwrap(), FireOutcome::Sent);
        assert_eq!(dispatcher.fire(&key, &order).await.unwrap(), FireOutcome::AlreadyFired);
        assert_eq!(messenger.sent_templates(), vec!["payment_confirmation"]);
    }

    #[tokio::test]
    async fn test_shipping_notice_carries_courier() {
        let (_ledger, messenger, dispatcher) = setup(DeliveryPolicy::AtMostOnce);
        let mut order = paid_order();
        order.status = OrderStatus::Shipped;
        order.shipment = Some(crate::domain::aggregates::Shipment { courier: "Speedy".into(), tracking_number: Some("TRK1".into()) });
        let key = SideEffectKey::new(order.id, Edge::new(OrderStatus::Paid, OrderStatus::Shipped), SideEffect::ShippingNotice);
        dispatcher.fire(&key, &order).await.unwrap();
        let vars = messenger.last_vars().unwrap();
        assert_eq!(vars["courier"], "Speedy");
        assert_eq!(vars["tracking_number"], "TRK1");
    }

    #[tokio::test]
    async fn test_waitlist_flushes_once_per_entry() {
        let (ledger, messenger, dispatcher) = setup(DeliveryPolicy::AtMostOnce);
        let product = Product::create(Sku::new("TEA").unwrap(), "Tea", Money::usd(Decimal::new(500, 2)));
        ledger.insert_product(&product).await.unwrap();
        for email in ["a@example.com", "b@example.com"] {
            let contact = Contact { name: "W".into(), email: email.into(), phone: None };
            ledger.insert_waitlist_entry(&WaitlistEntry::new(product.id, contact)).await.unwrap();
        }
        assert_eq!(dispatcher.flush_waitlist(&product).await.unwrap(), 2);
        assert_eq!(dispatcher.flush_waitlist(&product).await.unwrap(), 0);
        assert_eq!(messenger.sent_templates(), vec!["back_in_stock", "back_in_stock"]);
    }

    #[test]
    fn test_delivery_policy_parses_config_names() {
        assert_eq!("at-least-once".parse::<DeliveryPolicy>().unwrap(), DeliveryPolicy::AtLeastOnce);
        assert!("sometimes".parse::<DeliveryPolicy>().is_err());
    }
}
