//! Test doubles shared across module tests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::checkout::Checkout;
use crate::dispatch::{DeliveryPolicy, Dispatcher, MessageError, Messenger};
use crate::domain::aggregates::{Fulfillment, Order, OrderItem, OrderStatus, PaymentMethod, Product, WaitlistEntry};
use crate::domain::events::SideEffectKey;
use crate::domain::value_objects::{Contact, Money, OrderId, PollHandle, ProcessorReference, ProductId, Sku};
use crate::ledger::{LedgerError, MemoryLedger, OrderLedger, OrderUpdate, Precondition, UpdateOutcome};
use crate::payment::{AdapterError, Channel, CreatedPayment, PaymentAdapter, PaymentRequest, ProcessorClient, RetryPolicy, WalletRouter, WebhookVerifier};
use crate::polling::{PollSettings, Poller};
use crate::reconciliation::Engine;

pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Processor that answers from a script. Unscripted polls report a word no channel knows.
#[derive(Default)]
pub struct ScriptedProcessor {
    create_failures: Mutex<VecDeque<AdapterError>>,
    polls: Mutex<VecDeque<Result<String, AdapterError>>>,
    created: Mutex<Vec<Channel>>,
    create_attempts: Mutex<usize>,
    poll_attempts: Mutex<usize>,
}

impl ScriptedProcessor {
    pub fn new() -> Self { Self::default() }

    pub fn fail_next_creates(&self, errors: Vec<AdapterError>) { self.create_failures.lock().unwrap().extend(errors); }

    pub fn script_polls(&self, answers: Vec<Result<&str, AdapterError>>) {
        self.polls.lock().unwrap().extend(answers.into_iter().map(|a| a.map(String::from)));
    }

    pub fn create_attempts(&self) -> usize { *self.create_attempts.lock().unwrap() }
    pub fn poll_attempts(&self) -> usize { *self.poll_attempts.lock().unwrap() }
    pub fn created_channels(&self) -> Vec<Channel> { self.created.lock().unwrap().clone() }
}

#[async_trait]
impl ProcessorClient for ScriptedProcessor {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<CreatedPayment, AdapterError> {
        *self.create_attempts.lock().unwrap() += 1;
        if let Some(e) = self.create_failures.lock().unwrap().pop_front() { return Err(e); }
        self.created.lock().unwrap().push(request.channel);
        let handle = format!("pay_{}", Uuid::new_v4().simple());
        let redirect_url = (request.channel == Channel::Card).then(|| format!("https://pay.example.com/checkout/{handle}"));
        Ok(CreatedPayment { handle, instructions: None, redirect_url })
    }

    async fn poll_status(&self, _handle: &PollHandle) -> Result<String, AdapterError> {
        *self.poll_attempts.lock().unwrap() += 1;
        self.polls.lock().unwrap().pop_front().unwrap_or_else(|| Ok("processing".to_string()))
    }
}

#[derive(Clone, Debug)]
pub struct SentMessage { pub template: String, pub recipient: String, pub vars: Value }

/// Keeps every message; can be told to fail the next few sends.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<SentMessage>>,
    failures: Mutex<usize>,
}

impl RecordingMessenger {
    pub fn new() -> Self { Self::default() }
    pub fn fail_next(&self, n: usize) { *self.failures.lock().unwrap() = n; }
    pub fn sent_templates(&self) -> Vec<String> { self.sent.lock().unwrap().iter().map(|m| m.template.clone()).collect() }
    pub fn recipients(&self) -> Vec<String> { self.sent.lock().unwrap().iter().map(|m| m.recipient.clone()).collect() }
    pub fn count(&self, template: &str) -> usize { self.sent.lock().unwrap().iter().filter(|m| m.template == template).count() }
    pub fn last_vars(&self) -> Option<Value> { self.sent.lock().unwrap().last().map(|m| m.vars.clone()) }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, template: &str, recipient: &str, vars: &Value) -> Result<(), MessageError> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(MessageError::Transport("mailer offline".into()));
            }
        }
        self.sent.lock().unwrap().push(SentMessage { template: template.into(), recipient: recipient.into(), vars: vars.clone() });
        Ok(())
    }
}

/// Ledger that lets a competing writer commit just before the next conditional update.
#[derive(Default)]
pub struct RacingLedger {
    inner: MemoryLedger,
    interference: Mutex<VecDeque<OrderStatus>>,
    taken_numbers: Mutex<usize>,
    commit_then_time_out: Mutex<bool>,
}

impl RacingLedger {
    pub fn new() -> Self { Self::default() }
    pub fn interfere_with(&self, status: OrderStatus) { self.interference.lock().unwrap().push_back(status); }
    /// The next `n` order inserts report their order number as taken.
    pub fn take_next_order_numbers(&self, n: usize) { *self.taken_numbers.lock().unwrap() = n; }
    /// The next conditional update commits but the caller sees a timeout.
    pub fn lose_next_commit_ack(&self) { *self.commit_then_time_out.lock().unwrap() = true; }
}

#[async_trait]
impl OrderLedger for RacingLedger {
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, LedgerError> { self.inner.get_order(id).await }
    async fn insert_order(&self, order: &Order) -> Result<(), LedgerError> {
        {
            let mut taken = self.taken_numbers.lock().unwrap();
            if *taken > 0 {
                *taken -= 1;
                return Err(LedgerError::Duplicate(order.order_number.clone()));
            }
        }
        self.inner.insert_order(order).await
    }

    async fn conditional_update_order(&self, id: OrderId, expected: Precondition, update: OrderUpdate) -> Result<UpdateOutcome, LedgerError> {
        let competing = self.interference.lock().unwrap().pop_front();
        if let Some(status) = competing {
            if let Some(current) = self.inner.get_order(id).await? {
                self.inner.conditional_update_order(id, Precondition::of(&current), OrderUpdate::to(status)).await?;
            }
        }
        let outcome = self.inner.conditional_update_order(id, expected, update).await?;
        if std::mem::take(&mut *self.commit_then_time_out.lock().unwrap()) {
            return Err(LedgerError::Timeout(Duration::from_secs(1)));
        }
        Ok(outcome)
    }

    async fn attach_poll_handle(&self, id: OrderId, handle: &PollHandle) -> Result<bool, LedgerError> { self.inner.attach_poll_handle(id, handle).await }
    async fn record_poll_attempt(&self, id: OrderId) -> Result<Option<u32>, LedgerError> { self.inner.record_poll_attempt(id).await }
    async fn attach_processor_reference(&self, id: OrderId, reference: &ProcessorReference) -> Result<bool, LedgerError> { self.inner.attach_processor_reference(id, reference).await }
    async fn claim_side_effect(&self, key: &SideEffectKey) -> Result<bool, LedgerError> { self.inner.claim_side_effect(key).await }
    async fn release_side_effect(&self, key: &SideEffectKey) -> Result<(), LedgerError> { self.inner.release_side_effect(key).await }
    async fn sent_side_effects(&self, id: OrderId) -> Result<Vec<String>, LedgerError> { self.inner.sent_side_effects(id).await }
    async fn get_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, LedgerError> { self.inner.get_products(ids).await }
    async fn insert_product(&self, product: &Product) -> Result<(), LedgerError> { self.inner.insert_product(product).await }
    async fn add_inventory(&self, id: ProductId, quantity: u32) -> Result<(), LedgerError> { self.inner.add_inventory(id, quantity).await }
    async fn insert_waitlist_entry(&self, entry: &WaitlistEntry) -> Result<(), LedgerError> { self.inner.insert_waitlist_entry(entry).await }
    async fn unnotified_waitlist(&self, product_id: ProductId) -> Result<Vec<WaitlistEntry>, LedgerError> { self.inner.unnotified_waitlist(product_id).await }
    async fn claim_waitlist_entry(&self, id: Uuid) -> Result<bool, LedgerError> { self.inner.claim_waitlist_entry(id).await }
    async fn release_waitlist_entry(&self, id: Uuid) -> Result<(), LedgerError> { self.inner.release_waitlist_entry(id).await }
}

/// Fully wired service over in-memory fakes.
pub struct Fixture {
    pub ledger: Arc<MemoryLedger>,
    pub processor: Arc<ScriptedProcessor>,
    pub messenger: Arc<RecordingMessenger>,
    pub dispatcher: Arc<Dispatcher>,
    pub adapter: Arc<PaymentAdapter>,
    pub engine: Arc<Engine>,
    pub checkout: Arc<Checkout>,
}

impl Fixture {
    pub fn new() -> Self {
        let timeout = Duration::from_secs(1);
        let ledger = Arc::new(MemoryLedger::new());
        let processor = Arc::new(ScriptedProcessor::new());
        let messenger = Arc::new(RecordingMessenger::new());
        let dispatcher = Arc::new(Dispatcher::new(ledger.clone(), messenger.clone(), DeliveryPolicy::AtMostOnce, timeout));
        let adapter = Arc::new(PaymentAdapter::new(
            processor.clone(),
            WalletRouter::new(vec!["099".into()], vec!["088".into()]),
            WebhookVerifier::new(WEBHOOK_SECRET),
            RetryPolicy::new(2, Duration::from_millis(1)),
            timeout,
        ));
        let engine = Arc::new(Engine::new(ledger.clone(), dispatcher.clone(), timeout));
        let checkout = Arc::new(Checkout::new(ledger.clone(), adapter.clone(), timeout, Money::usd(Decimal::new(500, 2))));
        Self { ledger, processor, messenger, dispatcher, adapter, engine, checkout }
    }

    pub fn poller(&self, settings: PollSettings) -> Poller {
        Poller::new(self.engine.clone(), self.adapter.clone(), settings)
    }

    pub async fn product(&self, sku: &str, cents: i64, inventory: u32) -> Product {
        let mut product = Product::create(Sku::new(sku).unwrap(), sku.to_lowercase(), Money::usd(Decimal::new(cents, 2)));
        if inventory > 0 { product.add_inventory(inventory).unwrap(); }
        self.ledger.insert_product(&product).await.unwrap();
        product
    }

    /// Stored order in its initial status; processor orders get a poll handle.
    pub async fn pending_order(&self, method: PaymentMethod) -> Order {
        let item = OrderItem { product_id: ProductId::generate(), name: "Kettle".into(), quantity: 2, unit_price: Money::usd(Decimal::new(1875, 2)) };
        let contact = Contact { name: "Ada".into(), email: "ada@example.com".into(), phone: Some("0991234567".into()) };
        let order = Order::create(method, contact, Fulfillment::Delivery, vec![item], Money::usd(Decimal::new(500, 2))).unwrap();
        self.ledger.insert_order(&order).await.unwrap();
        if method.uses_processor() {
            self.ledger.attach_poll_handle(order.id, &PollHandle(format!("pay_{}", order.id))).await.unwrap();
        }
        self.engine.order(order.id).await.unwrap()
    }
}
