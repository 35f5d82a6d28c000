//! In-process ledger for development runs without a database, and for tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::{LedgerError, OrderLedger, OrderUpdate, Precondition, UpdateOutcome};
use crate::domain::aggregates::{Order, OrderStatus, Product, WaitlistEntry};
use crate::domain::events::SideEffectKey;
use crate::domain::value_objects::{OrderId, PollHandle, ProcessorReference, ProductId};

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    side_effects: HashSet<(OrderId, String)>,
    products: HashMap<ProductId, Product>,
    waitlist: HashMap<Uuid, WaitlistEntry>,
}

/// Holds everything behind one lock, so each call is atomic just like a single SQL statement.
#[derive(Default)]
pub struct MemoryLedger {
    state: RwLock<State>,
}

impl MemoryLedger {
    pub fn new() -> Self { Self::default() }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, LedgerError> {
        self.state.read().map_err(|e| LedgerError::Storage(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, LedgerError> {
        self.state.write().map_err(|e| LedgerError::Storage(e.to_string()))
    }
}

#[async_trait]
impl OrderLedger for MemoryLedger {
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, LedgerError> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    async fn insert_order(&self, order: &Order) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        if state.orders.contains_key(&order.id) { return Err(LedgerError::Duplicate(order.id.to_string())); }
        if state.orders.values().any(|o| o.order_number == order.order_number) {
            return Err(LedgerError::Duplicate(order.order_number.clone()));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn conditional_update_order(&self, id: OrderId, expected: Precondition, update: OrderUpdate) -> Result<UpdateOutcome, LedgerError> {
        let mut state = self.write()?;
        let Some(order) = state.orders.get_mut(&id) else { return Ok(UpdateOutcome::Conflict) };
        if order.status != expected.status || order.status_version != expected.version {
            return Ok(UpdateOutcome::Conflict);
        }
        order.previous_status = Some(order.status);
        order.status = update.status;
        order.status_version += 1;
        if update.processor_reference.is_some() { order.processor_reference = update.processor_reference; }
        if update.shipment.is_some() { order.shipment = update.shipment; }
        order.updated_at = Utc::now();
        Ok(UpdateOutcome::Committed(order.clone()))
    }

    async fn attach_poll_handle(&self, id: OrderId, handle: &PollHandle) -> Result<bool, LedgerError> {
        let mut state = self.write()?;
        match state.orders.get_mut(&id) {
            Some(order) if order.status == OrderStatus::Pending => {
                let now = Utc::now();
                order.poll_handle = Some(handle.clone());
                order.poll_attempts = 0;
                order.polling_started_at = Some(now);
                order.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_poll_attempt(&self, id: OrderId) -> Result<Option<u32>, LedgerError> {
        let mut state = self.write()?;
        match state.orders.get_mut(&id) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.poll_attempts = order.poll_attempts.saturating_add(1);
                Ok(Some(order.poll_attempts))
            }
            _ => Ok(None),
        }
    }

    async fn attach_processor_reference(&self, id: OrderId, reference: &ProcessorReference) -> Result<bool, LedgerError> {
        let mut state = self.write()?;
        match state.orders.get_mut(&id) {
            Some(order) if order.processor_reference.is_none() => {
                order.processor_reference = Some(reference.clone());
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_side_effect(&self, key: &SideEffectKey) -> Result<bool, LedgerError> {
        Ok(self.write()?.side_effects.insert((key.order_id, key.flag())))
    }

    async fn release_side_effect(&self, key: &SideEffectKey) -> Result<(), LedgerError> {
        self.write()?.side_effects.remove(&(key.order_id, key.flag()));
        Ok(())
    }

    async fn sent_side_effects(&self, id: OrderId) -> Result<Vec<String>, LedgerError> {
        let mut flags: Vec<String> = self.read()?.side_effects.iter().filter(|(o, _)| *o == id).map(|(_, f)| f.clone()).collect();
        flags.sort();
        Ok(flags)
    }

    async fn get_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, LedgerError> {
        let state = self.read()?;
        Ok(ids.iter().filter_map(|id| state.products.get(id).cloned()).collect())
    }

    async fn insert_product(&self, product: &Product) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        if state.products.contains_key(&product.id) { return Err(LedgerError::Duplicate(product.id.to_string())); }
        let mut stored = product.clone();
        stored.take_events();
        state.products.insert(product.id, stored);
        Ok(())
    }

    async fn add_inventory(&self, id: ProductId, quantity: u32) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        let product = state.products.get_mut(&id).ok_or_else(|| LedgerError::Storage(format!("product {} missing", id)))?;
        product.inventory = product.inventory.checked_add(quantity)
            .filter(|total| i32::try_from(*total).is_ok())
            .ok_or_else(|| LedgerError::Storage(format!("inventory of {} would overflow", id)))?;
        product.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_waitlist_entry(&self, entry: &WaitlistEntry) -> Result<(), LedgerError> {
        self.write()?.waitlist.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn unnotified_waitlist(&self, product_id: ProductId) -> Result<Vec<WaitlistEntry>, LedgerError> {
        let mut entries: Vec<WaitlistEntry> = self.read()?.waitlist.values().filter(|e| e.product_id == product_id && !e.notified).cloned().collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn claim_waitlist_entry(&self, id: Uuid) -> Result<bool, LedgerError> {
        let mut state = self.write()?;
        match state.waitlist.get_mut(&id) {
            Some(entry) if !entry.notified => { entry.notified = true; Ok(true) }
            _ => Ok(false),
        }
    }

    async fn release_waitlist_entry(&self, id: Uuid) -> Result<(), LedgerError> {
        if let Some(entry) = self.write()?.waitlist.get_mut(&id) { entry.notified = false; }
        Ok(())
    }
}
