//! Product Aggregate

use chrono::{DateTime, Utc};
use crate::domain::aggregates::OrderItem;
use crate::domain::value_objects::{Sku, Money, ProductId};
use crate::domain::events::{DomainEvent, ProductEvent};

/// Catalog entry. Its price is the only price checkout ever trusts.
#[derive(Clone, Debug)]
pub struct Product {
    pub id: ProductId,
    pub sku: Sku,
    pub name: String,
    pub price: Money,
    pub inventory: u32,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

impl Product {
    pub fn create(sku: Sku, name: impl Into<String>, price: Money) -> Self {
        Self::restore(ProductId::generate(), sku, name, price, 0, true, Utc::now())
    }

    pub fn restore(id: ProductId, sku: Sku, name: impl Into<String>, price: Money, inventory: u32, active: bool, updated_at: DateTime<Utc>) -> Self {
        Self { id, sku, name: name.into(), price, inventory, active, updated_at, events: vec![] }
    }

    pub fn is_in_stock(&self) -> bool { self.inventory > 0 }

    /// Snapshots an order line at today's catalog price.
    pub fn price_line(&self, quantity: u32) -> Result<OrderItem, ProductError> {
        if !self.active { return Err(ProductError::Inactive); }
        if quantity == 0 { return Err(ProductError::InvalidQuantity); }
        if quantity > self.inventory { return Err(ProductError::InsufficientInventory); }
        Ok(OrderItem { product_id: self.id, name: self.name.clone(), quantity, unit_price: self.price.clone() })
    }

    pub fn add_inventory(&mut self, qty: u32) -> Result<(), ProductError> {
        if qty == 0 { return Err(ProductError::InvalidQuantity); }
        self.inventory = self.inventory.saturating_add(qty);
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::Restocked { product_id: self.id, quantity: qty }));
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ProductError { Inactive, InvalidQuantity, InsufficientInventory }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "Product is not available"),
            Self::InvalidQuantity => write!(f, "Invalid quantity"),
            Self::InsufficientInventory => write!(f, "Insufficient inventory"),
        }
    }
}
