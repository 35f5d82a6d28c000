//! Restock waitlist entry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Contact, ProductId};

/// A customer waiting for a product to come back. `notified` flips exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub product_id: ProductId,
    pub contact: Contact,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

impl WaitlistEntry {
    pub fn new(product_id: ProductId, contact: Contact) -> Self {
        Self { id: Uuid::now_v7(), product_id, contact, notified: false, created_at: Utc::now() }
    }
}
