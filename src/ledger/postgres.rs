//! PostgreSQL ledger. Schema lives in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::{LedgerError, OrderLedger, OrderUpdate, Precondition, UpdateOutcome};
use crate::domain::aggregates::{Fulfillment, Order, OrderItem, OrderStatus, PaymentMethod, Product, Shipment, WaitlistEntry};
use crate::domain::events::SideEffectKey;
use crate::domain::value_objects::{Contact, Money, OrderId, PollHandle, ProcessorReference, ProductId, Sku};

#[derive(Clone)]
pub struct PgLedger { pool: PgPool }

impl PgLedger {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    async fn load_items(&self, row: OrderRow) -> Result<Order, LedgerError> {
        let items = sqlx::query_as::<_, OrderItemRow>("SELECT product_id, name, quantity, unit_price FROM order_items WHERE order_id = $1 ORDER BY line_no")
            .bind(row.id).fetch_all(&self.pool).await?;
        row.into_order(items)
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, payment_method: String, status: String, status_version: i64, previous_status: Option<String>,
    contact_name: String, contact_email: String, contact_phone: Option<String>, fulfillment: String,
    shipping: Decimal, total: Decimal, currency: String,
    poll_handle: Option<String>, processor_reference: Option<String>,
    courier: Option<String>, tracking_number: Option<String>,
    poll_attempts: i32, polling_started_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow { product_id: Uuid, name: String, quantity: i32, unit_price: Decimal }

impl OrderRow {
    fn into_order(self, items: Vec<OrderItemRow>) -> Result<Order, LedgerError> {
        let corrupt = |e: crate::domain::aggregates::OrderError| LedgerError::Corrupt(format!("order {}: {}", self.id, e));
        let fulfillment = match self.fulfillment.as_str() {
            "pickup" => Fulfillment::Pickup,
            "delivery" => Fulfillment::Delivery,
            other => return Err(LedgerError::Corrupt(format!("order {}: fulfillment '{}'", self.id, other))),
        };
        let items = items.into_iter().map(|i| Ok(OrderItem {
            product_id: ProductId::from_uuid(i.product_id), name: i.name,
            quantity: non_negative(i.quantity, || format!("order {}: item quantity", self.id))?,
            unit_price: Money::new(i.unit_price, &self.currency),
        })).collect::<Result<Vec<_>, LedgerError>>()?;
        Ok(Order {
            id: OrderId::from_uuid(self.id),
            order_number: self.order_number.clone(),
            payment_method: self.payment_method.parse::<PaymentMethod>().map_err(corrupt)?,
            status: self.status.parse::<OrderStatus>().map_err(corrupt)?,
            status_version: self.status_version,
            previous_status: self.previous_status.as_deref().map(str::parse::<OrderStatus>).transpose().map_err(corrupt)?,
            contact: Contact { name: self.contact_name.clone(), email: self.contact_email.clone(), phone: self.contact_phone.clone() },
            fulfillment,
            items,
            shipping: Money::new(self.shipping, &self.currency),
            total: Money::new(self.total, &self.currency),
            poll_handle: self.poll_handle.clone().map(PollHandle),
            processor_reference: self.processor_reference.clone().map(ProcessorReference),
            shipment: self.courier.clone().map(|courier| Shipment { courier, tracking_number: self.tracking_number.clone() }),
            poll_attempts: non_negative(self.poll_attempts, || format!("order {}: poll_attempts", self.id))?,
            polling_started_at: self.polling_started_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow { id: Uuid, sku: String, name: String, price: Decimal, currency: String, inventory_quantity: i32, active: bool, updated_at: DateTime<Utc> }

impl ProductRow {
    fn into_product(self) -> Result<Product, LedgerError> {
        let sku = Sku::new(self.sku).map_err(|e| LedgerError::Corrupt(format!("product {}: {}", self.id, e)))?;
        let inventory = non_negative(self.inventory_quantity, || format!("product {}: inventory", self.id))?;
        Ok(Product::restore(ProductId::from_uuid(self.id), sku, self.name, Money::new(self.price, &self.currency), inventory, self.active, self.updated_at))
    }
}

fn non_negative(value: i32, what: impl FnOnce() -> String) -> Result<u32, LedgerError> {
    u32::try_from(value).map_err(|_| LedgerError::Corrupt(format!("{} is {}", what(), value)))
}

fn to_column(value: u32, what: &str) -> Result<i32, LedgerError> {
    i32::try_from(value).map_err(|_| LedgerError::Storage(format!("{} {} does not fit the column", what, value)))
}

#[derive(sqlx::FromRow)]
struct WaitlistRow { id: Uuid, product_id: Uuid, contact_name: String, contact_email: String, contact_phone: Option<String>, notified: bool, created_at: DateTime<Utc> }

impl From<WaitlistRow> for WaitlistEntry {
    fn from(r: WaitlistRow) -> Self {
        WaitlistEntry {
            id: r.id, product_id: ProductId::from_uuid(r.product_id),
            contact: Contact { name: r.contact_name, email: r.contact_email, phone: r.contact_phone },
            notified: r.notified, created_at: r.created_at,
        }
    }
}

const ORDER_COLUMNS: &str = "id, order_number, payment_method, status, status_version, previous_status, contact_name, contact_email, contact_phone, fulfillment, shipping, total, currency, poll_handle, processor_reference, courier, tracking_number, poll_attempts, polling_started_at, created_at, updated_at";

#[async_trait]
impl OrderLedger for PgLedger {
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, LedgerError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid()).fetch_optional(&self.pool).await?;
        match row { Some(row) => Ok(Some(self.load_items(row).await?)), None => Ok(None) }
    }

    async fn insert_order(&self, order: &Order) -> Result<(), LedgerError> {
        let fulfillment = match order.fulfillment { Fulfillment::Delivery => "delivery", Fulfillment::Pickup => "pickup" };
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO orders (id, order_number, payment_method, status, status_version, contact_name, contact_email, contact_phone, fulfillment, shipping, total, currency, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)")
            .bind(order.id.as_uuid()).bind(&order.order_number).bind(order.payment_method.as_str()).bind(order.status.as_str()).bind(order.status_version)
            .bind(&order.contact.name).bind(&order.contact.email).bind(&order.contact.phone).bind(fulfillment)
            .bind(order.shipping.amount()).bind(order.total.amount()).bind(order.total.currency()).bind(order.created_at)
            .execute(&mut *tx).await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => LedgerError::Duplicate(order.order_number.clone()),
                _ => LedgerError::from(e),
            })?;
        for (line_no, item) in order.items.iter().enumerate() {
            sqlx::query("INSERT INTO order_items (order_id, line_no, product_id, name, quantity, unit_price) VALUES ($1, $2, $3, $4, $5, $6)")
                .bind(order.id.as_uuid()).bind(to_column(u32::try_from(line_no).unwrap_or(u32::MAX), "line_no")?).bind(item.product_id.as_uuid()).bind(&item.name)
                .bind(to_column(item.quantity, "quantity")?).bind(item.unit_price.amount())
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn conditional_update_order(&self, id: OrderId, expected: Precondition, update: OrderUpdate) -> Result<UpdateOutcome, LedgerError> {
        let (courier, tracking) = match update.shipment { Some(s) => (Some(s.courier), s.tracking_number), None => (None, None) };
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET previous_status = status, status = $4, status_version = status_version + 1, processor_reference = COALESCE($5, processor_reference), courier = COALESCE($6, courier), tracking_number = COALESCE($7, tracking_number), updated_at = NOW() WHERE id = $1 AND status = $2 AND status_version = $3 RETURNING {ORDER_COLUMNS}"))
            .bind(id.as_uuid()).bind(expected.status.as_str()).bind(expected.version).bind(update.status.as_str())
            .bind(update.processor_reference.map(|r| r.0)).bind(courier).bind(tracking)
            .fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(UpdateOutcome::Committed(self.load_items(row).await?)),
            None => Ok(UpdateOutcome::Conflict),
        }
    }

    async fn attach_poll_handle(&self, id: OrderId, handle: &PollHandle) -> Result<bool, LedgerError> {
        let res = sqlx::query("UPDATE orders SET poll_handle = $2, poll_attempts = 0, polling_started_at = NOW(), updated_at = NOW() WHERE id = $1 AND status = 'pending'")
            .bind(id.as_uuid()).bind(&handle.0).execute(&self.pool).await?;
        Ok(res.rows_affected() == 1)
    }

    async fn record_poll_attempt(&self, id: OrderId) -> Result<Option<u32>, LedgerError> {
        let count: Option<(i32,)> = sqlx::query_as("UPDATE orders SET poll_attempts = poll_attempts + 1 WHERE id = $1 AND status = 'pending' RETURNING poll_attempts")
            .bind(id.as_uuid()).fetch_optional(&self.pool).await?;
        count.map(|(n,)| non_negative(n, || format!("order {}: poll_attempts", id))).transpose()
    }

    async fn attach_processor_reference(&self, id: OrderId, reference: &ProcessorReference) -> Result<bool, LedgerError> {
        let res = sqlx::query("UPDATE orders SET processor_reference = $2, updated_at = NOW() WHERE id = $1 AND processor_reference IS NULL")
            .bind(id.as_uuid()).bind(&reference.0).execute(&self.pool).await?;
        Ok(res.rows_affected() == 1)
    }

    async fn claim_side_effect(&self, key: &SideEffectKey) -> Result<bool, LedgerError> {
        let res = sqlx::query("INSERT INTO order_side_effects (order_id, effect_key, sent_at) VALUES ($1, $2, NOW()) ON CONFLICT (order_id, effect_key) DO NOTHING")
            .bind(key.order_id.as_uuid()).bind(key.flag()).execute(&self.pool).await?;
        Ok(res.rows_affected() == 1)
    }

    async fn release_side_effect(&self, key: &SideEffectKey) -> Result<(), LedgerError> {
        sqlx::query("DELETE FROM order_side_effects WHERE order_id = $1 AND effect_key = $2")
            .bind(key.order_id.as_uuid()).bind(key.flag()).execute(&self.pool).await?;
        Ok(())
    }

    async fn sent_side_effects(&self, id: OrderId) -> Result<Vec<String>, LedgerError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT effect_key FROM order_side_effects WHERE order_id = $1 ORDER BY effect_key")
            .bind(id.as_uuid()).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    async fn get_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, LedgerError> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        let rows = sqlx::query_as::<_, ProductRow>("SELECT id, sku, name, price, currency, inventory_quantity, active, updated_at FROM products WHERE id = ANY($1)")
            .bind(&ids).fetch_all(&self.pool).await?;
        rows.into_iter().map(ProductRow::into_product).collect()
    }

    async fn insert_product(&self, product: &Product) -> Result<(), LedgerError> {
        sqlx::query("INSERT INTO products (id, sku, name, price, currency, inventory_quantity, active, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)")
            .bind(product.id.as_uuid()).bind(product.sku.as_str()).bind(&product.name).bind(product.price.amount()).bind(product.price.currency())
            .bind(to_column(product.inventory, "inventory")?).bind(product.active).bind(product.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn add_inventory(&self, id: ProductId, quantity: u32) -> Result<(), LedgerError> {
        sqlx::query("UPDATE products SET inventory_quantity = inventory_quantity + $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid()).bind(to_column(quantity, "restock quantity")?).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_waitlist_entry(&self, entry: &WaitlistEntry) -> Result<(), LedgerError> {
        sqlx::query("INSERT INTO waitlist_entries (id, product_id, contact_name, contact_email, contact_phone, notified, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)")
            .bind(entry.id).bind(entry.product_id.as_uuid()).bind(&entry.contact.name).bind(&entry.contact.email).bind(&entry.contact.phone)
            .bind(entry.notified).bind(entry.created_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn unnotified_waitlist(&self, product_id: ProductId) -> Result<Vec<WaitlistEntry>, LedgerError> {
        let rows = sqlx::query_as::<_, WaitlistRow>("SELECT id, product_id, contact_name, contact_email, contact_phone, notified, created_at FROM waitlist_entries WHERE product_id = $1 AND notified = FALSE ORDER BY created_at")
            .bind(product_id.as_uuid()).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(WaitlistEntry::from).collect())
    }

    async fn claim_waitlist_entry(&self, id: Uuid) -> Result<bool, LedgerError> {
        let res = sqlx::query("UPDATE waitlist_entries SET notified = TRUE, notified_at = NOW() WHERE id = $1 AND notified = FALSE")
            .bind(id).execute(&self.pool).await?;
        Ok(res.rows_affected() == 1)
    }

    async fn release_waitlist_entry(&self, id: Uuid) -> Result<(), LedgerError> {
        sqlx::query("UPDATE waitlist_entries SET notified = FALSE, notified_at = NULL WHERE id = $1")
            .bind(id).execute(&self.pool).await?;
        Ok(())
    }
}
