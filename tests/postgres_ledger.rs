//! PostgreSQL ledger against a real database.
//!
//! One container and one migration run are shared by every test in this file.
//! Run with: cargo test --test postgres_ledger -- --ignored

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

use storefront_reconcile::domain::aggregates::{Fulfillment, Order, OrderItem, OrderStatus, PaymentMethod, Product};
use storefront_reconcile::domain::events::{Edge, SideEffect, SideEffectKey};
use storefront_reconcile::domain::value_objects::{Contact, Money, PollHandle, ProcessorReference, ProductId, Sku};
use storefront_reconcile::ledger::{LedgerError, OrderLedger, OrderUpdate, PgLedger, Precondition, UpdateOutcome};

struct SharedDatabase {
    url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_DB: OnceCell<SharedDatabase> = OnceCell::const_new();

impl SharedDatabase {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default().with_tag("16").start().await.context("Failed to start Postgres container")?;
        let url = format!("postgresql://postgres:postgres@{}:{}/postgres", postgres.get_host().await?, postgres.get_host_port_ipv4(5432).await?);

        let pool = PgPool::connect(&url).await.context("Failed to connect to Postgres for migrations")?;
        sqlx::migrate!("./migrations").run(&pool).await.context("Failed to run migrations")?;
        Ok(Self { url, _postgres: postgres })
    }
}

async fn ledger() -> PgLedger {
    let shared = SHARED_DB
        .get_or_init(|| async { SharedDatabase::init().await.expect("Failed to initialize shared database") })
        .await;
    PgLedger::new(PgPool::connect(&shared.url).await.expect("Failed to connect to shared database"))
}

fn order() -> Order {
    let item = OrderItem { product_id: ProductId::generate(), name: "Kettle".into(), quantity: 2, unit_price: Money::usd(Decimal::new(1875, 2)) };
    let contact = Contact { name: "Ada".into(), email: "ada@example.com".into(), phone: None };
    Order::create(PaymentMethod::Card, contact, Fulfillment::Delivery, vec![item], Money::usd(Decimal::new(500, 2))).unwrap()
}

fn product() -> Product {
    let sku = format!("SKU-{}", ProductId::generate());
    Product::create(Sku::new(sku).unwrap(), "Teapot", Money::usd(Decimal::new(3000, 2)))
}

#[tokio::test]
#[ignore = "needs Docker for PostgreSQL"]
async fn test_insert_stores_items_and_refuses_taken_number() {
    let ledger = ledger().await;
    let first = order();
    ledger.insert_order(&first).await.unwrap();

    let stored = ledger.get_order(first.id).await.unwrap().unwrap();
    assert_eq!(stored.items, first.items);
    assert_eq!(stored.total, first.total);
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(stored.last_edge(), None);

    let mut second = order();
    second.order_number = first.order_number.clone();
    assert!(matches!(ledger.insert_order(&second).await.unwrap_err(), LedgerError::Duplicate(n) if n == first.order_number));
    assert!(ledger.get_order(second.id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "needs Docker for PostgreSQL"]
async fn test_stale_version_conflicts_and_reference_survives() {
    let ledger = ledger().await;
    let o = order();
    ledger.insert_order(&o).await.unwrap();

    let stale = Precondition { status: OrderStatus::Pending, version: 7 };
    assert!(matches!(ledger.conditional_update_order(o.id, stale, OrderUpdate::to(OrderStatus::Paid)).await.unwrap(), UpdateOutcome::Conflict));

    let mut update = OrderUpdate::to(OrderStatus::Paid);
    update.processor_reference = Some(ProcessorReference("R1".into()));
    let UpdateOutcome::Committed(paid) = ledger.conditional_update_order(o.id, Precondition::of(&o), update).await.unwrap() else { panic!("expected commit") };
    assert_eq!(paid.status_version, 1);
    assert_eq!(paid.last_edge(), Some(Edge::new(OrderStatus::Pending, OrderStatus::Paid)));

    // A later transition without a reference keeps R1.
    let UpdateOutcome::Committed(cancelled) = ledger.conditional_update_order(o.id, Precondition::of(&paid), OrderUpdate::to(OrderStatus::Cancelled)).await.unwrap() else { panic!("expected commit") };
    assert_eq!(cancelled.processor_reference, Some(ProcessorReference("R1".into())));
    assert_eq!(cancelled.last_edge(), Some(Edge::new(OrderStatus::Paid, OrderStatus::Cancelled)));

    assert!(matches!(ledger.conditional_update_order(o.id, Precondition::of(&paid), OrderUpdate::to(OrderStatus::Delivered)).await.unwrap(), UpdateOutcome::Conflict));
}

#[tokio::test]
#[ignore = "needs Docker for PostgreSQL"]
async fn test_side_effect_claim_is_set_if_unset() {
    let ledger = ledger().await;
    let o = order();
    ledger.insert_order(&o).await.unwrap();
    let key = SideEffectKey::new(o.id, Edge::new(OrderStatus::Pending, OrderStatus::Paid), SideEffect::PaymentConfirmation);

    assert!(ledger.claim_side_effect(&key).await.unwrap());
    assert!(!ledger.claim_side_effect(&key).await.unwrap());
    assert_eq!(ledger.sent_side_effects(o.id).await.unwrap(), vec![key.flag()]);

    ledger.release_side_effect(&key).await.unwrap();
    assert!(ledger.sent_side_effects(o.id).await.unwrap().is_empty());
    assert!(ledger.claim_side_effect(&key).await.unwrap());
}

#[tokio::test]
#[ignore = "needs Docker for PostgreSQL"]
async fn test_poll_counter_and_reference_fill() {
    let ledger = ledger().await;
    let o = order();
    ledger.insert_order(&o).await.unwrap();

    assert_eq!(ledger.record_poll_attempt(o.id).await.unwrap(), Some(1));
    assert_eq!(ledger.record_poll_attempt(o.id).await.unwrap(), Some(2));
    assert!(ledger.attach_poll_handle(o.id, &PollHandle("h-1".into())).await.unwrap());
    let reloaded = ledger.get_order(o.id).await.unwrap().unwrap();
    assert_eq!(reloaded.poll_attempts, 0);
    assert!(reloaded.polling_started_at.is_some());

    assert!(ledger.attach_processor_reference(o.id, &ProcessorReference("R1".into())).await.unwrap());
    assert!(!ledger.attach_processor_reference(o.id, &ProcessorReference("R2".into())).await.unwrap());

    ledger.conditional_update_order(o.id, Precondition::of(&reloaded), OrderUpdate::to(OrderStatus::Failed)).await.unwrap();
    assert_eq!(ledger.record_poll_attempt(o.id).await.unwrap(), None);
    assert!(!ledger.attach_poll_handle(o.id, &PollHandle("h-2".into())).await.unwrap());
    assert_eq!(ledger.get_order(o.id).await.unwrap().unwrap().processor_reference, Some(ProcessorReference("R1".into())));
}

#[tokio::test]
#[ignore = "needs Docker for PostgreSQL"]
async fn test_restock_adds_and_refuses_overflow() {
    let ledger = ledger().await;
    let p = product();
    ledger.insert_product(&p).await.unwrap();

    ledger.add_inventory(p.id, 4).await.unwrap();
    ledger.add_inventory(p.id, 6).await.unwrap();
    assert!(ledger.add_inventory(p.id, i32::MAX as u32).await.is_err());
    assert!(ledger.add_inventory(p.id, u32::MAX).await.is_err());
    assert_eq!(ledger.get_products(&[p.id]).await.unwrap()[0].inventory, 10);
}
