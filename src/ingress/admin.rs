//! Operator overrides, collection scans and restock waitlists.

use axum::{extract::{Path, State}, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::{reject, ApiError, AppState};
use crate::domain::aggregates::{Order, Product, Shipment, WaitlistEntry};
use crate::domain::events::{DomainEvent, ProductEvent};
use crate::domain::value_objects::{Contact, OrderId, ProductId};
use crate::ledger::bounded;
use crate::reconciliation::{Command, Outcome};
use crate::{Error, Result};

#[derive(Debug, Serialize)]
pub(super) struct OverrideResponse { pub outcome: &'static str, pub order: Order }

async fn apply(s: &AppState, id: Uuid, command: Command) -> std::result::Result<Json<OverrideResponse>, ApiError> {
    let outcome = s.engine.command(OrderId::from_uuid(id), command).await.map_err(reject)?;
    respond(s, OrderId::from_uuid(id), outcome).await
}

/// Discards are the operator's business: they answer 409 with the reason.
async fn respond(s: &AppState, id: OrderId, outcome: Outcome) -> std::result::Result<Json<OverrideResponse>, ApiError> {
    let label = match outcome {
        Outcome::Applied(_) => "applied",
        Outcome::Replayed => "replayed",
        Outcome::Ignored => "ignored",
        Outcome::Discarded(reason) => return Err((StatusCode::CONFLICT, reason.to_string())),
    };
    let order = s.engine.order(id).await.map_err(reject)?;
    Ok(Json(OverrideResponse { outcome: label, order }))
}

/// Cash and bank-transfer orders only.
pub(super) async fn confirm_cash(State(s): State<AppState>, Path(id): Path<Uuid>) -> std::result::Result<Json<OverrideResponse>, ApiError> {
    apply(&s, id, Command::ConfirmCash).await
}

/// Marks a processor order paid when the processor never reports back.
pub(super) async fn force_payment(State(s): State<AppState>, Path(id): Path<Uuid>) -> std::result::Result<Json<OverrideResponse>, ApiError> {
    apply(&s, id, Command::ForcePayment).await
}

#[derive(Debug, Deserialize, Validate)]
pub(super) struct ShipRequest {
    #[validate(length(min = 1, max = 100))]
    pub courier: String,
    #[validate(length(max = 100))]
    pub tracking_number: Option<String>,
}

pub(super) async fn ship(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ShipRequest>) -> std::result::Result<Json<OverrideResponse>, ApiError> {
    r.validate().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    apply(&s, id, Command::Ship(Shipment { courier: r.courier, tracking_number: r.tracking_number })).await
}

pub(super) async fn ready_for_pickup(State(s): State<AppState>, Path(id): Path<Uuid>) -> std::result::Result<Json<OverrideResponse>, ApiError> {
    apply(&s, id, Command::ReadyForPickup).await
}

pub(super) async fn deliver(State(s): State<AppState>, Path(id): Path<Uuid>) -> std::result::Result<Json<OverrideResponse>, ApiError> {
    apply(&s, id, Command::Deliver).await
}

pub(super) async fn cancel(State(s): State<AppState>, Path(id): Path<Uuid>) -> std::result::Result<Json<OverrideResponse>, ApiError> {
    apply(&s, id, Command::Cancel).await
}

#[derive(Debug, Deserialize)] pub(super) struct ScanRequest { pub code: String }

pub(super) async fn collection_scan(State(s): State<AppState>, Json(r): Json<ScanRequest>) -> std::result::Result<Json<OverrideResponse>, ApiError> {
    let (order_id, outcome) = s.engine.collection_scan(&r.code).await.map_err(reject)?;
    respond(&s, order_id, outcome).await
}

#[derive(Debug, Deserialize, Validate)]
pub(super) struct WaitlistRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
}

pub(super) async fn join_waitlist(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<WaitlistRequest>) -> std::result::Result<(StatusCode, Json<WaitlistEntry>), ApiError> {
    r.validate().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let product = load_product(&s, ProductId::from_uuid(id)).await.map_err(reject)?;
    let entry = WaitlistEntry::new(product.id, Contact { name: r.name, email: r.email, phone: None });
    bounded(s.ledger_timeout, s.ledger.insert_waitlist_entry(&entry)).await.map_err(|e| reject(e.into()))?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Debug, Deserialize, Validate)]
pub(super) struct RestockRequest {
    #[validate(range(min = 1, max = 100_000))]
    pub quantity: u32,
}
#[derive(Debug, Serialize)] pub(super) struct RestockResponse { pub product_id: ProductId, pub inventory: u32, pub notified: usize }

pub(super) async fn restock(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<RestockRequest>) -> std::result::Result<Json<RestockResponse>, ApiError> {
    r.validate().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let id = ProductId::from_uuid(id);
    let mut product = load_product(&s, id).await.map_err(reject)?;
    product.add_inventory(r.quantity).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    bounded(s.ledger_timeout, s.ledger.add_inventory(id, r.quantity)).await.map_err(|e| reject(e.into()))?;
    let stored = load_product(&s, id).await.map_err(reject)?;

    let mut notified = 0;
    for event in product.take_events() {
        let DomainEvent::Product(ProductEvent::Restocked { product_id, quantity }) = event;
        info!(product_id = %product_id, quantity, inventory = stored.inventory, "product restocked");
        if stored.is_in_stock() {
            notified += s.dispatcher.flush_waitlist(&stored).await.map_err(|e| reject(e.into()))?;
        }
    }
    Ok(Json(RestockResponse { product_id: id, inventory: stored.inventory, notified }))
}

async fn load_product(s: &AppState, id: ProductId) -> Result<Product> {
    bounded(s.ledger_timeout, s.ledger.get_products(&[id])).await?.pop().ok_or(Error::ProductNotFound(id))
}
