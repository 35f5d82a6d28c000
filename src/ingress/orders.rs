//! Customer-facing order routes.

use axum::{extract::{Path, Query, State}, http::StatusCode, Json};
use serde::Deserialize;
use uuid::Uuid;

use super::{reject, ApiError, AppState};
use crate::checkout::{CheckoutReceipt, CheckoutRequest};
use crate::domain::aggregates::Order;
use crate::domain::value_objects::OrderId;
use crate::payment::Initiation;
use crate::polling::PaymentStatusView;

pub(super) async fn checkout(State(s): State<AppState>, Json(r): Json<CheckoutRequest>) -> Result<(StatusCode, Json<CheckoutReceipt>), ApiError> {
    let receipt = s.checkout.place(r).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Operator view: the full internal status.
pub(super) async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Order>, ApiError> {
    s.engine.order(OrderId::from_uuid(id)).await.map(Json).map_err(reject)
}

pub(super) async fn retry_payment(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Initiation>, ApiError> {
    s.checkout.retry_payment(OrderId::from_uuid(id)).await.map(Json).map_err(reject)
}

/// `attempt` is the client's own count, kept for logs only.
#[derive(Debug, Deserialize)] pub(super) struct StatusParams { pub attempt: Option<u32> }

pub(super) async fn payment_status(State(s): State<AppState>, Path(id): Path<Uuid>, Query(p): Query<StatusParams>) -> Result<Json<PaymentStatusView>, ApiError> {
    s.poller.check(OrderId::from_uuid(id), p.attempt).await.map(Json).map_err(reject)
}
