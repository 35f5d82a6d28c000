//! HTTP ingress: every way an observation or command reaches the engine.

mod admin;
mod auth;
mod orders;
mod webhooks;

pub use auth::OperatorToken;

use axum::{http::StatusCode, middleware, routing::{get, post}, Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::checkout::Checkout;
use crate::dispatch::Dispatcher;
use crate::ledger::{LedgerError, OrderLedger};
use crate::payment::PaymentAdapter;
use crate::polling::Poller;
use crate::reconciliation::Engine;
use crate::Error;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn OrderLedger>,
    pub engine: Arc<Engine>,
    pub adapter: Arc<PaymentAdapter>,
    pub checkout: Arc<Checkout>,
    pub poller: Arc<Poller>,
    pub dispatcher: Arc<Dispatcher>,
    pub ledger_timeout: Duration,
    /// Operator routes are closed when unset.
    pub operator_token: Option<OperatorToken>,
}

pub fn build_router(state: AppState) -> Router {
    let operator = Router::new()
        .route("/api/v1/orders/:id", get(orders::get_order))
        .route("/api/v1/admin/orders/:id/confirm-cash", post(admin::confirm_cash))
        .route("/api/v1/admin/orders/:id/force-paid", post(admin::force_payment))
        .route("/api/v1/admin/orders/:id/ship", post(admin::ship))
        .route("/api/v1/admin/orders/:id/ready-for-pickup", post(admin::ready_for_pickup))
        .route("/api/v1/admin/orders/:id/deliver", post(admin::deliver))
        .route("/api/v1/admin/orders/:id/cancel", post(admin::cancel))
        .route("/api/v1/admin/collection-scan", post(admin::collection_scan))
        .route("/api/v1/admin/products/:id/restock", post(admin::restock))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_operator));

    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront-reconcile"})) }))
        .route("/api/v1/checkout", post(orders::checkout))
        .route("/api/v1/orders/:id/payment/retry", post(orders::retry_payment))
        .route("/api/v1/orders/:id/payment-status", get(orders::payment_status))
        .route("/api/v1/webhooks/payments", post(webhooks::payment_callback))
        .route("/api/v1/products/:id/waitlist", post(admin::join_waitlist))
        .merge(operator)
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}

pub(crate) type ApiError = (StatusCode, String);

pub(crate) fn reject(e: Error) -> ApiError {
    let status = match &e {
        Error::OrderNotFound(_) | Error::ProductNotFound(_) => StatusCode::NOT_FOUND,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotAwaitingPayment(_) => StatusCode::CONFLICT,
        Error::Adapter(_) => StatusCode::BAD_GATEWAY,
        Error::Ledger(LedgerError::Timeout(_)) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Ledger(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() { error!(error = %e, "request failed"); }
    (status, e.to_string())
}
