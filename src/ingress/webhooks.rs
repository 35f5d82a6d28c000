//! Processor callbacks.
//!
//! The processor retries anything that is not a 2xx, so only a store failure
//! answers 5xx. Discards, replays and unknown orders are acknowledged.

use axum::{body::Bytes, extract::State, http::{HeaderMap, StatusCode}};
use tracing::{info, warn};

use super::{reject, ApiError, AppState};
use crate::domain::events::Source;
use crate::payment::{Callback, SIGNATURE_HEADER};
use crate::Error;

pub(super) async fn payment_callback(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<StatusCode, ApiError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    match s.adapter.verify(&body, signature) {
        Callback::Unverified => {
            warn!(signed = signature.is_some(), bytes = body.len(), "payment callback failed signature check");
            Err((StatusCode::UNAUTHORIZED, "invalid signature".to_string()))
        }
        Callback::Malformed(reason) => {
            warn!(reason = %reason, "authentic payment callback could not be used");
            Ok(StatusCode::OK)
        }
        Callback::Verified { order_id, status, processor_reference } => {
            match s.engine.observe(order_id, status, Source::Webhook, processor_reference).await {
                Ok(outcome) => {
                    info!(order_id = %order_id, status = ?status, outcome = ?outcome, "payment callback processed");
                    Ok(StatusCode::OK)
                }
                Err(Error::OrderNotFound(id)) => {
                    warn!(order_id = %id, "payment callback for unknown order");
                    Ok(StatusCode::OK)
                }
                Err(e) => Err(reject(e)),
            }
        }
    }
}
