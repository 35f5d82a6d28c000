//! Payment adapter: the only place that speaks the processor's vocabulary.
//!
//! Everything downstream sees a [`RawStatus`]. Transport failures surface as
//! [`AdapterError`] and are retried; a processor saying `Failed` is a business
//! outcome and is returned as data.

mod http;
mod retry;
mod signature;
mod wallet;

pub use http::HttpProcessor;
pub use retry::RetryPolicy;
pub use signature::{WebhookVerifier, SIGNATURE_HEADER};
pub use wallet::WalletRouter;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::aggregates::{Order, PaymentMethod};
use crate::domain::value_objects::{OrderId, PollHandle, ProcessorReference};

/// Canonical payment outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawStatus { Paid, AwaitingCapture, Cancelled, Failed, Unknown }

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("network error: {0}")]
    Network(String),
    #[error("processor call exceeded {0:?}")]
    Timeout(Duration),
    #[error("processor unavailable (HTTP {0})")]
    Unavailable(u16),
    #[error("processor rejected request: {0}")]
    Rejected(String),
    #[error("malformed processor response: {0}")]
    Malformed(String),
    #[error("no wallet provider serves {0}")]
    NoWalletRoute(String),
}

impl AdapterError {
    /// Transport problems are worth another try; refusals are not.
    pub fn is_retryable(&self) -> bool { matches!(self, Self::Network(_) | Self::Timeout(_) | Self::Unavailable(_)) }
}

/// Processor channel an order is paid through. Each has its own status vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel { Card, WalletPrimary, WalletSecondary }

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Card => "card", Self::WalletPrimary => "wallet_primary", Self::WalletSecondary => "wallet_secondary" }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s { "card" => Some(Self::Card), "wallet_primary" => Some(Self::WalletPrimary), "wallet_secondary" => Some(Self::WalletSecondary), _ => None }
    }

    pub fn normalize(&self, raw: &str) -> RawStatus {
        let raw = raw.trim().to_ascii_lowercase();
        match self {
            Self::Card => match raw.as_str() {
                "succeeded" | "captured" => RawStatus::Paid,
                "authorized" | "requires_capture" => RawStatus::AwaitingCapture,
                "canceled" | "cancelled" | "voided" => RawStatus::Cancelled,
                "failed" | "declined" => RawStatus::Failed,
                _ => RawStatus::Unknown,
            },
            Self::WalletPrimary => match raw.as_str() {
                "successful" => RawStatus::Paid,
                "pending_capture" => RawStatus::AwaitingCapture,
                "cancelled" => RawStatus::Cancelled,
                "failed" | "rejected" => RawStatus::Failed,
                _ => RawStatus::Unknown,
            },
            Self::WalletSecondary => match raw.as_str() {
                "ts" => RawStatus::Paid,
                "ta" => RawStatus::AwaitingCapture,
                "tc" => RawStatus::Cancelled,
                "tf" => RawStatus::Failed,
                _ => RawStatus::Unknown,
            },
        }
    }
}

/// What the processor transport is asked to create
#[derive(Clone, Debug, Serialize)]
pub struct PaymentRequest {
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub channel: Channel,
    pub msisdn: Option<String>,
    pub return_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreatedPayment {
    pub handle: String,
    pub instructions: Option<String>,
    pub redirect_url: Option<String>,
}

/// Raw transport to the processor, injected into the adapter
#[async_trait]
pub trait ProcessorClient: Send + Sync {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<CreatedPayment, AdapterError>;
    /// Returns the processor's own status word for the handle.
    async fn poll_status(&self, handle: &PollHandle) -> Result<String, AdapterError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Initiation {
    pub poll_handle: PollHandle,
    pub channel: Channel,
    pub instructions: Option<String>,
    pub redirect_target: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callback {
    Verified { order_id: OrderId, status: RawStatus, processor_reference: Option<ProcessorReference> },
    /// Signature missing or wrong. Never reaches the engine.
    Unverified,
    /// Authentic but unusable (no order reference).
    Malformed(String),
}

pub struct PaymentAdapter {
    client: Arc<dyn ProcessorClient>,
    router: WalletRouter,
    verifier: WebhookVerifier,
    retry: RetryPolicy,
    call_timeout: Duration,
    return_url: Option<String>,
}

impl PaymentAdapter {
    pub fn new(client: Arc<dyn ProcessorClient>, router: WalletRouter, verifier: WebhookVerifier, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self { client, router, verifier, retry, call_timeout, return_url: None }
    }

    pub fn with_return_url(mut self, url: impl Into<String>) -> Self { self.return_url = Some(url.into()); self }

    pub fn channel_for(&self, order: &Order) -> Result<Channel, AdapterError> {
        match order.payment_method {
            PaymentMethod::Card => Ok(Channel::Card),
            PaymentMethod::MobileWallet => {
                let phone = order.contact.phone.as_deref().unwrap_or_default();
                self.router.route(phone).ok_or_else(|| AdapterError::NoWalletRoute(phone.to_string()))
            }
            PaymentMethod::CashOnDelivery => Err(AdapterError::Rejected("cash orders are not paid through the processor".into())),
        }
    }

    /// Creates the processor-side payment, retrying transport failures with backoff.
    pub async fn initiate(&self, order: &Order) -> Result<Initiation, AdapterError> {
        let channel = self.channel_for(order)?;
        let request = PaymentRequest {
            reference: order.id.to_string(),
            amount: order.total.amount(),
            currency: order.total.currency().to_string(),
            channel,
            msisdn: if channel == Channel::Card { None } else { order.contact.phone.clone() },
            return_url: self.return_url.as_ref().map(|base| format!("{}/orders/{}", base.trim_end_matches('/'), order.id)),
        };
        let created = self.retry.run("create_payment", || self.timed(self.client.create_payment(&request))).await?;
        let (instructions, redirect_target) = match channel {
            Channel::Card => {
                let redirect = created.redirect_url.ok_or_else(|| AdapterError::Malformed("card payment without redirect url".into()))?;
                (None, Some(redirect))
            }
            Channel::WalletPrimary | Channel::WalletSecondary => {
                let phone = order.contact.phone.clone().unwrap_or_default();
                let text = created.instructions.unwrap_or_else(|| format!("Approve the payment request of {} sent to {} on your phone.", order.total, phone));
                (Some(text), None)
            }
        };
        debug!(order_id = %order.id, channel = channel.as_str(), "payment initiated");
        Ok(Initiation { poll_handle: PollHandle(created.handle), channel, instructions, redirect_target })
    }

    /// One poll; the poll loop itself is the retry.
    pub async fn poll(&self, handle: &PollHandle, channel: Channel) -> Result<RawStatus, AdapterError> {
        let raw = self.timed(self.client.poll_status(handle)).await?;
        let status = channel.normalize(&raw);
        if status == RawStatus::Unknown { debug!(handle = %handle.0, raw = %raw, "unrecognised processor status"); }
        Ok(status)
    }

    /// Authenticates a form-encoded callback and normalizes it.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Callback {
        let Some(signature) = signature else { return Callback::Unverified };
        if !self.verifier.verify(body, signature) { return Callback::Unverified; }

        let mut reference = None;
        let mut transaction = None;
        let mut raw_status = None;
        let mut channel = Channel::Card;
        for (k, v) in url::form_urlencoded::parse(body) {
            match k.as_ref() {
                "reference" => reference = Some(v.into_owned()),
                "transaction_id" => transaction = Some(v.into_owned()),
                "status" => raw_status = Some(v.into_owned()),
                "channel" => match Channel::parse(&v) {
                    Some(c) => channel = c,
                    None => warn!(channel = %v, "callback names an unknown channel"),
                },
                _ => {}
            }
        }
        let Some(order_id) = reference.and_then(|r| r.parse::<OrderId>().ok()) else {
            return Callback::Malformed("missing or invalid reference".into());
        };
        let status = raw_status.map(|s| channel.normalize(&s)).unwrap_or(RawStatus::Unknown);
        Callback::Verified { order_id, status, processor_reference: transaction.filter(|t| !t.is_empty()).map(ProcessorReference) }
    }

    async fn timed<T, F>(&self, call: F) -> Result<T, AdapterError>
    where
        F: std::future::Future<Output = Result<T, AdapterError>>,
    {
        tokio::time::timeout(self.call_timeout, call).await.map_err(|_| AdapterError::Timeout(self.call_timeout))?
    }
}
