//! Poll ingress.
//!
//! Each status request polls the processor once and feeds the answer to the
//! engine. The ledger counts those polls; an order fails only once the count
//! has reached the limit and the polling window (`interval` times the limit,
//! less one interval) has elapsed since payment was initiated. The client's
//! own attempt number is never trusted. Dropping a [`Poller::run`] future
//! abandons polling safely.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dispatch::RETRY_GUIDANCE;
use crate::domain::aggregates::{CustomerStatus, Order, OrderStatus};
use crate::domain::events::Source;
use crate::domain::value_objects::OrderId;
use crate::payment::{PaymentAdapter, RawStatus};
use crate::reconciliation::Engine;
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self { Self { interval: Duration::from_secs(5), max_attempts: 60 } }
}

impl PollSettings {
    /// How long polling must have run before the last attempt may give up.
    pub fn window(&self) -> Duration { self.interval * self.max_attempts.saturating_sub(1) }
}

/// Wall clock advanced by tokio's timer, so paused-time tests move it too.
#[derive(Clone, Copy, Debug)]
struct Clock { wall: DateTime<Utc>, at: Instant }

impl Clock {
    fn start() -> Self { Self { wall: Utc::now(), at: Instant::now() } }

    fn since(&self, then: DateTime<Utc>) -> Duration {
        let now = self.wall + chrono::Duration::from_std(self.at.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        (now - then).to_std().unwrap_or_default()
    }
}

/// What the customer sees
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentStatusView {
    pub order_id: OrderId,
    pub status: CustomerStatus,
    pub attempt: u32,
    pub retry_after_secs: Option<u64>,
    pub retry_guidance: Option<&'static str>,
}

pub struct Poller {
    engine: Arc<Engine>,
    adapter: Arc<PaymentAdapter>,
    settings: PollSettings,
    clock: Clock,
}

impl Poller {
    pub fn new(engine: Arc<Engine>, adapter: Arc<PaymentAdapter>, settings: PollSettings) -> Self {
        Self { engine, adapter, settings, clock: Clock::start() }
    }

    /// `client_attempt` is only logged; exhaustion is decided from the ledger's count.
    pub async fn check(&self, order_id: OrderId, client_attempt: Option<u32>) -> Result<PaymentStatusView> {
        let mut order = self.engine.order(order_id).await?;
        if order.status == OrderStatus::Pending {
            let counted = self.engine.record_poll(order_id).await?;
            debug!(order_id = %order_id, ?client_attempt, ?counted, "payment status poll");
            let raw = self.poll_once(&order).await;
            self.engine.observe(order_id, raw, Source::Poll, None).await?;
            order = self.engine.order(order_id).await?;

            if order.status == OrderStatus::Pending && self.exhausted(&order) {
                info!(order_id = %order_id, attempts = order.poll_attempts, "polling exhausted");
                self.engine.expire(order_id).await?;
                order = self.engine.order(order_id).await?;
            }
        }
        Ok(self.view(&order))
    }

    fn exhausted(&self, order: &Order) -> bool {
        let started = order.polling_started_at.unwrap_or(order.created_at);
        order.poll_attempts >= self.settings.max_attempts && self.clock.since(started) >= self.settings.window()
    }

    /// Drives polling server-side until a terminal answer or exhaustion.
    pub async fn run(&self, order_id: OrderId) -> Result<PaymentStatusView> {
        let mut attempt = 1;
        loop {
            let view = self.check(order_id, Some(attempt)).await?;
            if view.status != CustomerStatus::Pending || attempt >= self.settings.max_attempts {
                return Ok(view);
            }
            tokio::time::sleep(self.settings.interval).await;
            attempt += 1;
        }
    }

    /// Adapter failures count as no answer; the next poll is the retry.
    async fn poll_once(&self, order: &Order) -> RawStatus {
        let Some(handle) = &order.poll_handle else {
            debug!(order_id = %order.id, "no poll handle yet");
            return RawStatus::Unknown;
        };
        let channel = match self.adapter.channel_for(order) {
            Ok(c) => c,
            Err(e) => { warn!(order_id = %order.id, error = %e, "cannot resolve payment channel"); return RawStatus::Unknown; }
        };
        match self.adapter.poll(handle, channel).await {
            Ok(raw) => raw,
            Err(e) => { warn!(order_id = %order.id, error = %e, retryable = e.is_retryable(), "poll failed"); RawStatus::Unknown }
        }
    }

    fn view(&self, order: &Order) -> PaymentStatusView {
        let status = order.customer_status();
        PaymentStatusView {
            order_id: order.id,
            status,
            attempt: order.poll_attempts,
            retry_after_secs: (status == CustomerStatus::Pending).then(|| self.settings.interval.as_secs()),
            retry_guidance: (status == CustomerStatus::Failed).then_some(RETRY_GUIDANCE),
        }
    }
}
