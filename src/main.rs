//! Storefront payment reconciliation service

use anyhow::Result;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_reconcile::checkout::Checkout;
use storefront_reconcile::config::AppConfig;
use storefront_reconcile::dispatch::{Dispatcher, LogMessenger, Messenger, NatsMessenger};
use storefront_reconcile::domain::value_objects::Money;
use storefront_reconcile::ingress::{build_router, AppState, OperatorToken};
use storefront_reconcile::ledger::{MemoryLedger, OrderLedger, PgLedger};
use storefront_reconcile::payment::{HttpProcessor, PaymentAdapter, RetryPolicy, WalletRouter, WebhookVerifier};
use storefront_reconcile::polling::Poller;
use storefront_reconcile::reconciliation::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = AppConfig::from_env()?;

    let ledger: Arc<dyn OrderLedger> = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(10).acquire_timeout(config.ledger_timeout).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            Arc::new(PgLedger::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders live in memory only");
            Arc::new(MemoryLedger::new())
        }
    };
    let messenger: Arc<dyn Messenger> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsMessenger::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, messages go to the log");
                Arc::new(LogMessenger)
            }
        },
        None => Arc::new(LogMessenger),
    };

    let p = &config.payment;
    let processor = Arc::new(HttpProcessor::new(p.api_url.clone(), p.api_key.clone(), p.timeout)?);
    let mut adapter = PaymentAdapter::new(
        processor,
        WalletRouter::new(p.wallet_primary_prefixes.clone(), p.wallet_secondary_prefixes.clone()),
        WebhookVerifier::new(&p.webhook_secret),
        RetryPolicy::new(p.retry_attempts, std::time::Duration::from_millis(200)),
        p.timeout,
    );
    if let Some(base) = &config.store_base_url { adapter = adapter.with_return_url(base.clone()); }
    let adapter = Arc::new(adapter);

    let dispatcher = Arc::new(Dispatcher::new(ledger.clone(), messenger, config.delivery, config.ledger_timeout).with_accounting_recipient(config.accounting_recipient.clone()));
    let engine = Arc::new(Engine::new(ledger.clone(), dispatcher.clone(), config.ledger_timeout));
    let shipping = Money::new(config.shipping_cost.max(Decimal::ZERO), &config.currency);
    let checkout = Arc::new(Checkout::new(ledger.clone(), adapter.clone(), config.ledger_timeout, shipping));
    let poller = Arc::new(Poller::new(engine.clone(), adapter.clone(), config.poll));

    let operator_token = config.operator_token.as_ref().map(|t| OperatorToken::new(&t.0));
    if operator_token.is_none() {
        tracing::warn!("ADMIN_API_TOKEN not set, operator routes are closed");
    }
    let state = AppState { ledger, engine, adapter, checkout, poller, dispatcher, ledger_timeout: config.ledger_timeout, operator_token };
    let app = build_router(state);

    tracing::info!(delivery = ?config.delivery, "storefront-reconcile listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
