//! Service configuration, read from the environment once at startup.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::dispatch::DeliveryPolicy;
use crate::polling::PollSettings;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    /// In-process ledger when unset.
    pub database_url: Option<String>,
    /// Messages only go to the log when unset.
    pub nats_url: Option<String>,
    pub payment: PaymentConfig,
    pub ledger_timeout: Duration,
    pub poll: PollSettings,
    pub shipping_cost: Decimal,
    pub currency: String,
    pub delivery: DeliveryPolicy,
    pub store_base_url: Option<String>,
    pub accounting_recipient: String,
    /// Bearer token for operator routes; they stay closed when unset.
    pub operator_token: Option<Redacted>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Redacted(pub String);

impl std::fmt::Debug for Redacted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("<redacted>") }
}

#[derive(Clone)]
pub struct PaymentConfig {
    pub api_url: String,
    pub api_key: String,
    pub webhook_secret: String,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub wallet_primary_prefixes: Vec<String>,
    pub wallet_secondary_prefixes: Vec<String>,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("wallet_primary_prefixes", &self.wallet_primary_prefixes)
            .field("wallet_secondary_prefixes", &self.wallet_secondary_prefixes)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests need not touch the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let webhook_secret = get("PAYMENT_WEBHOOK_SECRET").ok_or_else(|| Error::Config("PAYMENT_WEBHOOK_SECRET is required".into()))?;

        Ok(Self {
            port: parse(&get, "PORT", 8083)?,
            database_url: get("DATABASE_URL"),
            nats_url: get("NATS_URL"),
            payment: PaymentConfig {
                api_url: get("PAYMENT_API_URL").unwrap_or_else(|| "http://localhost:9090".to_string()),
                api_key: get("PAYMENT_API_KEY").unwrap_or_default(),
                webhook_secret,
                timeout: Duration::from_millis(parse(&get, "PAYMENT_TIMEOUT_MS", 10_000)?),
                retry_attempts: parse(&get, "PAYMENT_RETRY_ATTEMPTS", 3)?,
                wallet_primary_prefixes: list(get("WALLET_PRIMARY_PREFIXES")),
                wallet_secondary_prefixes: list(get("WALLET_SECONDARY_PREFIXES")),
            },
            ledger_timeout: Duration::from_millis(parse(&get, "LEDGER_TIMEOUT_MS", 5_000)?),
            poll: PollSettings {
                interval: Duration::from_secs(parse(&get, "POLL_INTERVAL_SECS", 5)?),
                max_attempts: parse(&get, "POLL_MAX_ATTEMPTS", 60)?,
            },
            shipping_cost: parse(&get, "SHIPPING_COST", Decimal::new(500, 2))?,
            currency: get("CURRENCY").unwrap_or_else(|| "USD".to_string()).to_uppercase(),
            delivery: parse(&get, "NOTIFICATION_DELIVERY", DeliveryPolicy::AtMostOnce)?,
            store_base_url: get("STORE_BASE_URL"),
            accounting_recipient: get("ACCOUNTING_RECIPIENT").unwrap_or_else(|| "accounting".to_string()),
            operator_token: get("ADMIN_API_TOKEN").map(Redacted),
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e| Error::Config(format!("{}={}: {}", key, raw, e))),
    }
}

fn list(raw: Option<String>) -> Vec<String> {
    raw.map(|r| r.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[("PAYMENT_WEBHOOK_SECRET", "s")]).unwrap();
        assert_eq!(c.port, 8083);
        assert_eq!(c.poll, PollSettings::default());
        assert_eq!(c.shipping_cost, Decimal::new(500, 2));
        assert_eq!(c.delivery, DeliveryPolicy::AtMostOnce);
        assert_eq!(c.payment.timeout, Duration::from_secs(10));
        assert!(c.database_url.is_none());
        assert!(c.operator_token.is_none());
    }

    #[test]
    fn test_overrides_and_lists() {
        let c = config(&[
            ("PAYMENT_WEBHOOK_SECRET", "s"),
            ("POLL_MAX_ATTEMPTS", "10"),
            ("WALLET_PRIMARY_PREFIXES", "099, 098,,"),
            ("NOTIFICATION_DELIVERY", "at-least-once"),
            ("CURRENCY", "ngn"),
        ]).unwrap();
        assert_eq!(c.poll.max_attempts, 10);
        assert_eq!(c.payment.wallet_primary_prefixes, vec!["099", "098"]);
        assert_eq!(c.delivery, DeliveryPolicy::AtLeastOnce);
        assert_eq!(c.currency, "NGN");
    }

    #[test]
    fn test_rejects_missing_secret_and_bad_numbers() {
        assert!(matches!(config(&[]), Err(Error::Config(_))));
        assert!(matches!(config(&[("PAYMENT_WEBHOOK_SECRET", "s"), ("PORT", "http")]), Err(Error::Config(_))));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let c = config(&[("PAYMENT_WEBHOOK_SECRET", "topsecret"), ("PAYMENT_API_KEY", "sk_live"), ("ADMIN_API_TOKEN", " op-token ")]).unwrap();
        assert_eq!(c.operator_token, Some(Redacted("op-token".into())));
        let printed = format!("{:?}", c);
        assert!(!printed.contains("topsecret"));
        assert!(!printed.contains("sk_live"));
        assert!(!printed.contains("op-token"));
    }
}
