//! Outbound messaging. Delivery and retries belong to the transport, not to us.

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("message transport error: {0}")]
    Transport(String),
    #[error("message encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, template: &str, recipient: &str, vars: &Value) -> Result<(), MessageError>;
}

/// Publishes message requests to NATS on `<prefix>.<template>` for the mailer to pick up.
pub struct NatsMessenger { client: async_nats::Client, prefix: String }

impl NatsMessenger {
    pub fn new(client: async_nats::Client) -> Self { Self { client, prefix: "notifications".to_string() } }
}

#[async_trait]
impl Messenger for NatsMessenger {
    async fn send_message(&self, template: &str, recipient: &str, vars: &Value) -> Result<(), MessageError> {
        let body = serde_json::to_vec(&json!({ "template": template, "recipient": recipient, "vars": vars }))?;
        self.client.publish(format!("{}.{}", self.prefix, template), body.into()).await.map_err(|e| MessageError::Transport(e.to_string()))
    }
}

/// Used when no broker is configured: the message only lands in the log.
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn send_message(&self, template: &str, recipient: &str, vars: &Value) -> Result<(), MessageError> {
        info!(template, recipient, vars = %vars, "message (log only)");
        Ok(())
    }
}
