//! HTTP transport to the payment processor

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use super::{AdapterError, CreatedPayment, PaymentRequest, ProcessorClient};
use crate::domain::value_objects::PollHandle;

/// Explicitly constructed processor client; one per process, shared through the adapter.
pub struct HttpProcessor { http: reqwest::Client, base_url: String, api_key: String, timeout: Duration }

#[derive(Deserialize)]
struct StatusBody { status: String }

impl HttpProcessor {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, AdapterError> {
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(|e| AdapterError::Network(e.to_string()))?;
        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_string(), api_key: api_key.into(), timeout })
    }

    async fn read<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T, AdapterError> {
        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS { return Err(AdapterError::Unavailable(status.as_u16())); }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AdapterError::Rejected(format!("HTTP {}: {}", status.as_u16(), body)));
        }
        resp.json::<T>().await.map_err(|e| AdapterError::Malformed(e.to_string()))
    }

    fn transport(&self, e: reqwest::Error) -> AdapterError {
        if e.is_timeout() { AdapterError::Timeout(self.timeout) } else { AdapterError::Network(e.to_string()) }
    }
}

#[async_trait]
impl ProcessorClient for HttpProcessor {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<CreatedPayment, AdapterError> {
        let resp = self.http.post(format!("{}/v1/payments", self.base_url)).bearer_auth(&self.api_key).json(request).send().await.map_err(|e| self.transport(e))?;
        Self::read(resp).await
    }

    async fn poll_status(&self, handle: &PollHandle) -> Result<String, AdapterError> {
        let resp = self.http.get(format!("{}/v1/payments/{}", self.base_url, handle.0)).bearer_auth(&self.api_key).send().await.map_err(|e| self.transport(e))?;
        Ok(Self::read::<StatusBody>(resp).await?.status)
    }
}
