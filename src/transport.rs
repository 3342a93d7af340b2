//! Notification transport: the best-effort channel that wakes a device.
//!
//! Acceptance by the transport says nothing about execution. Delivery may be late,
//! reordered, duplicated or silently dropped; the dispatcher copes with all of it.

use crate::commands::CommandEnvelope;
use crate::errors::TetherError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The push service refused this address or payload
    #[error("rejected by push service: {0}")]
    Rejected(String),

    #[error("push service unavailable: {0}")]
    Unavailable(String),

    #[error("push service did not answer within {0:?}")]
    TimedOut(Duration),
}

impl From<TransportError> for TetherError {
    fn from(err: TransportError) -> Self {
        TetherError::TransportFailure(err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Provider message id, when the service returns one
    pub message_id: Option<String>,
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn deliver(
        &self,
        push_address: &str,
        envelope: &CommandEnvelope,
    ) -> Result<DeliveryReceipt, TransportError>;
}

/// Posts `{"to": <push address>, "data": <envelope>}` to an HTTP push gateway.
pub struct HttpPushTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpPushTransport {
    pub fn new(endpoint: String, api_key: Option<String>, timeout: Duration) -> Result<Self, TetherError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TetherError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl NotificationTransport for HttpPushTransport {
    async fn deliver(
        &self,
        push_address: &str,
        envelope: &CommandEnvelope,
    ) -> Result<DeliveryReceipt, TransportError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "to": push_address, "data": envelope }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::TimedOut(self.timeout)
            } else {
                TransportError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(TransportError::Unavailable(status.to_string()));
        }

        // Gateways differ in what they return; the id is informational only
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message_id = body
            .get("message_id")
            .or_else(|| body.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(DeliveryReceipt { message_id })
    }
}

/// Accepts everything and only logs it. Used when no push gateway is configured.
#[derive(Debug, Default)]
pub struct LoggingTransport;

#[async_trait]
impl NotificationTransport for LoggingTransport {
    async fn deliver(
        &self,
        push_address: &str,
        envelope: &CommandEnvelope,
    ) -> Result<DeliveryReceipt, TransportError> {
        tracing::info!(
            push_address,
            command_id = %envelope.command_id,
            command_type = envelope.kind.command_type(),
            "Push delivery (logging transport)"
        );
        Ok(DeliveryReceipt::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandKind;

    #[tokio::test]
    async fn test_logging_transport_accepts() {
        let envelope = CommandEnvelope {
            command_id: "cmd-1".to_string(),
            kind: CommandKind::Ping {},
        };
        let receipt = LoggingTransport
            .deliver("token-1", &envelope)
            .await
            .expect("logging transport never fails");
        assert!(receipt.message_id.is_none());
    }

    #[test]
    fn test_transport_error_maps_to_transport_failure() {
        let err: TetherError = TransportError::Rejected("unregistered".to_string()).into();
        assert_eq!(err.kind(), "transport_failure");
        assert!(err.to_string().contains("unregistered"));
    }
}
