//! Completion/failure notification seam.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::retry::RetryPolicy;

/// Notification delivery failure.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct NotifyError {
  pub message: String,
}

impl NotifyError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// Webhook-style notification capability.
///
/// Implementations POST the payload to the url and return the response
/// status code. Delivery retries are handled by the coordinator, not
/// the implementation.
#[async_trait]
pub trait NotificationSender: Send + Sync {
  async fn deliver(&self, url: &str, payload: &Value) -> Result<u16, NotifyError>;
}

/// Sender that drops every notification. Useful when no webhook
/// endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotificationSender;

#[async_trait]
impl NotificationSender for NullNotificationSender {
  async fn deliver(&self, _url: &str, _payload: &Value) -> Result<u16, NotifyError> {
    Ok(204)
  }
}

/// Deliver a payload under its own bounded retry policy.
///
/// Failures are logged, never propagated: a webhook that cannot be
/// delivered must not change the run's outcome.
pub(crate) async fn deliver_with_retry(
  sender: &dyn NotificationSender,
  policy: RetryPolicy,
  url: &str,
  payload: &Value,
) {
  for attempt in 0..policy.max_attempts {
    match sender.deliver(url, payload).await {
      Ok(status) => {
        tracing::debug!(url = %url, status, "webhook_delivered");
        return;
      }
      Err(e) if attempt + 1 < policy.max_attempts => {
        warn!(url = %url, attempt, error = %e, "webhook_delivery_retry");
        tokio::time::sleep(policy.delay_for(attempt)).await;
      }
      Err(e) => {
        error!(url = %url, attempts = policy.max_attempts, error = %e, "webhook_delivery_failed");
      }
    }
  }
}
