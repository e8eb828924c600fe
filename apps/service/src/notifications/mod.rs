use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::database::models::CheckDefinition;

pub mod twilio;

pub use twilio::TwilioSender;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Provider rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Delivery did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Longest a single alert may take before it is abandoned
pub const DEFAULT_DELIVERY_DEADLINE: Duration = Duration::from_secs(30);

/// Outbound SMS delivery
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), DeliveryError>;
}

/// Sender used when no SMS provider is configured; records the message only.
pub struct LogOnlySender;

#[async_trait]
impl SmsSender for LogOnlySender {
    async fn send(&self, to: &str, body: &str) -> Result<(), DeliveryError> {
        info!(to, body, "SMS provider not configured, alert logged only");
        Ok(())
    }
}

/// Formats status-change alerts and hands them to an `SmsSender`.
///
/// Delivery failures are logged and swallowed; nothing is retried. Every
/// delivery is bounded by a deadline, so a stalled provider cannot hold up
/// the evaluation that raised the alert.
pub struct Alerter {
    sender: Arc<dyn SmsSender>,
    deadline: Duration,
}

impl Alerter {
    pub fn new(sender: Arc<dyn SmsSender>) -> Self {
        Self { sender, deadline: DEFAULT_DELIVERY_DEADLINE }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Message for a check that has just moved into `check.state`
    pub fn status_change_message(check: &CheckDefinition) -> String {
        format!(
            "Alert: Your check for {} {} is currently {}",
            check.method.as_wire(),
            check.url(),
            check.state
        )
    }

    pub async fn notify(&self, owner_id: &str, message: &str) -> Result<(), DeliveryError> {
        tokio::time::timeout(self.deadline, self.sender.send(owner_id, message))
            .await
            .map_err(|_| DeliveryError::TimedOut(self.deadline))?
    }

    /// Tell the owner about the check's new state. Returns whether it was delivered.
    pub async fn alert_status_change(&self, check: &CheckDefinition) -> bool {
        let message = Self::status_change_message(check);
        match self.notify(&check.owner_id, &message).await {
            Ok(()) => {
                info!(check_id = %check.id, state = %check.state, "Owner alerted to status change");
                true
            }
            Err(e) => {
                warn!(check_id = %check.id, error = %e, "Could not alert owner to status change");
                false
            }
        }
    }
}
