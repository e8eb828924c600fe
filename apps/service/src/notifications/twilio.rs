use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{DeliveryError, SmsSender};
use crate::config::TwilioConfig;
use crate::database::models::OWNER_ID_LEN;

/// Longest body the Messages API accepts
const MAX_BODY_CHARS: usize = 1600;

/// Sends SMS through the Twilio Messages API.
pub struct TwilioSender {
    client: Client,
    config: TwilioConfig,
}

impl TwilioSender {
    pub fn new(config: TwilioConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl SmsSender for TwilioSender {
    async fn send(&self, to: &str, body: &str) -> Result<(), DeliveryError> {
        let to = to.trim();
        if to.chars().count() != OWNER_ID_LEN {
            return Err(DeliveryError::InvalidRecipient(format!(
                "expected {OWNER_ID_LEN} characters, got '{to}'"
            )));
        }
        let body = body.trim();
        let body_len = body.chars().count();
        if body_len == 0 || body_len > MAX_BODY_CHARS {
            return Err(DeliveryError::InvalidMessage(format!(
                "body must be 1..={MAX_BODY_CHARS} characters, got {body_len}"
            )));
        }

        let recipient = format!("+1{to}");
        let form = [
            ("From", self.config.from_phone.as_str()),
            ("To", recipient.as_str()),
            ("Body", body),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(DeliveryError::Rejected { status: status.as_u16(), body: error_body });
        }

        Ok(())
    }
}
