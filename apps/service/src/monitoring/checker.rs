use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::redirect::Policy;
use tracing::{debug, warn};

use super::outcome::OutcomeSlot;
use super::types::ProbeOutcome;
use crate::database::models::{CheckDefinition, Method};

/// Issues one bounded probe for a check
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// Probe the check's target. Always completes with exactly one outcome.
    async fn probe(&self, check: &CheckDefinition) -> ProbeOutcome;
}

/// HTTP/HTTPS prober
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .user_agent(concat!("uptick/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

fn wire_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    async fn probe(&self, check: &CheckDefinition) -> ProbeOutcome {
        let deadline = Duration::from_millis(check.timeout_seconds * 1000);
        let (slot, outcome_rx) = OutcomeSlot::new();
        let slot = Arc::new(slot);

        // The client-level timeout bounds the request task itself, so its
        // connection is released even after the deadline timer has won.
        let request = self.client.request(wire_method(check.method), check.url()).timeout(deadline);
        let request_slot = Arc::clone(&slot);
        let check_id = check.id.clone();
        tokio::spawn(async move {
            let outcome = match request.send().await {
                Ok(response) => ProbeOutcome::response(response.status().as_u16()),
                Err(e) if e.is_timeout() => ProbeOutcome::timeout(),
                Err(e) => ProbeOutcome::network(e.to_string()),
            };
            if !request_slot.resolve(outcome) {
                debug!(check_id = %check_id, "Request finished after the probe was already resolved");
            }
        });

        let timer_slot = Arc::clone(&slot);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            timer_slot.resolve(ProbeOutcome::timeout());
        });

        let outcome = match outcome_rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(check_id = %check.id, "Probe sources ended without resolving");
                ProbeOutcome::network("probe ended without an outcome")
            }
        };
        timer.abort();

        debug!(check_id = %check.id, url = %check.url(), %outcome, "Probe resolved");
        outcome
    }
}
