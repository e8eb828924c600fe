use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::types::{CheckState, ProbeOutcome};
use crate::database::models::{CHECKS_COLLECTION, CheckDefinition};
use crate::database::{RecordStore, StoreError};
use crate::logs::{CheckLogger, LogEntry};
use crate::notifications::Alerter;

/// Summary of one processed outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub new_state: CheckState,
    pub alert_warranted: bool,
    pub checked_at: DateTime<Utc>,
    /// Whether the updated record reached the store
    pub persisted: bool,
}

/// `Up` iff the probe got a response whose code the check accepts
pub fn next_state(check: &CheckDefinition, outcome: &ProbeOutcome) -> CheckState {
    match outcome.response_code() {
        Some(code) if check.success_codes.contains(&code) => CheckState::Up,
        _ => CheckState::Down,
    }
}

/// A first observation never alerts; afterwards any change of state does.
pub fn alert_warranted(check: &CheckDefinition, new_state: CheckState) -> bool {
    check.has_been_observed() && check.state != new_state
}

/// Applies probe outcomes to checks: log, persist, alert, in that order.
pub struct OutcomeProcessor {
    store: Arc<dyn RecordStore>,
    logger: Arc<CheckLogger>,
    alerter: Arc<Alerter>,
}

impl OutcomeProcessor {
    pub fn new(store: Arc<dyn RecordStore>, logger: Arc<CheckLogger>, alerter: Arc<Alerter>) -> Self {
        Self { store, logger, alerter }
    }

    /// Process one outcome for `check` (the record as it was read before probing).
    ///
    /// The log entry is written first and regardless of whether the store
    /// write succeeds. The owner is only alerted once the new state is stored.
    pub async fn process(&self, check: &CheckDefinition, outcome: ProbeOutcome) -> Evaluation {
        let new_state = next_state(check, &outcome);
        let alert_warranted = alert_warranted(check, new_state);
        let checked_at = Utc::now();

        let entry = LogEntry::new(check, &outcome, new_state, alert_warranted, checked_at);
        if let Err(e) = self.logger.append(&check.id, &entry).await {
            error!(check_id = %check.id, error = %e, "Failed to append evaluation to check log");
        }

        let updated = check.observed(new_state, checked_at);
        let persisted = match self.store.update(CHECKS_COLLECTION, &check.id, &updated.to_document()).await {
            Ok(()) => true,
            Err(e @ StoreError::NotFound { .. }) => {
                warn!(check_id = %check.id, error = %e, "Check was deleted while it was being probed");
                false
            }
            Err(e) => {
                error!(check_id = %check.id, error = %e, "Failed to save check update");
                false
            }
        };

        info!(
            check_id = %check.id,
            url = %check.url(),
            %outcome,
            previous = %check.state,
            state = %new_state,
            alert = alert_warranted,
            "Check evaluated"
        );

        if persisted {
            if alert_warranted {
                self.alerter.alert_status_change(&updated).await;
            } else {
                debug!(check_id = %check.id, "Check outcome has not changed, no alert needed");
            }
        }

        Evaluation { new_state, alert_warranted, checked_at, persisted }
    }
}
