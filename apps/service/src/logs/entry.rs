use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::models::CheckDefinition;
use crate::monitoring::types::{CheckState, ProbeOutcome};

/// Audit record appended after every evaluation of a check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub check_id: String,
    pub evaluated_at: DateTime<Utc>,
    pub resulting_state: CheckState,
    pub outcome: ProbeOutcome,
    pub alert_triggered: bool,
    /// The check as it was before this evaluation
    pub check: Value,
}

impl LogEntry {
    pub fn new(
        check: &CheckDefinition,
        outcome: &ProbeOutcome,
        resulting_state: CheckState,
        alert_triggered: bool,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            check_id: check.id.clone(),
            evaluated_at,
            resulting_state,
            outcome: outcome.clone(),
            alert_triggered,
            check: check.to_document(),
        }
    }
}
