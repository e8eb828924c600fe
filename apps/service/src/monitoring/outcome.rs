use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use super::types::ProbeOutcome;

/// Single-resolution cell that completion sources of one probe race into.
///
/// The first call to `resolve` delivers its outcome to the receiver; every
/// later call is observed and discarded.
pub struct OutcomeSlot {
    sender: Mutex<Option<oneshot::Sender<ProbeOutcome>>>,
}

impl OutcomeSlot {
    pub fn new() -> (Self, oneshot::Receiver<ProbeOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { sender: Mutex::new(Some(tx)) }, rx)
    }

    /// Offer an outcome. Returns `true` only for the call that won.
    pub fn resolve(&self, outcome: ProbeOutcome) -> bool {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        match sender {
            Some(tx) => {
                // A dropped receiver still counts as resolved.
                let _ = tx.send(outcome);
                true
            }
            None => {
                debug!(%outcome, "Discarding probe event that arrived after resolution");
                false
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}
