/// Monitoring engine module - evaluates checks and keeps their state
///
/// This module is responsible for:
/// - Validating raw check records before they are probed
/// - Probing endpoints with a hard per-check deadline
/// - Turning probe outcomes into up/down state, log entries and alerts
/// - Scheduling the probe and log-rotation cycles
pub mod checker;
pub mod outcome;
pub mod processor;
pub mod scheduler;
pub mod types;
pub mod validation;

pub use checker::{HttpProber, Prober};
pub use processor::{Evaluation, OutcomeProcessor};
pub use scheduler::{
    MonitoringScheduler, ProbeCycleReport, RotationReport, SchedulerHandles, SchedulerSettings,
};
pub use types::{CheckState, ProbeOutcome};
pub use validation::{ValidationFailure, validate_check};
