use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use super::checker::Prober;
use super::processor::{Evaluation, OutcomeProcessor};
use super::validation::validate_check;
use crate::config::WorkersConfig;
use crate::database::models::CHECKS_COLLECTION;
use crate::database::{RecordStore, StoreError};
use crate::logs::CheckLogger;

/// Timing and admission settings for the two cycles
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub probe_interval: Duration,
    pub rotation_interval: Duration,
    /// Upper bound on in-flight probes; `None` leaves a cycle unbounded
    pub max_concurrent_probes: Option<usize>,
}

impl From<&WorkersConfig> for SchedulerSettings {
    fn from(config: &WorkersConfig) -> Self {
        Self {
            probe_interval: Duration::from_secs(config.probe_interval_seconds),
            rotation_interval: Duration::from_secs(config.rotation_interval_seconds),
            max_concurrent_probes: config.max_concurrent_probes,
        }
    }
}

/// What happened to each check enumerated by one probe cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeCycleReport {
    pub enumerated: usize,
    pub evaluated: usize,
    /// Deleted between enumeration and read
    pub vanished: usize,
    pub unreadable: usize,
    pub invalid: usize,
    /// Skipped because the previous cycle's probe had not finished
    pub in_flight: usize,
    pub alerts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub rotated: usize,
    pub empty: usize,
    pub failed: usize,
}

enum Disposition {
    Evaluated(Evaluation),
    Vanished,
    Unreadable,
    Invalid,
    InFlight,
}

/// Claim on a check's record key for the duration of one evaluation
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    check_id: String,
}

impl InFlight {
    fn claim(set: &Arc<Mutex<HashSet<String>>>, check_id: &str) -> Option<Self> {
        let newly_claimed =
            set.lock().unwrap_or_else(PoisonError::into_inner).insert(check_id.to_string());
        newly_claimed.then(|| Self { set: Arc::clone(set), check_id: check_id.to_string() })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.check_id);
    }
}

/// Handles of the two periodic loops
pub struct SchedulerHandles {
    pub probe: JoinHandle<()>,
    pub rotation: JoinHandle<()>,
}

impl SchedulerHandles {
    pub fn shutdown(self) {
        self.probe.abort();
        self.rotation.abort();
    }
}

/// Monitoring scheduler - owns the probe cycle and the log-rotation cycle.
///
/// The work set is re-read from the record store on every probe cycle; the
/// scheduler itself keeps no queue.
pub struct MonitoringScheduler {
    store: Arc<dyn RecordStore>,
    prober: Arc<dyn Prober>,
    processor: Arc<OutcomeProcessor>,
    logger: Arc<CheckLogger>,
    settings: SchedulerSettings,
    in_flight: Arc<Mutex<HashSet<String>>>,
    admission: Option<Arc<Semaphore>>,
}

impl MonitoringScheduler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        prober: Arc<dyn Prober>,
        processor: Arc<OutcomeProcessor>,
        logger: Arc<CheckLogger>,
        settings: SchedulerSettings,
    ) -> Self {
        let admission = settings.max_concurrent_probes.map(|limit| Arc::new(Semaphore::new(limit)));
        Self {
            store,
            prober,
            processor,
            logger,
            settings,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            admission,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Start both loops. Each runs one pass immediately, then on its interval.
    pub fn start(self: &Arc<Self>) -> SchedulerHandles {
        let scheduler = Arc::clone(self);
        let probe = tokio::spawn(async move {
            let mut timer = interval(scheduler.settings.probe_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Owned by this task, so aborting the loop also stops running cycles.
            let mut cycles = JoinSet::new();
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        // A slow cycle must not hold back the next tick.
                        let cycle = Arc::clone(&scheduler);
                        cycles.spawn(async move {
                            cycle.run_probe_cycle().await;
                        });
                    }
                    Some(finished) = cycles.join_next(), if !cycles.is_empty() => {
                        if let Err(e) = finished {
                            error!(error = %e, "Probe cycle task failed");
                        }
                    }
                }
            }
        });

        let scheduler = Arc::clone(self);
        let rotation = tokio::spawn(async move {
            let mut timer = interval(scheduler.settings.rotation_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                scheduler.run_rotation_cycle().await;
            }
        });

        SchedulerHandles { probe, rotation }
    }

    /// Enumerate, validate, probe and process every check once.
    ///
    /// Checks are evaluated concurrently; a failure on one never affects the
    /// others. Returns once every evaluation started by this cycle is done.
    pub async fn run_probe_cycle(&self) -> ProbeCycleReport {
        let keys = match self.store.list(CHECKS_COLLECTION).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "Could not enumerate checks, skipping probe cycle");
                return ProbeCycleReport::default();
            }
        };

        let mut report = ProbeCycleReport { enumerated: keys.len(), ..Default::default() };
        if keys.is_empty() {
            debug!("No checks to process");
            return report;
        }

        let mut evaluations = JoinSet::new();
        for key in keys {
            let store = Arc::clone(&self.store);
            let prober = Arc::clone(&self.prober);
            let processor = Arc::clone(&self.processor);
            let in_flight = Arc::clone(&self.in_flight);
            let admission = self.admission.clone();

            evaluations.spawn(async move {
                // Claim before reading; an earlier evaluation may not have persisted yet.
                let Some(_claim) = InFlight::claim(&in_flight, &key) else {
                    debug!(check_id = %key, "Previous probe still running, skipping");
                    return Disposition::InFlight;
                };

                let raw = match store.read(CHECKS_COLLECTION, &key).await {
                    Ok(raw) => raw,
                    Err(StoreError::NotFound { .. }) => {
                        debug!(check_id = %key, "Check disappeared before it could be read");
                        return Disposition::Vanished;
                    }
                    Err(e) => {
                        warn!(check_id = %key, error = %e, "Error reading check data");
                        return Disposition::Unreadable;
                    }
                };

                let check = match validate_check(&raw) {
                    Ok(check) => check,
                    Err(failure) => {
                        warn!(key = %key, error = %failure, "Check is not properly formatted, skipping");
                        return Disposition::Invalid;
                    }
                };

                let _permit = match admission {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => return Disposition::InFlight,
                    },
                    None => None,
                };

                let outcome = prober.probe(&check).await;
                Disposition::Evaluated(processor.process(&check, outcome).await)
            });
        }

        while let Some(joined) = evaluations.join_next().await {
            match joined {
                Ok(Disposition::Evaluated(evaluation)) => {
                    report.evaluated += 1;
                    if evaluation.alert_warranted && evaluation.persisted {
                        report.alerts += 1;
                    }
                }
                Ok(Disposition::Vanished) => report.vanished += 1,
                Ok(Disposition::Unreadable) => report.unreadable += 1,
                Ok(Disposition::Invalid) => report.invalid += 1,
                Ok(Disposition::InFlight) => report.in_flight += 1,
                Err(e) => {
                    error!(error = %e, "Check evaluation task failed");
                    report.unreadable += 1;
                }
            }
        }

        info!(
            enumerated = report.enumerated,
            evaluated = report.evaluated,
            invalid = report.invalid,
            unreadable = report.unreadable,
            vanished = report.vanished,
            in_flight = report.in_flight,
            alerts = report.alerts,
            "Probe cycle finished"
        );
        report
    }

    /// Rotate every live log, one at a time, reporting each independently.
    pub async fn run_rotation_cycle(&self) -> RotationReport {
        let logs = match self.logger.list_live_logs().await {
            Ok(logs) => logs,
            Err(e) => {
                error!(error = %e, "Could not list logs, skipping rotation");
                return RotationReport::default();
            }
        };

        let mut report = RotationReport::default();
        for check_id in logs {
            match self.logger.rotate(&check_id).await {
                Ok(Some(artifact)) => {
                    debug!(check_id = %check_id, artifact = %artifact.display(), "Log rotated");
                    report.rotated += 1;
                }
                Ok(None) => report.empty += 1,
                Err(e) => {
                    warn!(check_id = %check_id, error = %e, "Error rotating log");
                    report.failed += 1;
                }
            }
        }

        info!(
            rotated = report.rotated,
            empty = report.empty,
            failed = report.failed,
            "Log rotation finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{Value, json};
    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::database::FileStore;
    use crate::database::models::CheckDefinition;
    use crate::monitoring::types::ProbeOutcome;
    use crate::notifications::Alerter;
    use crate::notifications::tests::RecordingSender;

    /// Answers from a script keyed by target; unknown targets time out
    #[derive(Default)]
    struct ScriptedProber {
        outcomes: HashMap<String, ProbeOutcome>,
        delay: Duration,
        calls: AtomicUsize,
        peak: AtomicUsize,
        running: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, check: &CheckDefinition) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now_running, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.outcomes.get(&check.target).cloned().unwrap_or_else(ProbeOutcome::timeout)
        }
    }

    struct Harness {
        _dir: TempDir,
        store: Arc<FileStore>,
        logger: Arc<CheckLogger>,
        prober: Arc<ScriptedProber>,
        sender: Arc<RecordingSender>,
        scheduler: Arc<MonitoringScheduler>,
    }

    async fn harness(prober: ScriptedProber, max_concurrent_probes: Option<usize>) -> Harness {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path().join("data")));
        let logger = Arc::new(CheckLogger::open(dir.path().join("logs")).await.unwrap());
        let sender = Arc::new(RecordingSender::default());
        let processor = Arc::new(OutcomeProcessor::new(
            store.clone(),
            logger.clone(),
            Arc::new(Alerter::new(sender.clone())),
        ));
        let prober = Arc::new(prober);
        let settings = SchedulerSettings {
            probe_interval: Duration::from_millis(50),
            rotation_interval: Duration::from_secs(3600),
            max_concurrent_probes,
        };
        let scheduler = Arc::new(MonitoringScheduler::new(
            store.clone(),
            prober.clone(),
            processor,
            logger.clone(),
            settings,
        ));
        Harness { _dir: dir, store, logger, prober, sender, scheduler }
    }

    fn check_id(n: usize) -> String {
        format!("check{n:015}")
    }

    fn raw_check(n: usize, state: &str, last_checked: Option<i64>) -> Value {
        let mut raw = json!({
            "id": check_id(n),
            "userPhone": "5551234567",
            "protocol": "https",
            "url": format!("site{n}.example.com/"),
            "method": "get",
            "successCodes": [200],
            "timeoutSeconds": 3,
            "state": state,
        });
        if let Some(millis) = last_checked {
            raw["lastChecked"] = json!(millis);
        }
        raw
    }

    async fn seed(h: &Harness, n: usize, raw: Value) {
        h.store.create(CHECKS_COLLECTION, &check_id(n), &raw).await.unwrap();
    }

    fn script(entries: &[(usize, ProbeOutcome)]) -> HashMap<String, ProbeOutcome> {
        entries
            .iter()
            .map(|(n, outcome)| (format!("site{n}.example.com/"), outcome.clone()))
            .collect()
    }

    #[tokio::test]
    async fn probe_cycle_evaluates_valid_checks_and_skips_the_rest() {
        let prober = ScriptedProber {
            outcomes: script(&[(1, ProbeOutcome::response(200)), (2, ProbeOutcome::response(500))]),
            ..Default::default()
        };
        let h = harness(prober, None).await;
        seed(&h, 1, raw_check(1, "down", Some(1_700_000_000_000))).await;
        seed(&h, 2, raw_check(2, "up", None)).await;
        let mut broken = raw_check(3, "up", None);
        broken["timeoutSeconds"] = json!(30);
        seed(&h, 3, broken).await;

        let report = h.scheduler.run_probe_cycle().await;

        assert_eq!(report.enumerated, 3);
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.alerts, 1);
        assert_eq!(h.prober.calls.load(Ordering::SeqCst), 2, "invalid record must never be probed");

        let one = h.store.read(CHECKS_COLLECTION, &check_id(1)).await.unwrap();
        let two = h.store.read(CHECKS_COLLECTION, &check_id(2)).await.unwrap();
        assert_eq!(one["state"], json!("up"));
        assert_eq!(two["state"], json!("down"));
        assert!(two["lastChecked"].as_i64().is_some());

        // Only the previously observed check changed state with an alert.
        let messages = h.sender.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("site1.example.com"));

        assert_eq!(h.logger.list_live_logs().await.unwrap(), vec![check_id(1), check_id(2)]);
    }

    #[tokio::test]
    async fn unreadable_record_does_not_abort_the_cycle() {
        let prober = ScriptedProber {
            outcomes: script(&[(1, ProbeOutcome::response(200))]),
            ..Default::default()
        };
        let h = harness(prober, None).await;
        seed(&h, 1, raw_check(1, "down", None)).await;
        std::fs::write(h.store.base_dir().join("checks").join("corrupt.json"), "{{{").unwrap();

        let report = h.scheduler.run_probe_cycle().await;

        assert_eq!(report.enumerated, 2);
        assert_eq!(report.unreadable, 1);
        assert_eq!(report.evaluated, 1);
    }

    #[tokio::test]
    async fn empty_store_is_a_quiet_cycle() {
        let h = harness(ScriptedProber::default(), None).await;
        assert_eq!(h.scheduler.run_probe_cycle().await, ProbeCycleReport::default());
    }

    #[tokio::test]
    async fn overlapping_cycles_probe_a_check_once() {
        let prober = ScriptedProber {
            outcomes: script(&[(1, ProbeOutcome::response(200))]),
            delay: Duration::from_millis(200),
            ..Default::default()
        };
        let h = harness(prober, None).await;
        seed(&h, 1, raw_check(1, "down", None)).await;

        let (first, second) =
            tokio::join!(h.scheduler.run_probe_cycle(), async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                h.scheduler.run_probe_cycle().await
            });

        assert_eq!(first.evaluated + second.evaluated, 1);
        assert_eq!(first.in_flight + second.in_flight, 1);
        assert_eq!(h.prober.calls.load(Ordering::SeqCst), 1);

        // The claim is released once the evaluation finishes.
        assert_eq!(h.scheduler.run_probe_cycle().await.evaluated, 1);
    }

    #[tokio::test]
    async fn admission_limit_bounds_in_flight_probes() {
        let prober = ScriptedProber { delay: Duration::from_millis(50), ..Default::default() };
        let h = harness(prober, Some(2)).await;
        for n in 0..6 {
            seed(&h, n, raw_check(n, "down", None)).await;
        }

        let report = h.scheduler.run_probe_cycle().await;

        assert_eq!(report.evaluated, 6);
        assert!(h.prober.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn rotation_cycle_rotates_each_live_log() {
        let prober = ScriptedProber {
            outcomes: script(&[(1, ProbeOutcome::response(200)), (2, ProbeOutcome::response(200))]),
            ..Default::default()
        };
        let h = harness(prober, None).await;
        seed(&h, 1, raw_check(1, "down", None)).await;
        seed(&h, 2, raw_check(2, "down", None)).await;
        h.scheduler.run_probe_cycle().await;

        let report = h.scheduler.run_rotation_cycle().await;
        assert_eq!(report, RotationReport { rotated: 2, empty: 0, failed: 0 });
        assert_eq!(h.logger.read_live(&check_id(1)).await.unwrap(), "");

        // Nothing new was logged, so a second pass archives nothing.
        let report = h.scheduler.run_rotation_cycle().await;
        assert_eq!(report, RotationReport { rotated: 0, empty: 2, failed: 0 });
    }

    #[tokio::test]
    async fn start_runs_an_immediate_pass_of_both_cycles() {
        let prober = ScriptedProber {
            outcomes: script(&[(1, ProbeOutcome::response(200))]),
            ..Default::default()
        };
        let h = harness(prober, None).await;
        seed(&h, 1, raw_check(1, "down", None)).await;

        let handles = h.scheduler.start();
        tokio::time::sleep(Duration::from_millis(180)).await;
        handles.shutdown();

        // Several probe passes ran, so entries exist past the startup rotation.
        assert!(h.prober.calls.load(Ordering::SeqCst) >= 2);
        let doc = h.store.read(CHECKS_COLLECTION, &check_id(1)).await.unwrap();
        assert_eq!(doc["state"], json!("up"));
        assert!(!h.logger.read_live(&check_id(1)).await.unwrap().is_empty());
    }

    /// Passes everything through to a `FileStore`, counting reads
    struct CountingStore {
        inner: FileStore,
        reads: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RecordStore for CountingStore {
        async fn create(&self, collection: &str, key: &str, doc: &Value) -> Result<(), StoreError> {
            self.inner.create(collection, key, doc).await
        }

        async fn read(&self, collection: &str, key: &str) -> Result<Value, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(collection, key).await
        }

        async fn update(&self, collection: &str, key: &str, doc: &Value) -> Result<(), StoreError> {
            self.inner.update(collection, key, doc).await
        }

        async fn delete(&self, collection: &str, key: &str) -> Result<(), StoreError> {
            self.inner.delete(collection, key).await
        }

        async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list(collection).await
        }
    }

    #[tokio::test]
    async fn claimed_check_is_not_read_by_an_overlapping_cycle() {
        let dir = tempdir().unwrap();
        let store = Arc::new(CountingStore {
            inner: FileStore::new(dir.path().join("data")),
            reads: AtomicUsize::new(0),
        });
        let logger = Arc::new(CheckLogger::open(dir.path().join("logs")).await.unwrap());
        let sender = Arc::new(RecordingSender::default());
        let processor = Arc::new(OutcomeProcessor::new(
            store.clone(),
            logger.clone(),
            Arc::new(Alerter::new(sender.clone())),
        ));
        let prober = Arc::new(ScriptedProber {
            outcomes: script(&[(1, ProbeOutcome::response(200))]),
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let settings = SchedulerSettings {
            probe_interval: Duration::from_secs(60),
            rotation_interval: Duration::from_secs(3600),
            max_concurrent_probes: None,
        };
        let scheduler = MonitoringScheduler::new(store.clone(), prober, processor, logger, settings);
        store
            .create(CHECKS_COLLECTION, &check_id(1), &raw_check(1, "down", Some(1_700_000_000_000)))
            .await
            .unwrap();

        let (first, second) = tokio::join!(scheduler.run_probe_cycle(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            scheduler.run_probe_cycle().await
        });

        assert_eq!(first.evaluated + second.evaluated, 1);
        assert_eq!(first.in_flight + second.in_flight, 1);
        assert_eq!(store.reads.load(Ordering::SeqCst), 1, "a claimed record must not be read");

        // The next cycle starts from the persisted state, so the transition alerts once.
        assert_eq!(scheduler.run_probe_cycle().await.evaluated, 1);
        assert_eq!(sender.messages().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_cycles_already_running() {
        let prober = ScriptedProber {
            outcomes: script(&[(1, ProbeOutcome::response(200))]),
            delay: Duration::from_millis(400),
            ..Default::default()
        };
        let h = harness(prober, None).await;
        seed(&h, 1, raw_check(1, "down", None)).await;

        let handles = h.scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.prober.calls.load(Ordering::SeqCst), 1);
        handles.shutdown();
        tokio::time::sleep(Duration::from_millis(600)).await;

        let doc = h.store.read(CHECKS_COLLECTION, &check_id(1)).await.unwrap();
        assert_eq!(doc["state"], json!("down"), "an aborted cycle must not persist");
        assert!(doc.get("lastChecked").is_none());
        assert_eq!(h.logger.read_live(&check_id(1)).await.unwrap(), "");
    }
}
