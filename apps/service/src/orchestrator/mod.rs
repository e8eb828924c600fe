/// Orchestrator module - coordinates all components
///
/// The orchestrator is the core coordinator that:
/// - Builds the record store, check logger, prober and alerter from config
/// - Wires them into the outcome processor and scheduler
/// - Runs the periodic cycles until shutdown is requested


use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::database::{FileStore, RecordStore};
use crate::logs::CheckLogger;
use crate::monitoring::{
    HttpProber, MonitoringScheduler, OutcomeProcessor, ProbeCycleReport, Prober, RotationReport,
    SchedulerSettings,
};
use crate::notifications::{Alerter, LogOnlySender, SmsSender, TwilioSender};

/// Main orchestrator for the uptick service
pub struct Orchestrator {
    config: Arc<Config>,
    store: Arc<dyn RecordStore>,
    logger: Arc<CheckLogger>,
    scheduler: Arc<MonitoringScheduler>,
}

impl Orchestrator {
    /// Create and start a new orchestrator
    /// This is a convenience method that creates and immediately runs the orchestrator
    pub async fn start(config: Config) -> Result<()> {
        let orchestrator = Self::new(config).await?;
        orchestrator.run().await
    }

    /// Create an orchestrator probing over HTTP and alerting through Twilio
    /// when credentials are configured
    pub async fn new(config: Config) -> Result<Self> {
        let prober: Arc<dyn Prober> = Arc::new(HttpProber::new()?);
        let sender: Arc<dyn SmsSender> = if config.twilio.is_configured() {
            info!(api_base = %config.twilio.api_base, "Alerts will be sent by SMS");
            Arc::new(TwilioSender::new(config.twilio.clone())?)
        } else {
            warn!("Twilio credentials missing, alerts will only be logged");
            Arc::new(LogOnlySender)
        };
        Self::with_components(config, prober, sender).await
    }

    /// Create an orchestrator around a caller-supplied prober and SMS sender
    pub async fn with_components(
        config: Config,
        prober: Arc<dyn Prober>,
        sender: Arc<dyn SmsSender>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        info!(data_dir = %config.storage.data_dir.display(), "Opening record store");
        let store: Arc<dyn RecordStore> = Arc::new(FileStore::new(&config.storage.data_dir));

        info!(log_dir = %config.storage.log_dir.display(), "Opening check logs");
        let logger = Arc::new(
            CheckLogger::open(&config.storage.log_dir)
                .await
                .with_context(|| format!("opening log directory {}", config.storage.log_dir.display()))?,
        );

        // Slack over the provider's own request timeout.
        let delivery_deadline = Duration::from_secs(config.twilio.timeout_seconds.saturating_add(5));
        let alerter = Arc::new(Alerter::new(sender).with_deadline(delivery_deadline));
        let processor = Arc::new(OutcomeProcessor::new(store.clone(), logger.clone(), alerter));
        let scheduler = Arc::new(MonitoringScheduler::new(
            store.clone(),
            prober,
            processor,
            logger.clone(),
            SchedulerSettings::from(&config.workers),
        ));

        Ok(Self { config, store, logger, scheduler })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    pub fn logger(&self) -> Arc<CheckLogger> {
        Arc::clone(&self.logger)
    }

    /// Run a single probe cycle followed by a single rotation cycle
    pub async fn run_once(&self) -> (ProbeCycleReport, RotationReport) {
        let probes = self.scheduler.run_probe_cycle().await;
        let rotation = self.scheduler.run_rotation_cycle().await;
        (probes, rotation)
    }

    /// Run both cycles until Ctrl-C
    pub async fn run(&self) -> Result<()> {
        let settings = self.scheduler.settings();
        info!(
            probe_interval = ?settings.probe_interval,
            rotation_interval = ?settings.rotation_interval,
            max_concurrent_probes = ?settings.max_concurrent_probes,
            "Starting uptick orchestrator..."
        );

        let handles = self.scheduler.start();

        tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
        info!("Shutdown requested, stopping workers");
        handles.shutdown();

        Ok(())
    }
}
