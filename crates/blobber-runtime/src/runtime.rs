//! # Blobber Runtime
//!
//! Owns the service container and the background tasks.
//!
//! ## Startup Sequence
//!
//! 1. Validate configuration, load keys, open the store (bootstrap)
//! 2. Start the blob cleanup worker
//! 3. Register on chain (bounded attempts; exhaustion aborts startup)
//! 4. Start write-marker redemption, health check and, with USD pricing,
//!    the settings update
//!
//! Every task watches the same shutdown channel.

use std::sync::Arc;

use parking_lot::Mutex;
use shared_types::{SystemTimeSource, TimeSource};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bootstrap::{self, BootstrapError};
use crate::container::{NodeConfig, ServiceContainer};
use crate::workers::{
    run_periodic, HealthReporter, Registrar, RegistrationOutcome, SettingsUpdater, WorkerError,
};

pub struct BlobberRuntime {
    container: Arc<ServiceContainer>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BlobberRuntime {
    /// Wire a runtime from configuration. Any error is fatal.
    pub async fn bootstrap(config: NodeConfig) -> Result<Self, BootstrapError> {
        config.validate()?;
        let identity = bootstrap::load_identity(&config.keys_file)?;
        let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
        let store = bootstrap::open_store(&config.storage).await?;
        let blobs = bootstrap::build_blob_store(&config.storage);
        let chain = bootstrap::build_chain(
            &config.chain,
            &identity,
            config.hash_strategy.build(),
            Arc::clone(&time),
        )?;

        let container = ServiceContainer::new(config, identity, store, blobs, chain, time);
        Ok(Self::from_container(Arc::new(container)))
    }

    pub fn from_container(container: Arc<ServiceContainer>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            container,
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn start(&self) -> Result<RegistrationOutcome, WorkerError> {
        let container = &self.container;
        info!("===========================================");
        info!("  Blobber {}", container.blobber_id());
        info!("  URL: {}", container.config.blobber.url);
        info!("===========================================");

        if let Some(worker) = container.take_cleanup_worker() {
            let rx = self.shutdown_rx.clone();
            self.spawn(async move {
                worker.run(rx).await;
            });
        }

        let registration = &container.config.registration;
        let registrar = Registrar::new(
            container.chain.clone(),
            container.profile(),
            registration.max_attempts,
            registration.retry_interval(),
        );
        let outcome = registrar.register(&mut self.shutdown_rx.clone()).await?;
        info!("[runtime] Registration: {:?}", outcome);

        self.spawn(Arc::clone(&container.scheduler).run(self.shutdown_rx.clone()));

        let reporter = Arc::new(HealthReporter::new(
            container.chain.clone(),
            container.profile(),
            Arc::clone(&container.time),
        ));
        self.spawn(run_periodic(
            "health check",
            std::time::Duration::ZERO,
            container.config.health_check.interval(),
            self.shutdown_rx.clone(),
            move || {
                let reporter = Arc::clone(&reporter);
                async move { reporter.tick().await }
            },
        ));

        if container.config.blobber.price_in_usd {
            let updater = Arc::new(SettingsUpdater::new(
                container.chain.clone(),
                container.profile(),
            ));
            let period = container.config.update_settings.interval();
            self.spawn(run_periodic(
                "settings update",
                period,
                period,
                self.shutdown_rx.clone(),
                move || {
                    let updater = Arc::clone(&updater);
                    async move { updater.tick().await }
                },
            ));
        }

        info!("[runtime] Background routines running");
        Ok(outcome)
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().push(tokio::spawn(task));
    }

    /// Signal every task and wait for them to finish their current round.
    pub async fn shutdown(&self) {
        info!("[runtime] Initiating graceful shutdown...");
        if let Err(e) = self.shutdown_tx.send(true) {
            error!("[runtime] Failed to send shutdown signal: {}", e);
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("[runtime] Task ended abnormally: {}", e);
            }
        }
        info!("[runtime] Shutdown complete");
    }

    pub fn container(&self) -> Arc<ServiceContainer> {
        Arc::clone(&self.container)
    }
}
