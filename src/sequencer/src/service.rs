use crate::admit::BucketingEngine;
use crate::catalog::CatalogRegistrar;
use crate::dispatch::DrainDispatcher;
use crate::drain::{DrainingEngine, ItemProcessor};
use crate::error::{ProcessingError, SequencerError, SequencerResult};
use crate::extract::{KeyExtractor, OaiOreKeyExtractor};
use crate::inbox::AdmissionInbox;
use common::config::Configuration;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

/// Admission loop and drain dispatcher wired together from configuration
pub struct TransferService {
    directories: Vec<PathBuf>,
    inbox: AdmissionInbox,
    dispatcher: DrainDispatcher,
}

impl TransferService {
    pub fn new(
        config: &Configuration,
        extractor: Arc<dyn KeyExtractor>,
        processor: Arc<dyn ItemProcessor>,
    ) -> Self {
        let admission = BucketingEngine::new(
            &config.drain.destination,
            &config.collect.rejected,
            &config.collect.failed,
            extractor,
        )
        .with_max_attempts(config.collect.max_attempts);
        let inbox = AdmissionInbox::new(
            &config.collect.inbox,
            config.collect.polling_interval,
            admission,
        );

        let engine = DrainingEngine::new(&config.drain.failed, processor)
            .with_processed_outbox(config.drain.processed.clone());
        let dispatcher = DrainDispatcher::new(
            &config.drain.destination,
            config.drain.polling_interval,
            config.reserved_bucket_names(),
            config.drain.workers,
            engine,
        );

        let mut directories = vec![
            config.collect.inbox.clone(),
            config.drain.destination.clone(),
            config.collect.rejected.clone(),
            config.collect.failed.clone(),
            config.drain.failed.clone(),
        ];
        directories.extend(config.drain.processed.clone());

        Self {
            directories,
            inbox,
            dispatcher,
        }
    }

    /// Service that keys exports by NBN and registers them with the catalog
    pub fn with_catalog(config: &Configuration) -> Result<Self, ProcessingError> {
        let registrar = CatalogRegistrar::new(&config.catalog.url, config.catalog.timeout)?;
        Ok(Self::new(
            config,
            Arc::new(OaiOreKeyExtractor),
            Arc::new(registrar),
        ))
    }

    async fn create_directories(&self) -> SequencerResult<()> {
        for dir in &self.directories {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| SequencerError::io(dir, e))?;
        }
        Ok(())
    }

    /// Run until `shutdown` flips. Admission waits for the first drain round.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> SequencerResult<()> {
        self.create_directories().await?;

        let (started_tx, started_rx) = oneshot::channel();
        let dispatcher = tokio::spawn(self.dispatcher.run(started_tx, shutdown.clone()));
        self.inbox.run(started_rx, shutdown).await;

        if let Err(e) = dispatcher.await {
            tracing::error!(error = %e, "Drain dispatcher task failed");
        }
        Ok(())
    }
}
