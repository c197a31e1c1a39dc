//! Draining engine: empties one bucket in arrival order, then lets go.
//!
//! A drain never waits for new arrivals. Once a listing comes back empty it
//! returns, and the dispatcher starts a new drain when it next sees the
//! bucket. On the first processing failure the bucket is halted and the rest
//! of its queue stays where it is.

use crate::bucket::Bucket;
use crate::error::ProcessingError;
use crate::key::Key;
use crate::sink::{self, Diagnostic, Stage};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Downstream processing of a single item, e.g. catalog registration.
///
/// On success the item may be left in place; the engine consumes it.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, item: &Path, key: &Key) -> Result<(), ProcessingError>;
}

/// How a drain dispatch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The bucket carried the halt flag; nothing was touched
    AlreadyHalted,
    /// Every queued item was processed and the last listing was empty
    Quiescent,
    /// Processing of `item` failed; it went to the failed outbox and the bucket is halted
    HaltedOnFailure { item: PathBuf },
    /// The engine itself hit an I/O error; the bucket is halted
    HaltedOnError { error: String },
    /// The bucket no longer exists (stale dispatch)
    Vanished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub bucket: PathBuf,
    pub processed: usize,
    pub outcome: DrainOutcome,
}

pub struct DrainingEngine {
    failed: PathBuf,
    processed: Option<PathBuf>,
    processor: Arc<dyn ItemProcessor>,
}

impl DrainingEngine {
    pub fn new(failed: impl Into<PathBuf>, processor: Arc<dyn ItemProcessor>) -> Self {
        Self {
            failed: failed.into(),
            processed: None,
            processor,
        }
    }

    /// Keep processed items in this outbox (by key) instead of deleting them
    pub fn with_processed_outbox(mut self, processed: Option<PathBuf>) -> Self {
        self.processed = processed;
        self
    }

    pub async fn drain(&self, bucket: &Bucket) -> DrainReport {
        tracing::debug!(bucket = %bucket.path().display(), "Started draining bucket");
        let mut processed = 0;
        let outcome = self.drain_to_quiescence(bucket, &mut processed).await;
        match &outcome {
            DrainOutcome::Quiescent | DrainOutcome::AlreadyHalted | DrainOutcome::Vanished => {
                tracing::debug!(bucket = %bucket.path().display(), processed, outcome = ?outcome, "Finished draining bucket")
            }
            DrainOutcome::HaltedOnFailure { .. } | DrainOutcome::HaltedOnError { .. } => {
                tracing::warn!(bucket = %bucket.path().display(), key = %bucket.key(), processed, outcome = ?outcome, "Bucket halted")
            }
        }
        DrainReport {
            bucket: bucket.path().to_path_buf(),
            processed,
            outcome,
        }
    }

    async fn drain_to_quiescence(&self, bucket: &Bucket, processed: &mut usize) -> DrainOutcome {
        match bucket.is_halted().await {
            Ok(false) => {}
            Ok(true) => {
                tracing::debug!(bucket = %bucket.path().display(), "Bucket is halted, skipping");
                return DrainOutcome::AlreadyHalted;
            }
            Err(e) => return self.halt_on_error(bucket, e).await,
        }

        loop {
            let items = match bucket.items().await {
                Ok(items) => items,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return DrainOutcome::Vanished,
                Err(e) => return self.halt_on_error(bucket, e).await,
            };
            if items.is_empty() {
                return DrainOutcome::Quiescent;
            }

            for item in items {
                if let Err(e) = self.processor.process(&item, bucket.key()).await {
                    tracing::error!(
                        item = %item.display(),
                        key = %bucket.key(),
                        bucket = %bucket.path().display(),
                        error = %e,
                        "Error processing item"
                    );
                    self.fail_item(bucket, &item, &e).await;
                    self.halt(bucket).await;
                    return DrainOutcome::HaltedOnFailure { item };
                }
                if let Err(e) = self.consume(bucket, &item).await {
                    return self.halt_on_error(bucket, e).await;
                }
                *processed += 1;
            }
            // Items may have arrived while the listing was being processed
        }
    }

    /// Make sure a successfully processed item has left the bucket
    async fn consume(&self, bucket: &Bucket, item: &Path) -> io::Result<()> {
        if !tokio::fs::try_exists(item).await? {
            return Ok(());
        }
        match &self.processed {
            Some(outbox) => {
                sink::move_into_sink(item, &sink::keyed_sink(outbox, bucket.key())).await?;
            }
            None => match tokio::fs::remove_file(item).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            },
        }
        Ok(())
    }

    async fn fail_item(&self, bucket: &Bucket, item: &Path, error: &ProcessingError) {
        let outbox = sink::keyed_sink(&self.failed, bucket.key());
        let diagnostic = Diagnostic {
            stage: Stage::Drain,
            item,
            key: Some(bucket.key()),
            bucket: Some(bucket.path()),
            error,
        };
        if let Err(e) = sink::quarantine(item, &outbox, &diagnostic).await {
            // The item stays at the head of the halted bucket
            tracing::error!(item = %item.display(), outbox = %outbox.display(), error = %e, "Unable to move item to failed outbox");
        }
    }

    async fn halt_on_error(&self, bucket: &Bucket, error: io::Error) -> DrainOutcome {
        tracing::error!(bucket = %bucket.path().display(), error = %error, "Error draining bucket");
        self.halt(bucket).await;
        DrainOutcome::HaltedOnError {
            error: error.to_string(),
        }
    }

    async fn halt(&self, bucket: &Bucket) {
        if let Err(e) = bucket.halt().await {
            tracing::error!(bucket = %bucket.path().display(), error = %e, "Unable to halt bucket");
        }
    }
}
