//! Bucketing engine: routes each staged item into the bucket of its key.
//!
//! Admission must be serialized. Two concurrent admissions for one key could
//! both find no bucket and create two of them.

use crate::bucket::{self, Bucket};
use crate::error::{ExtractionError, SequencerError, SequencerResult};
use crate::extract::KeyExtractor;
use crate::key::{Key, MAX_ENCODED_LEN};
use crate::sink::{self, Diagnostic, Stage};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where an admitted item ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Queued in the bucket of its key
    Routed {
        key: Key,
        bucket: PathBuf,
        item: PathBuf,
    },
    /// Key could not be extracted; moved to the rejected outbox
    Rejected { item: PathBuf },
    /// Key known but relocation failed; moved to the failed outbox
    Failed { key: Key, item: PathBuf },
    /// Could not even be moved to an outbox; left in staging
    Stranded { item: PathBuf },
}

pub struct BucketingEngine {
    destination: PathBuf,
    rejected: PathBuf,
    failed: PathBuf,
    max_attempts: usize,
    extractor: Arc<dyn KeyExtractor>,
}

impl BucketingEngine {
    pub fn new(
        destination: impl Into<PathBuf>,
        rejected: impl Into<PathBuf>,
        failed: impl Into<PathBuf>,
        extractor: Arc<dyn KeyExtractor>,
    ) -> Self {
        Self {
            destination: destination.into(),
            rejected: rejected.into(),
            failed: failed.into(),
            max_attempts: 5,
            extractor,
        }
    }

    /// Number of times a bucket that vanished mid-admission is re-resolved
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Route one staged item
    pub async fn admit(&self, item: &Path) -> Admission {
        let key = match self.extract_key(item).await {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(item = %item.display(), error = %e, "Rejecting item, unable to determine its key");
                return self.reject(item, &e).await;
            }
        };

        match self.route(item, &key).await {
            Ok((bucket, queued)) => {
                tracing::debug!(
                    item = %item.display(),
                    key = %key,
                    bucket = %bucket.path().display(),
                    "Item queued in bucket"
                );
                Admission::Routed {
                    key,
                    bucket: bucket.path().to_path_buf(),
                    item: queued,
                }
            }
            Err(e) => {
                tracing::error!(item = %item.display(), key = %key, error = %e, "Unable to move item into its bucket");
                self.fail(item, &key, &e).await
            }
        }
    }

    async fn extract_key(&self, item: &Path) -> Result<Key, ExtractionError> {
        let extractor = Arc::clone(&self.extractor);
        let path = item.to_path_buf();
        let key = tokio::task::spawn_blocking(move || extractor.extract_key(&path))
            .await
            .map_err(|e| ExtractionError::Io(io::Error::other(e.to_string())))??;

        if !key.fits_bucket_name() {
            return Err(ExtractionError::KeyTooLong {
                encoded_len: key.encoded().len(),
                max: MAX_ENCODED_LEN,
            });
        }
        Ok(key)
    }

    /// Locate or create the bucket, then rename the item into it. A bucket reaped
    /// between lookup and rename is resolved again.
    async fn route(&self, item: &Path, key: &Key) -> SequencerResult<(Bucket, PathBuf)> {
        self.route_via(item, key, move || self.ensure_bucket(key)).await
    }

    async fn route_via<F, Fut>(
        &self,
        item: &Path,
        key: &Key,
        mut resolve: F,
    ) -> SequencerResult<(Bucket, PathBuf)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SequencerResult<Bucket>>,
    {
        for attempt in 1..=self.max_attempts {
            let bucket = resolve().await?;
            match sink::relocate(item, bucket.path()).await {
                Ok(queued) => return Ok((bucket, queued)),
                Err(e) => {
                    if e.kind() != io::ErrorKind::NotFound || !self.bucket_vanished(&bucket, item).await {
                        return Err(SequencerError::io(item, e));
                    }
                    tracing::debug!(
                        key = %key,
                        bucket = %bucket.path().display(),
                        attempt,
                        "Bucket disappeared during admission, resolving again"
                    );
                }
            }
        }
        Err(SequencerError::BucketUnstable {
            key: key.clone(),
            attempts: self.max_attempts,
        })
    }

    /// True when the rename failed because the bucket is gone, not the item
    async fn bucket_vanished(&self, bucket: &Bucket, item: &Path) -> bool {
        let bucket_gone = !bucket.exists().await.unwrap_or(true);
        let item_present = tokio::fs::try_exists(item).await.unwrap_or(false);
        bucket_gone && item_present
    }

    async fn ensure_bucket(&self, key: &Key) -> SequencerResult<Bucket> {
        let existing = bucket::find_bucket(&self.destination, key)
            .await
            .map_err(|e| SequencerError::io(&self.destination, e))?;
        match existing {
            Some(bucket) => Ok(bucket),
            None => bucket::create_bucket(&self.destination, key)
                .await
                .map_err(|e| SequencerError::io(&self.destination, e)),
        }
    }

    async fn reject(&self, item: &Path, error: &ExtractionError) -> Admission {
        let diagnostic = Diagnostic {
            stage: Stage::Admission,
            item,
            key: None,
            bucket: None,
            error,
        };
        match sink::quarantine(item, &self.rejected, &diagnostic).await {
            Ok(moved) => Admission::Rejected { item: moved },
            Err(e) => {
                tracing::error!(item = %item.display(), outbox = %self.rejected.display(), error = %e, "Unable to move item to rejected outbox");
                Admission::Stranded {
                    item: item.to_path_buf(),
                }
            }
        }
    }

    async fn fail(&self, item: &Path, key: &Key, error: &SequencerError) -> Admission {
        let outbox = sink::keyed_sink(&self.failed, key);
        let diagnostic = Diagnostic {
            stage: Stage::Admission,
            item,
            key: Some(key),
            bucket: None,
            error,
        };
        match sink::quarantine(item, &outbox, &diagnostic).await {
            Ok(moved) => Admission::Failed {
                key: key.clone(),
                item: moved,
            },
            Err(e) => {
                tracing::error!(item = %item.display(), outbox = %outbox.display(), error = %e, "Unable to move item to failed outbox");
                Admission::Stranded {
                    item: item.to_path_buf(),
                }
            }
        }
    }
}
