//! Operator view of the destination root: what is queued, what is halted,
//! and clearing a halt once the cause has been dealt with.

use crate::bucket::{self, Bucket};
use crate::error::{SequencerError, SequencerResult};
use crate::key::Key;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketStatus {
    pub key: String,
    pub instance: String,
    pub path: PathBuf,
    /// Number of items waiting to be drained
    pub queued: usize,
    pub halted: bool,
}

impl BucketStatus {
    async fn of(bucket: &Bucket) -> io::Result<Self> {
        Ok(Self {
            key: bucket.key().to_string(),
            instance: bucket.instance().to_string(),
            path: bucket.path().to_path_buf(),
            queued: bucket.items().await?.len(),
            halted: bucket.is_halted().await?,
        })
    }
}

/// Status of every bucket under `root`, oldest first
pub async fn survey(root: &Path, reserved: &[String]) -> io::Result<Vec<BucketStatus>> {
    let mut statuses = Vec::new();
    for bucket in bucket::list_buckets(root, reserved).await? {
        match BucketStatus::of(&bucket).await {
            Ok(status) => statuses.push(status),
            // Reaped while we were looking
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(statuses)
}

/// Clear the halt flag of the bucket for `key`. Returns `false` when the bucket
/// was not halted.
pub async fn resume(root: &Path, key: &Key) -> SequencerResult<bool> {
    let bucket = bucket::find_bucket(root, key)
        .await
        .map_err(|e| SequencerError::io(root, e))?
        .ok_or_else(|| SequencerError::NoSuchBucket(key.clone()))?;

    let cleared = bucket
        .resume()
        .await
        .map_err(|e| SequencerError::io(bucket.path(), e))?;
    if cleared {
        tracing::info!(key = %key, bucket = %bucket.path().display(), "Resumed bucket");
    }
    Ok(cleared)
}
