use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Registry of buckets currently claimed by a drain or by the reaper.
///
/// A bucket can be claimed once at a time. The dispatcher holds a lease for the
/// whole lifetime of a drain, which gives at most one outstanding drain per
/// bucket and keeps the reaper away from a bucket that is being drained.
#[derive(Debug, Clone, Default)]
pub struct BucketLeases {
    held: Arc<Mutex<HashSet<PathBuf>>>,
}

impl BucketLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `bucket`, or `None` when someone else holds it
    pub fn try_acquire(&self, bucket: &Path) -> Option<BucketLease> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(bucket.to_path_buf()) {
            return None;
        }
        Some(BucketLease {
            held: Arc::clone(&self.held),
            bucket: bucket.to_path_buf(),
        })
    }

    pub fn is_held(&self, bucket: &Path) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(bucket)
    }

    pub fn len(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive claim on a bucket; released on drop
#[derive(Debug)]
pub struct BucketLease {
    held: Arc<Mutex<HashSet<PathBuf>>>,
    bucket: PathBuf,
}

impl BucketLease {
    pub fn bucket(&self) -> &Path {
        &self.bucket
    }
}

impl Drop for BucketLease {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.bucket);
    }
}
